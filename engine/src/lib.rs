//! # Armory Engine
//!
//! Synchronization core for a role-play weapon shop backed by a real-time
//! document store.
//!
//! The store is always the source of truth. This crate decides when the
//! local copy of it can be trusted, turns change notifications into events
//! a renderer can consume, and applies every mutation with the checks the
//! shop's bookkeeping depends on.
//!
//! ## Components
//!
//! - [`LocalMirror`]: the last known weapons snapshot, only ever replaced
//!   whole.
//! - [`SubscriptionManager`]: one live watch per [`Topic`], replaced
//!   idempotently and torn down explicitly.
//! - [`ReconciliationPolicy`]: per-read decision between the mirror and a
//!   refetch. Unreachable stores leave the mirror stale; denied access
//!   clears it.
//! - [`WriteCoordinator`]: stock upserts with duplicate merging, sales,
//!   purchase requests, the audit log and settings.
//! - [`views`]: pure projections for buyer and admin screens.
//! - [`Storefront`]: all of the above wired to one [`StorageBackend`].
//!
//! ## Backends
//!
//! [`RemoteBackend`] talks to the hosted store over HTTP and a multiplexed
//! WebSocket. [`MemoryBackend`] keeps everything in process and can be
//! saved to and restored from a [`BackendSnapshot`].
//!
//! ## Quick Start
//!
//! ```rust
//! use armory_engine::{ItemDraft, MoneyType, Storefront, UpsertOutcome};
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let shop = Storefront::local();
//!     shop.start().await.unwrap();
//!
//!     let draft = ItemDraft::new("Pistol", 800.0, 1200.0, 2, MoneyType::Clean);
//!     let outcome = shop.coordinator().upsert_item(draft.clone()).await.unwrap();
//!     assert!(matches!(outcome, UpsertOutcome::Created { .. }));
//!
//!     // Same name, money type and prices: the quantity is merged.
//!     let outcome = shop.coordinator().upsert_item(draft).await.unwrap();
//!     assert!(matches!(outcome, UpsertOutcome::Merged { quantity: 4, .. }));
//!
//!     let listings = shop.buyer_listings().await.unwrap();
//!     assert_eq!(listings[0].total_quantity, 4);
//! });
//! ```

pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod format;
pub mod ledger;
pub mod mirror;
pub mod reconcile;
pub mod record;
pub mod request;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod store;
pub mod subscription;
pub mod topic;
pub mod views;
pub mod wire;

// Re-export main types at crate root
pub use auth::{AuthGateway, HttpAuthGateway, LoginMethod};
pub use client::Storefront;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RemoteConfig, StoreEndpoint, SyncConfig};
pub use coordinator::{AcceptOutcome, SaleReceipt, UpsertOutcome, WriteCoordinator};
pub use error::{Error, Result};
pub use events::{EventBus, SyncEvent, TopicSnapshot};
pub use ledger::{LogEntry, LogKind, ProfitRecord};
pub use mirror::LocalMirror;
pub use reconcile::{Freshness, ReconciliationPolicy, View};
pub use record::{Document, Fields, Item, ItemDraft, MoneyType, Record};
pub use request::{PriceMode, PurchaseRequest, PurchaseRequestDraft, RequestStatus};
pub use session::{AdminSession, SessionStatus};
pub use settings::{Settings, SettingsPatch};
pub use snapshot::{BackendSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{BackendKind, MemoryBackend, Query, RemoteBackend, StorageBackend, Watch};
pub use subscription::{SubscriptionManager, SubscriptionState};
pub use topic::{Topic, SETTINGS_DOC_ID};

/// Type aliases for clarity
pub type DocumentId = String;
/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
