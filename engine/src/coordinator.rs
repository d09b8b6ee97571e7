//! Write coordination.
//!
//! Every mutation goes through [`WriteCoordinator`], which checks the store
//! before writing (existence, duplicates, remaining stock), verifies creates
//! by reading them back, and ends with an explicit mirror refresh instead of
//! waiting for the change notification to arrive.
//!
//! Audit log appends are best effort: a failed log write is reported with
//! `tracing` and never undoes or fails the operation it describes.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::format::format_money;
use crate::ledger::{LogEntry, LogKind, ProfitRecord};
use crate::reconcile::ReconciliationPolicy;
use crate::record::{check_amount, object, Item, ItemDraft, MoneyType, Record};
use crate::request::{PurchaseRequest, PurchaseRequestDraft, RequestStatus};
use crate::settings::{Settings, SettingsPatch};
use crate::store::{Query, StorageBackend};
use crate::topic::SETTINGS_DOC_ID;
use crate::{DocumentId, Topic};

/// What `upsert_item` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum UpsertOutcome {
    /// An existing document was overwritten
    Updated { id: DocumentId },
    /// Quantity was added to a matching document
    Merged { id: DocumentId, quantity: u32 },
    /// A new document was created and read back
    Created { id: DocumentId },
}

impl UpsertOutcome {
    pub fn id(&self) -> &DocumentId {
        match self {
            UpsertOutcome::Updated { id }
            | UpsertOutcome::Merged { id, .. }
            | UpsertOutcome::Created { id } => id,
        }
    }
}

/// Result of a completed sale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleReceipt {
    pub item_id: DocumentId,
    pub item_name: String,
    pub money_type: MoneyType,
    pub realized_price: f64,
    pub profit: f64,
    /// Quantity left after the sale
    pub remaining: u32,
    pub profit_id: DocumentId,
}

/// Result of accepting a purchase request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptOutcome {
    pub request: PurchaseRequest,
    /// Stock row decremented for the request, if any had stock
    pub decremented: Option<DocumentId>,
    pub profit_id: Option<DocumentId>,
}

/// Applies mutations to the store.
pub struct WriteCoordinator {
    backend: Arc<dyn StorageBackend>,
    policy: Arc<ReconciliationPolicy>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl WriteCoordinator {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        policy: Arc<ReconciliationPolicy>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            backend,
            policy,
            clock,
            config,
        }
    }

    // ---- stock ----

    /// Create, merge or overwrite a stock row.
    ///
    /// With an id, the document is overwritten field by field. Without one,
    /// a row with the same name and money type whose prices match within the
    /// configured tolerance absorbs the quantity; otherwise a new row is
    /// created and read back before returning.
    pub async fn upsert_item(&self, draft: ItemDraft) -> Result<UpsertOutcome> {
        draft.validate()?;

        let outcome = match draft.id.clone() {
            Some(id) => self.overwrite_item(id, draft).await?,
            None => match self.find_merge_target(&draft).await? {
                Some(target) => self.merge_item(target, draft).await?,
                None => self.create_item(draft).await?,
            },
        };

        self.refresh_after_write().await;
        Ok(outcome)
    }

    async fn overwrite_item(&self, id: DocumentId, draft: ItemDraft) -> Result<UpsertOutcome> {
        let existing: Item = self
            .backend
            .get(Topic::Weapons, &id)
            .await?
            .ok_or_else(|| Error::not_found(Topic::Weapons, &id))?
            .decode();

        let item = draft.into_item(id.clone(), existing.created_at);
        self.backend
            .update(Topic::Weapons, &id, item.to_fields())
            .await?;
        tracing::info!(id = %id, name = %item.name, quantity = item.quantity, "item updated");

        self.log(
            LogEntry::new(
                LogKind::Modify,
                format!(
                    "Modified: {} ({} units, {}) - Cost: {}, Price: {}",
                    item.name,
                    item.quantity,
                    item.money_type.label(),
                    format_money(item.cost),
                    format_money(item.price)
                ),
                self.clock.now(),
            )
            .with_amount(item.price * f64::from(item.quantity)),
        )
        .await;

        Ok(UpsertOutcome::Updated { id })
    }

    async fn find_merge_target(&self, draft: &ItemDraft) -> Result<Option<Item>> {
        // Match the money type after decoding so legacy spellings still merge.
        let name = draft.name.trim();
        let candidates = self
            .backend
            .query(Topic::Weapons, &Query::new().where_eq("name", name))
            .await?;
        Ok(Item::decode_all(&candidates).into_iter().find(|item| {
            item.money_type == draft.money_type
                && item.prices_match(draft.cost, draft.price, self.config.price_tolerance)
        }))
    }

    async fn merge_item(&self, target: Item, draft: ItemDraft) -> Result<UpsertOutcome> {
        let total = self
            .adjust_quantity(&target, i64::from(draft.quantity))
            .await?;
        tracing::info!(id = %target.id, added = draft.quantity, total, "stock merged");

        self.log(
            LogEntry::new(
                LogKind::Add,
                format!(
                    "Added: {} (+{} units, {}) - Total: {} units",
                    target.name,
                    draft.quantity,
                    target.money_type.label(),
                    total
                ),
                self.clock.now(),
            )
            .with_amount(draft.price * f64::from(draft.quantity)),
        )
        .await;

        Ok(UpsertOutcome::Merged {
            id: target.id,
            quantity: total,
        })
    }

    async fn create_item(&self, draft: ItemDraft) -> Result<UpsertOutcome> {
        let item = draft.into_item(DocumentId::new(), self.clock.now());
        let id = self.backend.insert(Topic::Weapons, item.to_fields()).await?;
        self.verify_exists(Topic::Weapons, &id).await?;
        tracing::info!(id = %id, name = %item.name, quantity = item.quantity, "item created");

        self.log(
            LogEntry::new(
                LogKind::Add,
                format!(
                    "Added: {} ({} units, {}) - Cost: {}, Price: {}",
                    item.name,
                    item.quantity,
                    item.money_type.label(),
                    format_money(item.cost),
                    format_money(item.price)
                ),
                self.clock.now(),
            )
            .with_amount(item.price * f64::from(item.quantity)),
        )
        .await;

        Ok(UpsertOutcome::Created { id })
    }

    /// Read a freshly written document back, with bounded retries.
    async fn verify_exists(&self, topic: Topic, id: &str) -> Result<()> {
        let attempts = self.config.verify_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.verify_delay(attempt - 1)).await;
            }
            match self.backend.get(topic, id).await {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {
                    tracing::debug!(topic = %topic, id = %id, attempt, "write not visible yet")
                }
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        tracing::error!(topic = %topic, id = %id, attempts, "write could not be verified");
        Err(Error::VerificationFailed(match last_error {
            Some(e) => format!("{}/{} ({})", topic, id, e),
            None => format!("{}/{}", topic, id),
        }))
    }

    /// Delete a stock row after checking it exists.
    pub async fn remove_item(&self, id: &str) -> Result<Item> {
        if id.is_empty() {
            return Err(Error::not_found(Topic::Weapons, id));
        }
        let item: Item = self
            .backend
            .get(Topic::Weapons, id)
            .await?
            .ok_or_else(|| Error::not_found(Topic::Weapons, id))?
            .decode();

        self.backend.delete(Topic::Weapons, id).await?;
        tracing::info!(id = %id, name = %item.name, "item deleted");

        self.log(LogEntry::new(
            LogKind::Delete,
            format!("Deleted: {} ({} units)", item.name, item.quantity),
            self.clock.now(),
        ))
        .await;

        self.refresh_after_write().await;
        Ok(item)
    }

    /// Add `delta` units, atomically when the store allows it and with an
    /// explicit clamped overwrite otherwise. Returns the new quantity.
    ///
    /// A decrement that would go below zero is undone and reported as
    /// `StockExhausted`.
    async fn adjust_quantity(&self, item: &Item, delta: i64) -> Result<u32> {
        if self.backend.supports_increment() {
            match self
                .backend
                .increment(Topic::Weapons, &item.id, "quantity", delta as f64)
                .await
            {
                Ok(next) if next < 0.0 => {
                    if let Err(e) = self
                        .backend
                        .increment(Topic::Weapons, &item.id, "quantity", -(delta as f64))
                        .await
                    {
                        tracing::error!(id = %item.id, error = %e, "failed to undo oversell");
                    }
                    return Err(Error::StockExhausted(item.id.clone()));
                }
                Ok(next) => return Ok(next.min(u32::MAX as f64) as u32),
                Err(e @ Error::NotFound(_)) | Err(e @ Error::PermissionDenied(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(id = %item.id, error = %e, "increment failed, overwriting quantity")
                }
            }
        }

        let next = (i64::from(item.quantity) + delta).clamp(0, i64::from(u32::MAX)) as u32;
        self.backend
            .update(
                Topic::Weapons,
                &item.id,
                object(json!({ "quantity": next })),
            )
            .await?;
        Ok(next)
    }

    // ---- sales ----

    /// Sell one unit of `item_id` at `realized_price`.
    ///
    /// The quantity is re-read from the store; at zero nothing is written.
    /// The decrement happens before the profit record is appended.
    pub async fn record_sale(&self, item_id: &str, realized_price: f64) -> Result<SaleReceipt> {
        check_amount("sale price", realized_price)?;

        let item: Item = self
            .backend
            .get(Topic::Weapons, item_id)
            .await?
            .ok_or_else(|| Error::not_found(Topic::Weapons, item_id))?
            .decode();
        if !item.is_in_stock() {
            tracing::info!(id = %item_id, "sale refused, no stock left");
            return Err(Error::StockExhausted(item.id));
        }

        let remaining = self.adjust_quantity(&item, -1).await?;

        let now = self.clock.now();
        let record = ProfitRecord::new(&item.name, item.cost, realized_price, item.money_type, now);
        let profit_id = self
            .backend
            .insert(Topic::Profits, record.to_fields())
            .await?;
        tracing::info!(
            id = %item.id,
            name = %item.name,
            price = realized_price,
            profit = record.profit,
            remaining,
            "sale recorded"
        );

        let verdict = if record.profit >= 0.0 { "Profit" } else { "Loss" };
        self.log(
            LogEntry::new(
                LogKind::Sale,
                format!(
                    "Sale: {} ({}) - Realized: {} (suggested: {}), {}: {}",
                    item.name,
                    item.money_type.label(),
                    format_money(realized_price),
                    format_money(item.price),
                    verdict,
                    format_money(record.profit.abs())
                ),
                now,
            )
            .with_amount(record.profit)
            .with_money_type(item.money_type),
        )
        .await;

        self.refresh_after_write().await;
        Ok(SaleReceipt {
            item_id: item.id,
            item_name: item.name,
            money_type: item.money_type,
            realized_price,
            profit: record.profit,
            remaining,
            profit_id,
        })
    }

    /// First row with this name and money type that still has stock.
    pub async fn find_sellable(&self, name: &str, money_type: MoneyType) -> Result<Option<Item>> {
        let query = Query::new().where_eq("name", name).where_gt("quantity", 0);
        let candidates = self.backend.query(Topic::Weapons, &query).await?;
        Ok(Item::decode_all(&candidates)
            .into_iter()
            .find(|item| item.money_type == money_type && item.is_in_stock()))
    }

    /// Sell one unit from a listing, picking any row with stock.
    pub async fn sell_listing(
        &self,
        name: &str,
        money_type: MoneyType,
        realized_price: f64,
    ) -> Result<SaleReceipt> {
        check_amount("sale price", realized_price)?;
        match self.find_sellable(name, money_type).await? {
            Some(item) => self.record_sale(&item.id, realized_price).await,
            None => Err(Error::StockExhausted(format!(
                "{} ({})",
                name,
                money_type.as_str()
            ))),
        }
    }

    // ---- audit log and profits ----

    /// Append an audit entry.
    pub async fn append_log(
        &self,
        kind: LogKind,
        message: impl Into<String>,
        amount: f64,
        money_type: Option<MoneyType>,
    ) -> Result<DocumentId> {
        let mut entry = LogEntry::new(kind, message, self.clock.now()).with_amount(amount);
        entry.money_type = money_type;
        self.backend.insert(Topic::Logs, entry.to_fields()).await
    }

    async fn log(&self, entry: LogEntry) {
        if let Err(e) = self.backend.insert(Topic::Logs, entry.to_fields()).await {
            tracing::warn!(kind = entry.kind.as_str(), error = %e, "audit log append failed");
        }
    }

    /// Delete every log entry, then record that it happened.
    pub async fn clear_logs(&self) -> Result<usize> {
        let ids = self.ids_of(Topic::Logs).await?;
        let deleted = self.backend.batch_delete(Topic::Logs, &ids).await?;
        tracing::info!(deleted, "logs cleared");

        self.log(LogEntry::new(
            LogKind::System,
            "All logs cleared",
            self.clock.now(),
        ))
        .await;
        self.refresh_after_write().await;
        Ok(deleted)
    }

    /// Delete every profit record; returns how many were removed.
    pub async fn reset_profits(&self) -> Result<usize> {
        let ids = self.ids_of(Topic::Profits).await?;
        let deleted = self.backend.batch_delete(Topic::Profits, &ids).await?;
        tracing::info!(deleted, "profits reset");

        self.log(LogEntry::new(
            LogKind::System,
            format!("Profits reset - {} sale(s) removed", deleted),
            self.clock.now(),
        ))
        .await;
        self.refresh_after_write().await;
        Ok(deleted)
    }

    async fn ids_of(&self, topic: Topic) -> Result<Vec<DocumentId>> {
        Ok(self
            .backend
            .list(topic)
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect())
    }

    // ---- purchase requests ----

    /// Store a buyer's request. Refused while sales are disabled.
    pub async fn submit_purchase_request(
        &self,
        draft: PurchaseRequestDraft,
    ) -> Result<PurchaseRequest> {
        draft.requested_price()?;
        if !self.policy.settings().await?.sales_enabled {
            return Err(Error::SalesDisabled);
        }

        let mut request = draft.into_request(self.clock.now())?;
        request.id = self
            .backend
            .insert(Topic::PurchaseRequests, request.to_fields())
            .await?;
        tracing::info!(
            id = %request.id,
            item = %request.item_name,
            price = request.requested_price,
            "purchase request submitted"
        );

        self.refresh_after_write().await;
        Ok(request)
    }

    async fn pending_request(&self, id: &str, next: RequestStatus) -> Result<PurchaseRequest> {
        let request: PurchaseRequest = self
            .backend
            .get(Topic::PurchaseRequests, id)
            .await?
            .ok_or_else(|| Error::not_found(Topic::PurchaseRequests, id))?
            .decode();
        request.status.transition(id, next)?;
        Ok(request)
    }

    async fn close_request(&self, request: &mut PurchaseRequest, status: RequestStatus) -> Result<()> {
        let now = self.clock.now();
        self.backend
            .update(
                Topic::PurchaseRequests,
                &request.id,
                object(json!({ "status": status, "processedAt": now })),
            )
            .await?;
        request.status = status;
        request.processed_at = Some(now);
        Ok(())
    }

    /// Accept a pending request.
    ///
    /// The request is closed first. If a matching row still has stock, one
    /// unit is taken from it and a profit of `requested - base` is recorded.
    pub async fn accept_request(&self, id: &str) -> Result<AcceptOutcome> {
        let mut request = self.pending_request(id, RequestStatus::Accepted).await?;
        self.close_request(&mut request, RequestStatus::Accepted)
            .await?;

        let mut decremented = None;
        let mut profit_id = None;
        if let Some(item) = self
            .find_sellable(&request.item_name, request.money_type)
            .await?
        {
            match self.adjust_quantity(&item, -1).await {
                Ok(_) => {
                    let record = ProfitRecord::new(
                        &request.item_name,
                        request.base_price,
                        request.requested_price,
                        request.money_type,
                        self.clock.now(),
                    )
                    .from_request();
                    profit_id = Some(
                        self.backend
                            .insert(Topic::Profits, record.to_fields())
                            .await?,
                    );
                    decremented = Some(item.id);
                }
                Err(Error::StockExhausted(_)) => {
                    tracing::warn!(id = %id, "stock ran out while accepting request")
                }
                Err(e) => return Err(e),
            }
        } else {
            tracing::warn!(id = %id, item = %request.item_name, "accepted request has no stock to take");
        }

        self.log(LogEntry::new(
            LogKind::System,
            format!(
                "Request accepted: {} - {} (IG: {}) - {}",
                request.item_name,
                request.buyer_name,
                request.buyer_id,
                format_money(request.requested_price)
            ),
            self.clock.now(),
        ))
        .await;
        tracing::info!(id = %id, decremented = decremented.is_some(), "purchase request accepted");

        self.refresh_after_write().await;
        Ok(AcceptOutcome {
            request,
            decremented,
            profit_id,
        })
    }

    /// Reject a pending request.
    pub async fn reject_request(&self, id: &str) -> Result<PurchaseRequest> {
        let mut request = self.pending_request(id, RequestStatus::Rejected).await?;
        self.close_request(&mut request, RequestStatus::Rejected)
            .await?;

        self.log(LogEntry::new(
            LogKind::System,
            format!(
                "Request rejected: {} - {}",
                request.item_name, request.buyer_name
            ),
            self.clock.now(),
        ))
        .await;
        tracing::info!(id = %id, "purchase request rejected");

        self.refresh_after_write().await;
        Ok(request)
    }

    // ---- settings ----

    /// Read the settings singleton, creating it with defaults if missing.
    pub async fn ensure_settings(&self) -> Result<Settings> {
        match self.backend.get(Topic::Settings, SETTINGS_DOC_ID).await? {
            Some(doc) => Ok(doc.decode()),
            None => {
                let defaults = Settings::default();
                self.backend
                    .set(Topic::Settings, SETTINGS_DOC_ID, defaults.to_fields())
                    .await?;
                tracing::info!("settings created with defaults");
                Ok(defaults)
            }
        }
    }

    /// Merge `patch` into the settings and return the result.
    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let mut settings = self.ensure_settings().await?;
        if patch.is_empty() {
            return Ok(settings);
        }
        self.backend
            .update(Topic::Settings, SETTINGS_DOC_ID, patch.to_fields())
            .await?;
        patch.apply(&mut settings);
        tracing::info!(sales_enabled = settings.sales_enabled, "settings updated");

        self.refresh_after_write().await;
        Ok(settings)
    }

    /// The write already succeeded; a failed refresh only leaves the mirror
    /// behind until the next notification.
    async fn refresh_after_write(&self) {
        if let Err(e) = self.policy.refresh().await {
            tracing::warn!(error = %e, "refresh after write failed");
        }
    }
}

impl std::fmt::Debug for WriteCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("config", &self.config)
            .finish()
    }
}
