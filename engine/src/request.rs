//! Buyer purchase requests and their one-way status machine.

use crate::error::{Error, Result};
use crate::record::{
    number_field, object, parse_amount, string_field, timestamp_field, typed_field, Document, Fields,
    MoneyType, Record,
};
use crate::{DocumentId, Timestamp, Topic};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Request lifecycle. `Pending` moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Validate a transition to `next`.
    pub fn transition(self, id: &str, next: RequestStatus) -> Result<RequestStatus> {
        if self.is_terminal() || !next.is_terminal() {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                status: self.to_string(),
            });
        }
        Ok(next)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the buyer takes the listed price or proposes their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceMode {
    #[default]
    Base,
    Custom,
}

/// A stored purchase request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub id: DocumentId,
    pub item_name: String,
    pub money_type: MoneyType,
    pub base_price: f64,
    pub requested_price: f64,
    pub price_mode: PriceMode,
    pub buyer_name: String,
    /// In-game identifier of the buyer
    pub buyer_id: String,
    pub timestamp: Timestamp,
    pub status: RequestStatus,
    pub processed_at: Option<Timestamp>,
}

impl PurchaseRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Margin the shop makes if the request is accepted.
    pub fn margin(&self) -> f64 {
        self.requested_price - self.base_price
    }
}

impl Record for PurchaseRequest {
    const TOPIC: Topic = Topic::PurchaseRequests;

    fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        let base_price = number_field(f, "basePrice").unwrap_or(0.0);
        Self {
            id: doc.id.clone(),
            item_name: string_field(f, "weaponName"),
            money_type: MoneyType::from_field(f.get("weaponMoneyType")),
            base_price,
            requested_price: number_field(f, "requestedPrice").unwrap_or(base_price),
            price_mode: typed_field(f, "priceType").unwrap_or_default(),
            buyer_name: string_field(f, "buyerName"),
            buyer_id: string_field(f, "buyerIG"),
            timestamp: timestamp_field(f, "timestamp").unwrap_or(0),
            status: typed_field(f, "status").unwrap_or_default(),
            processed_at: timestamp_field(f, "processedAt"),
        }
    }

    fn to_fields(&self) -> Fields {
        object(json!({
            "weaponName": self.item_name,
            "weaponMoneyType": self.money_type,
            "basePrice": self.base_price,
            "requestedPrice": self.requested_price,
            "priceType": self.price_mode,
            "buyerName": self.buyer_name,
            "buyerIG": self.buyer_id,
            "timestamp": self.timestamp,
            "status": self.status,
            "processedAt": self.processed_at.map(Value::from).unwrap_or(Value::Null),
        }))
    }
}

/// Buyer form input for a new request.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRequestDraft {
    pub item_name: String,
    pub money_type: MoneyType,
    pub base_price: f64,
    pub price_mode: PriceMode,
    /// Raw custom price as typed; only read in custom mode
    pub custom_price: Option<String>,
    pub buyer_name: String,
    pub buyer_id: String,
}

impl PurchaseRequestDraft {
    /// A request at the listed price.
    pub fn at_base_price(
        item_name: impl Into<String>,
        money_type: MoneyType,
        base_price: f64,
        buyer_name: impl Into<String>,
        buyer_id: impl Into<String>,
    ) -> Self {
        Self {
            item_name: item_name.into(),
            money_type,
            base_price,
            price_mode: PriceMode::Base,
            custom_price: None,
            buyer_name: buyer_name.into(),
            buyer_id: buyer_id.into(),
        }
    }

    /// Switch to a buyer-proposed price.
    pub fn with_custom_price(mut self, raw: impl Into<String>) -> Self {
        self.price_mode = PriceMode::Custom;
        self.custom_price = Some(raw.into());
        self
    }

    /// Validate and compute the price actually requested.
    pub fn requested_price(&self) -> Result<f64> {
        if self.buyer_name.trim().is_empty() || self.buyer_id.trim().is_empty() {
            return Err(Error::ValidationFailed(
                "buyer name and in-game id are required".to_string(),
            ));
        }
        if self.item_name.trim().is_empty() {
            return Err(Error::ValidationFailed("item name is required".to_string()));
        }
        match self.price_mode {
            PriceMode::Base => Ok(self.base_price),
            PriceMode::Custom => {
                let raw = self.custom_price.as_deref().unwrap_or_default();
                parse_amount("custom price", raw)
            }
        }
    }

    /// Build the pending record to store.
    pub fn into_request(self, timestamp: Timestamp) -> Result<PurchaseRequest> {
        let requested_price = self.requested_price()?;
        Ok(PurchaseRequest {
            id: DocumentId::new(),
            item_name: self.item_name.trim().to_string(),
            money_type: self.money_type,
            base_price: self.base_price,
            requested_price,
            price_mode: self.price_mode,
            buyer_name: self.buyer_name.trim().to_string(),
            buyer_id: self.buyer_id.trim().to_string(),
            timestamp,
            status: RequestStatus::Pending,
            processed_at: None,
        })
    }
}
