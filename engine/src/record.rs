//! Record types: raw store documents and the weapon stock item.
//!
//! Everything travels through the store as a [`Document`]: an opaque id plus
//! a JSON object of camelCase fields. Typed records decode leniently, the way
//! data written by older clients has to be read: numeric strings are accepted,
//! missing numbers decode as zero and unknown money types fall back to clean.

use crate::{error::Result, DocumentId, Error, Timestamp, Topic};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Field map of a stored document.
pub type Fields = Map<String, Value>;

/// A raw document as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned identifier, stable for the document's lifetime
    pub id: DocumentId,
    /// Document body
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a document from a JSON value, rejecting anything but an object.
    pub fn from_value(id: impl Into<DocumentId>, value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self::new(id, fields)),
            other => Err(Error::Protocol(format!(
                "document body must be an object, got {}",
                other
            ))),
        }
    }

    /// Decode into a typed record.
    pub fn decode<R: Record>(&self) -> R {
        R::from_document(self)
    }
}

/// A typed view over documents of one topic.
pub trait Record: Sized {
    /// Topic the record lives in.
    const TOPIC: Topic;

    /// Decode a stored document. Never fails; absent fields take defaults.
    fn from_document(doc: &Document) -> Self;

    /// Encode the record body (without the id).
    fn to_fields(&self) -> Fields;

    /// Decode a whole snapshot, preserving order.
    fn decode_all(docs: &[Document]) -> Vec<Self> {
        docs.iter().map(Self::from_document).collect()
    }
}

/// Unwrap a `json!` object literal into a field map.
pub(crate) fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Read a number that may have been stored as a string (`"150 000"` included).
pub(crate) fn number_field(fields: &Fields, key: &str) -> Option<f64> {
    match fields.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
    .filter(|n| n.is_finite())
}

pub(crate) fn string_field(fields: &Fields, key: &str) -> String {
    match fields.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Deserialize a field into any serde type, `None` when absent or malformed.
pub(crate) fn typed_field<T>(fields: &Fields, key: &str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    fields
        .get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

pub(crate) fn bool_field(fields: &Fields, key: &str) -> Option<bool> {
    fields.get(key).and_then(Value::as_bool)
}

/// Milliseconds since epoch; RFC 3339 strings are accepted as well.
pub(crate) fn timestamp_field(fields: &Fields, key: &str) -> Option<Timestamp> {
    match fields.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis().max(0) as u64),
        _ => None,
    }
}

/// Classification of the money an item is bought and sold with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoneyType {
    /// Clean money (default)
    #[default]
    #[serde(alias = "propre")]
    Clean,
    /// Dirty money
    #[serde(alias = "sale")]
    Dirty,
}

impl MoneyType {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            MoneyType::Clean => "clean",
            MoneyType::Dirty => "dirty",
        }
    }

    /// Human-readable label used in audit messages.
    pub fn label(&self) -> &'static str {
        match self {
            MoneyType::Clean => "clean money",
            MoneyType::Dirty => "dirty money",
        }
    }

    /// Lenient decode: anything unrecognised is clean.
    pub(crate) fn from_field(value: Option<&Value>) -> Self {
        value
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub(crate) fn from_optional_field(value: Option<&Value>) -> Option<Self> {
        match value {
            None | Some(Value::Null) => None,
            Some(v) => Some(Self::from_field(Some(v))),
        }
    }
}

/// A weapon stock row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Store-assigned identity
    pub id: DocumentId,
    /// Display name
    pub name: String,
    /// Purchase cost per unit
    pub cost: f64,
    /// Suggested sale price per unit
    pub price: f64,
    /// Units in stock
    pub quantity: u32,
    /// Money classification
    pub money_type: MoneyType,
    /// Creation time (milliseconds since epoch)
    pub created_at: Timestamp,
}

impl Item {
    /// Whether the item can be shown to buyers.
    pub fn is_in_stock(&self) -> bool {
        self.quantity > 0
    }

    /// Whether cost and price both match within `tolerance`.
    pub fn prices_match(&self, cost: f64, price: f64, tolerance: f64) -> bool {
        within(self.cost, cost, tolerance) && within(self.price, price, tolerance)
    }

    /// Margin per unit at the suggested price.
    pub fn unit_margin(&self) -> f64 {
        self.price - self.cost
    }
}

impl Record for Item {
    const TOPIC: Topic = Topic::Weapons;

    fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        let quantity = number_field(f, "quantity").unwrap_or(0.0);
        Self {
            id: doc.id.clone(),
            name: string_field(f, "name"),
            cost: number_field(f, "purchasePrice").unwrap_or(0.0),
            price: number_field(f, "salePrice").unwrap_or(0.0),
            // Truncated like an integer parse; negatives never reach the mirror.
            quantity: quantity.max(0.0).min(u32::MAX as f64) as u32,
            money_type: MoneyType::from_field(f.get("moneyType")),
            created_at: timestamp_field(f, "dateAdded").unwrap_or(0),
        }
    }

    fn to_fields(&self) -> Fields {
        object(json!({
            "name": self.name,
            "purchasePrice": self.cost,
            "salePrice": self.price,
            "quantity": self.quantity,
            "moneyType": self.money_type,
            "dateAdded": self.created_at,
        }))
    }
}

/// A candidate item coming from the admin form.
///
/// Without an id it is an addition (merged into an existing row when the
/// name, money type and prices match); with an id it overwrites that row.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDraft {
    pub id: Option<DocumentId>,
    pub name: String,
    pub cost: f64,
    pub price: f64,
    pub quantity: u32,
    pub money_type: MoneyType,
}

impl ItemDraft {
    pub fn new(
        name: impl Into<String>,
        cost: f64,
        price: f64,
        quantity: u32,
        money_type: MoneyType,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            cost,
            price,
            quantity,
            money_type,
        }
    }

    /// Target an existing document.
    pub fn with_id(mut self, id: impl Into<DocumentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parse raw form input. Whitespace inside numbers is ignored, so
    /// `"150 000"` reads as 150000.
    pub fn parse(
        name: &str,
        cost: &str,
        price: &str,
        quantity: &str,
        money_type: MoneyType,
    ) -> Result<Self> {
        let cost = parse_amount("purchase cost", cost)?;
        let price = parse_amount("sale price", price)?;
        let raw_qty = strip_spaces(quantity);
        let quantity: i64 = raw_qty.parse().map_err(|_| {
            Error::ValidationFailed(format!("quantity must be an integer, got '{}'", quantity))
        })?;
        if quantity < 0 {
            return Err(Error::ValidationFailed(
                "quantity must not be negative".to_string(),
            ));
        }
        let quantity = u32::try_from(quantity)
            .map_err(|_| Error::ValidationFailed("quantity too large".to_string()))?;

        let draft = Self::new(name.trim(), cost, price, quantity, money_type);
        draft.validate()?;
        Ok(draft)
    }

    /// Check the draft before any remote call is made.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::ValidationFailed("name must not be empty".to_string()));
        }
        check_amount("purchase cost", self.cost)?;
        check_amount("sale price", self.price)?;
        if self.id.is_none() && self.quantity == 0 {
            return Err(Error::ValidationFailed(
                "quantity must be at least 1 when adding stock".to_string(),
            ));
        }
        if matches!(&self.id, Some(id) if id.is_empty()) {
            return Err(Error::ValidationFailed("empty item id".to_string()));
        }
        Ok(())
    }

    /// Materialise as an item with the given identity and creation time.
    pub fn into_item(self, id: DocumentId, created_at: Timestamp) -> Item {
        Item {
            id,
            name: self.name.trim().to_string(),
            cost: self.cost,
            price: self.price,
            quantity: self.quantity,
            money_type: self.money_type,
            created_at,
        }
    }
}

/// Absolute difference at most `tolerance`, with slack for binary rounding so
/// that `100.0` and `100.01` sit on the boundary rather than just past it.
fn within(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance + 1e-9
}

pub(crate) fn strip_spaces(input: &str) -> String {
    input.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Parse a non-negative monetary amount from user input.
pub fn parse_amount(what: &str, input: &str) -> Result<f64> {
    let raw = strip_spaces(input);
    let value: f64 = raw
        .parse()
        .map_err(|_| Error::ValidationFailed(format!("{} must be a number, got '{}'", what, input)))?;
    check_amount(what, value)?;
    Ok(value)
}

pub(crate) fn check_amount(what: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::ValidationFailed(format!("{} must be finite", what)));
    }
    if value < 0.0 {
        return Err(Error::ValidationFailed(format!(
            "{} must not be negative",
            what
        )));
    }
    Ok(())
}
