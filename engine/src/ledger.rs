//! Append-only ledgers: the audit log and realized profits.

use crate::record::{
    bool_field, number_field, object, string_field, timestamp_field, Document, Fields, MoneyType,
    Record,
};
use crate::{DocumentId, Timestamp, Topic};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    #[serde(alias = "ajout")]
    Add,
    #[serde(alias = "modification")]
    Modify,
    #[serde(alias = "suppression")]
    Delete,
    #[serde(alias = "vente")]
    Sale,
    #[serde(alias = "connexion")]
    Login,
    #[serde(alias = "deconnexion")]
    Logout,
    #[default]
    System,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Add => "add",
            LogKind::Modify => "modify",
            LogKind::Delete => "delete",
            LogKind::Sale => "sale",
            LogKind::Login => "login",
            LogKind::Logout => "logout",
            LogKind::System => "system",
        }
    }
}

/// One audit trail line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Empty until the store assigns one
    pub id: DocumentId,
    pub kind: LogKind,
    pub message: String,
    /// Signed monetary amount attached to the entry
    pub amount: f64,
    pub money_type: Option<MoneyType>,
    pub timestamp: Timestamp,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            id: DocumentId::new(),
            kind,
            message: message.into(),
            amount: 0.0,
            money_type: None,
            timestamp,
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_money_type(mut self, money_type: MoneyType) -> Self {
        self.money_type = Some(money_type);
        self
    }
}

impl Record for LogEntry {
    const TOPIC: Topic = Topic::Logs;

    fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        Self {
            id: doc.id.clone(),
            kind: f
                .get("type")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            message: string_field(f, "message"),
            amount: number_field(f, "amount").unwrap_or(0.0),
            money_type: MoneyType::from_optional_field(f.get("moneyType")),
            timestamp: timestamp_field(f, "timestamp").unwrap_or(0),
        }
    }

    fn to_fields(&self) -> Fields {
        object(json!({
            "type": self.kind,
            "message": self.message,
            "amount": self.amount,
            "moneyType": self.money_type.map(|m| Value::from(m.as_str())).unwrap_or(Value::Null),
            "timestamp": self.timestamp,
        }))
    }
}

/// A realized sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitRecord {
    /// Empty until the store assigns one
    pub id: DocumentId,
    pub item_name: String,
    pub cost: f64,
    pub sale_price: f64,
    /// `sale_price - cost`, may be negative
    pub profit: f64,
    pub money_type: MoneyType,
    /// Produced by accepting a purchase request
    pub from_request: bool,
    pub timestamp: Timestamp,
}

impl ProfitRecord {
    pub fn new(
        item_name: impl Into<String>,
        cost: f64,
        sale_price: f64,
        money_type: MoneyType,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            item_name: item_name.into(),
            cost,
            sale_price,
            profit: sale_price - cost,
            money_type,
            from_request: false,
            timestamp,
        }
    }

    pub fn from_request(mut self) -> Self {
        self.from_request = true;
        self
    }
}

impl Record for ProfitRecord {
    const TOPIC: Topic = Topic::Profits;

    fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        let cost = number_field(f, "purchasePrice").unwrap_or(0.0);
        let sale_price = number_field(f, "salePrice").unwrap_or(0.0);
        Self {
            id: doc.id.clone(),
            item_name: string_field(f, "weaponName"),
            cost,
            sale_price,
            profit: number_field(f, "profit").unwrap_or(sale_price - cost),
            money_type: MoneyType::from_field(f.get("moneyType")),
            from_request: bool_field(f, "fromRequest").unwrap_or(false),
            timestamp: timestamp_field(f, "timestamp").unwrap_or(0),
        }
    }

    fn to_fields(&self) -> Fields {
        object(json!({
            "weaponName": self.item_name,
            "purchasePrice": self.cost,
            "salePrice": self.sale_price,
            "profit": self.profit,
            "moneyType": self.money_type,
            "fromRequest": self.from_request,
            "timestamp": self.timestamp,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_log_kinds_decode() {
        let doc = Document::from_value(
            "l1",
            json!({"type": "vente", "message": "m", "amount": "12", "moneyType": "sale"}),
        )
        .unwrap();
        let entry: LogEntry = doc.decode();
        assert_eq!(entry.kind, LogKind::Sale);
        assert_eq!(entry.amount, 12.0);
        assert_eq!(entry.money_type, Some(MoneyType::Dirty));
    }

    #[test]
    fn unknown_log_kind_is_system() {
        let doc = Document::from_value("l1", json!({"type": "weird", "moneyType": null})).unwrap();
        let entry: LogEntry = doc.decode();
        assert_eq!(entry.kind, LogKind::System);
        assert_eq!(entry.money_type, None);
        assert_eq!(entry.amount, 0.0);
    }

    #[test]
    fn log_fields_roundtrip() {
        let entry = LogEntry::new(LogKind::Add, "Added Pistol", 42)
            .with_amount(300.0)
            .with_money_type(MoneyType::Clean);
        let fields = entry.to_fields();
        assert_eq!(fields["type"], json!("add"));
        let back: LogEntry = Document::new("", fields).decode();
        assert_eq!(back, entry);
    }

    #[test]
    fn profit_may_be_negative() {
        let record = ProfitRecord::new("Pistol", 1000.0, 800.0, MoneyType::Dirty, 1);
        assert_eq!(record.profit, -200.0);
        assert!(!record.from_request);
        assert!(record.clone().from_request().from_request);
    }

    #[test]
    fn profit_defaults_to_difference_when_missing() {
        let doc = Document::from_value(
            "p1",
            json!({"weaponName": "SMG", "purchasePrice": 100, "salePrice": 250}),
        )
        .unwrap();
        let record: ProfitRecord = doc.decode();
        assert_eq!(record.profit, 150.0);
        assert_eq!(record.money_type, MoneyType::Clean);
    }
}
