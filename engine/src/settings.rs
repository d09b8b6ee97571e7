//! Shop settings singleton.

use crate::record::{bool_field, object, string_field, Document, Fields, Record};
use crate::Topic;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Shop-wide switches, stored as `settings/appSettings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub notifications_enabled: bool,
    /// Buyers may submit purchase requests
    pub sales_enabled: bool,
    pub info_bubble_enabled: bool,
    pub info_text: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notifications_enabled: false,
            sales_enabled: true,
            info_bubble_enabled: false,
            info_text: String::new(),
        }
    }
}

impl Record for Settings {
    const TOPIC: Topic = Topic::Settings;

    fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        Self {
            notifications_enabled: bool_field(f, "notifications").unwrap_or(false),
            // Only an explicit false disables sales.
            sales_enabled: bool_field(f, "salesEnabled").unwrap_or(true),
            info_bubble_enabled: bool_field(f, "infoBubble").unwrap_or(false),
            info_text: string_field(f, "infoText"),
        }
    }

    fn to_fields(&self) -> Fields {
        object(json!({
            "notifications": self.notifications_enabled,
            "salesEnabled": self.sales_enabled,
            "infoBubble": self.info_bubble_enabled,
            "infoText": self.info_text,
        }))
    }
}

/// Partial settings update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub notifications_enabled: Option<bool>,
    pub sales_enabled: Option<bool>,
    pub info_bubble_enabled: Option<bool>,
    pub info_text: Option<String>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.notifications_enabled.is_none()
            && self.sales_enabled.is_none()
            && self.info_bubble_enabled.is_none()
            && self.info_text.is_none()
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        if let Some(v) = self.notifications_enabled {
            fields.insert("notifications".into(), Value::Bool(v));
        }
        if let Some(v) = self.sales_enabled {
            fields.insert("salesEnabled".into(), Value::Bool(v));
        }
        if let Some(v) = self.info_bubble_enabled {
            fields.insert("infoBubble".into(), Value::Bool(v));
        }
        if let Some(v) = &self.info_text {
            fields.insert("infoText".into(), Value::String(v.clone()));
        }
        fields
    }

    /// Apply to an in-memory copy.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(v) = self.notifications_enabled {
            settings.notifications_enabled = v;
        }
        if let Some(v) = self.sales_enabled {
            settings.sales_enabled = v;
        }
        if let Some(v) = self.info_bubble_enabled {
            settings.info_bubble_enabled = v;
        }
        if let Some(v) = &self.info_text {
            settings.info_text = v.clone();
        }
    }
}
