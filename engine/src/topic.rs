//! Topics: the named remote collections that deliver change notifications.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Document id of the settings singleton inside the `settings` collection.
pub const SETTINGS_DOC_ID: &str = "appSettings";

/// A remote collection (or singleton document) subject to change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "weapons")]
    Weapons,
    #[serde(rename = "logs")]
    Logs,
    #[serde(rename = "profits")]
    Profits,
    #[serde(rename = "settings")]
    Settings,
    #[serde(rename = "purchaseRequests")]
    PurchaseRequests,
}

impl Topic {
    /// Every topic, in subscription order.
    pub const ALL: [Topic; 5] = [
        Topic::Weapons,
        Topic::Logs,
        Topic::Profits,
        Topic::Settings,
        Topic::PurchaseRequests,
    ];

    /// Collection name in the remote store.
    pub fn collection(&self) -> &'static str {
        match self {
            Topic::Weapons => "weapons",
            Topic::Logs => "logs",
            Topic::Profits => "profits",
            Topic::Settings => "settings",
            Topic::PurchaseRequests => "purchaseRequests",
        }
    }

    /// Whether the topic is a single document rather than a collection.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Topic::Settings)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for Topic {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.collection() == s)
            .ok_or_else(|| crate::Error::NotFound(format!("unknown collection: {}", s)))
    }
}
