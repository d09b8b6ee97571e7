//! Derived views: pure projections of mirror and ledger snapshots.

use serde::Serialize;

use crate::format::format_compact;
use crate::ledger::ProfitRecord;
use crate::record::{Item, MoneyType};
use crate::request::PurchaseRequest;
use crate::DocumentId;

/// One stock row inside a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingInstance {
    pub id: DocumentId,
    pub quantity: u32,
}

/// Items sharing a name and money type, shown as one card.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub name: String,
    pub money_type: MoneyType,
    /// Prices of the first row in the group
    pub cost: f64,
    pub price: f64,
    pub total_quantity: u64,
    pub instances: Vec<ListingInstance>,
}

impl Listing {
    pub fn key(&self) -> (&str, MoneyType) {
        (&self.name, self.money_type)
    }

    pub fn is_in_stock(&self) -> bool {
        self.total_quantity > 0
    }

    /// First row that still has stock.
    pub fn sellable_instance(&self) -> Option<&ListingInstance> {
        self.instances.iter().find(|i| i.quantity > 0)
    }

    pub fn compact_price(&self) -> String {
        format_compact(self.price)
    }
}

/// Group items by (name, money type), in order of first appearance.
///
/// With `include_empty` false, zero-quantity rows are left out entirely, so
/// a group whose rows are all empty disappears.
pub fn group_listings(items: &[Item], include_empty: bool) -> Vec<Listing> {
    let mut listings: Vec<Listing> = Vec::new();
    for item in items {
        if !include_empty && !item.is_in_stock() {
            continue;
        }
        let instance = ListingInstance {
            id: item.id.clone(),
            quantity: item.quantity,
        };
        match listings
            .iter_mut()
            .find(|l| l.name == item.name && l.money_type == item.money_type)
        {
            Some(listing) => {
                listing.total_quantity += u64::from(item.quantity);
                listing.instances.push(instance);
            }
            None => listings.push(Listing {
                name: item.name.clone(),
                money_type: item.money_type,
                cost: item.cost,
                price: item.price,
                total_quantity: u64::from(item.quantity),
                instances: vec![instance],
            }),
        }
    }
    listings
}

/// What buyers see: in-stock groups only.
pub fn buyer_listings(items: &[Item]) -> Vec<Listing> {
    group_listings(items, false)
}

/// What the admin sees: every group, empty ones included.
pub fn admin_listings(items: &[Item]) -> Vec<Listing> {
    group_listings(items, true)
}

/// Stock statistics over the buyer listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryTotals {
    pub units: u64,
    /// Sum of price × quantity
    pub value: f64,
    pub listings: usize,
}

pub fn inventory_totals(items: &[Item]) -> InventoryTotals {
    buyer_listings(items)
        .iter()
        .fold(InventoryTotals::default(), |acc, l| InventoryTotals {
            units: acc.units + l.total_quantity,
            value: acc.value + l.price * l.total_quantity as f64,
            listings: acc.listings + 1,
        })
}

/// Realized profit, split by money type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitTotals {
    pub total: f64,
    pub clean: f64,
    pub dirty: f64,
    pub sales: usize,
}

pub fn profit_totals(records: &[ProfitRecord]) -> ProfitTotals {
    records.iter().fold(ProfitTotals::default(), |mut acc, r| {
        acc.total += r.profit;
        match r.money_type {
            MoneyType::Clean => acc.clean += r.profit,
            MoneyType::Dirty => acc.dirty += r.profit,
        }
        acc.sales += 1;
        acc
    })
}

/// Requests still awaiting a decision, newest first.
pub fn pending_requests(requests: &[PurchaseRequest]) -> Vec<PurchaseRequest> {
    let mut pending: Vec<PurchaseRequest> =
        requests.iter().filter(|r| r.is_pending()).cloned().collect();
    pending.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    pending
}
