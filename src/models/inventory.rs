use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

/// One formulary line held by a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub id: i64,
    pub campaign_id: i64,
    pub category: Option<String>,
    pub medication: String,
    pub form: String,
    pub strength: Option<String>,
    pub count: i64,
    pub quantity: i64,
    pub initial_quantity: i64,
    pub item_number: Option<String>,
    pub box_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub manufacturer: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryEntry {
    /// Same medication, form and strength, compared without regard to case.
    pub fn matches(&self, other: &NewInventoryEntry) -> bool {
        fn same(a: &str, b: &str) -> bool {
            a.trim().eq_ignore_ascii_case(b.trim())
        }
        same(&self.medication, &other.medication)
            && same(&self.form, &other.form)
            && same(
                self.strength.as_deref().unwrap_or(""),
                other.strength.as_deref().unwrap_or(""),
            )
    }

    /// Receive `amount` more units; the initial stock grows with it.
    pub fn restock(&mut self, amount: i64) {
        self.quantity = self.quantity.saturating_add(amount);
        self.initial_quantity = self.initial_quantity.saturating_add(amount);
    }

    /// Take `amount` units out.
    ///
    /// When either level would not stay above zero the entry is emptied, both
    /// levels going to zero together.
    pub fn dispense(&mut self, amount: i64) {
        if self.quantity > amount && self.initial_quantity > amount {
            self.quantity -= amount;
            self.initial_quantity -= amount;
        } else {
            self.quantity = 0;
            self.initial_quantity = 0;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct NewInventoryEntry {
    #[validate(length(max = 60))]
    pub category: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub medication: String,
    #[validate(length(min = 1, max = 60))]
    pub form: String,
    #[validate(length(max = 25))]
    pub strength: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub count: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub quantity: i64,
    /// Stock on arrival; defaults to `quantity`.
    #[validate(range(min = 0))]
    pub initial_quantity: Option<i64>,
    #[validate(length(max = 25))]
    pub item_number: Option<String>,
    #[validate(length(max = 25))]
    pub box_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    #[validate(length(max = 100))]
    pub manufacturer: Option<String>,
}

impl NewInventoryEntry {
    pub fn initial_quantity(&self) -> i64 {
        self.initial_quantity.unwrap_or(self.quantity)
    }
}

/// Amount for a restock or dispense.
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct StockChange {
    #[validate(range(min = 1, max = 1_000_000))]
    pub quantity: i64,
}

/// How an uploaded formulary sheet is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Every row becomes a new entry.
    #[default]
    Initial,
    /// Rows restock a matching entry; rows with no match become new entries.
    Added,
}

impl FromStr for ImportMode {
    type Err = AppError;

    /// Accepts the names and the numeric selectors `1` and `2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initial" | "1" => Ok(ImportMode::Initial),
            "added" | "2" => Ok(ImportMode::Added),
            other => Err(AppError::Validation(format!("unknown import mode '{}'", other))),
        }
    }
}

/// Result of applying one uploaded sheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: u64,
    pub restocked: u64,
}
