//! Domain records and intake payloads.

pub mod campaign;
pub mod encounter;
pub mod export;
pub mod inventory;
pub mod message;
pub mod patient;
pub mod user;

pub use campaign::{Campaign, Instance, NewCampaign, Units};
pub use encounter::{
    HistoryOfPresentIllness, NewEncounter, NewHistoryOfPresentIllness, NewTreatment, NewVitals,
    PatientEncounter, Treatment, Vitals,
};
pub use export::{CsvExport, TimeWindow, Timeframe};
pub use inventory::{ImportMode, ImportSummary, InventoryEntry, NewInventoryEntry, StockChange};
pub use message::{Message, NewMessage};
pub use patient::{NewPatient, Patient, SexAssignedAtBirth};
pub use user::{Capability, NewUser, Role, User};

use serde::Serialize;

/// One page of a newest-first listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    /// Number of pages needed for `total` items; an empty listing still has one page.
    pub fn page_count(total: i64, per_page: u32) -> u32 {
        let per_page = i64::from(per_page.max(1));
        (((total.max(0) + per_page - 1) / per_page).max(1)) as u32
    }

    /// Clamp a requested page into `1..=total_pages`.
    pub fn clamp(requested: u32, total_pages: u32) -> u32 {
        requested.max(1).min(total_pages.max(1))
    }

    pub fn new(items: Vec<T>, page: u32, total_pages: u32) -> Self {
        Self {
            items,
            page,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }
}
