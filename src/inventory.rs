//! Formulary sheets: reading uploaded inventory CSV and writing the campaign's
//! formulary back out.
//!
//! Both directions use the same eleven columns. On import, header names are
//! matched without regard to case, columns outside the set are ignored, and
//! blank cells read as absent (`Count` as zero, `Initial Quantity` as the
//! row's `Quantity`).

use chrono::NaiveDate;
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{InventoryEntry, NewInventoryEntry};

pub const INVENTORY_COLUMNS: [&str; 11] = [
    "Category",
    "Medication",
    "Form",
    "Strength",
    "Count",
    "Quantity",
    "Initial Quantity",
    "Item Number",
    "Box Number",
    "Expiration Date",
    "Manufacturer",
];

/// File name offered when the formulary is downloaded.
pub const FORMULARY_FILE_NAME: &str = "formulary.csv";

#[derive(Debug, Deserialize)]
struct SheetRow {
    category: Option<String>,
    medication: Option<String>,
    form: Option<String>,
    strength: Option<String>,
    count: Option<i64>,
    quantity: Option<i64>,
    #[serde(rename = "initial quantity")]
    initial_quantity: Option<i64>,
    #[serde(rename = "item number")]
    item_number: Option<String>,
    #[serde(rename = "box number")]
    box_number: Option<String>,
    #[serde(rename = "expiration date")]
    expiration_date: Option<NaiveDate>,
    manufacturer: Option<String>,
}

impl SheetRow {
    fn into_entry(self) -> NewInventoryEntry {
        NewInventoryEntry {
            category: self.category,
            medication: self.medication.unwrap_or_default(),
            form: self.form.unwrap_or_default(),
            strength: self.strength,
            count: self.count.unwrap_or(0),
            quantity: self.quantity.unwrap_or(0),
            initial_quantity: self.initial_quantity,
            item_number: self.item_number,
            box_number: self.box_number,
            expiration_date: self.expiration_date,
            manufacturer: self.manufacturer,
        }
    }
}

/// Parse an uploaded sheet. Any bad row rejects the whole sheet, naming its line.
pub fn read_sheet(contents: &[u8]) -> AppResult<Vec<NewInventoryEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents);

    let headers: csv::StringRecord = reader
        .headers()
        .map_err(|e| AppError::Validation(format!("unreadable inventory sheet: {}", e)))?
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();
    for required in ["medication", "form"] {
        if !headers.iter().any(|name| name == required) {
            return Err(AppError::Validation(format!(
                "inventory sheet has no '{}' column",
                required
            )));
        }
    }

    let mut entries = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| AppError::Validation(format!("unreadable inventory sheet: {}", e)))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        if record.iter().all(str::is_empty) {
            continue;
        }
        let row: SheetRow = record
            .deserialize(Some(&headers))
            .map_err(|e| AppError::Validation(format!("line {}: {}", line, e)))?;
        let entry = row.into_entry();
        entry
            .validate()
            .map_err(|e| AppError::Validation(format!("line {}: {}", line, e)))?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Render the formulary with the same columns an import accepts.
pub fn write_sheet(entries: &[InventoryEntry]) -> AppResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(INVENTORY_COLUMNS)?;
    for entry in entries {
        writer.write_record([
            entry.category.clone().unwrap_or_default(),
            entry.medication.clone(),
            entry.form.clone(),
            entry.strength.clone().unwrap_or_default(),
            entry.count.to_string(),
            entry.quantity.to_string(),
            entry.initial_quantity.to_string(),
            entry.item_number.clone().unwrap_or_default(),
            entry.box_number.clone().unwrap_or_default(),
            entry
                .expiration_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            entry.manufacturer.clone().unwrap_or_default(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Io(e.into_error()))
}
