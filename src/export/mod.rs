//! Campaign CSV export pipeline.
//!
//! Export runs in two passes. [`aggregate`] walks the selected patients and
//! their encounters, gathering every sub-record and the widest count of each
//! kind. [`rows`] then emits the title row and one padded row per encounter,
//! so the file is rectangular. [`runner`] ties both passes to storage and
//! notification.

pub mod aggregate;
pub mod rows;
pub mod runner;

pub use aggregate::{collect, Aggregation, AggregationBuilder, ColumnWidths, EncounterRecords, PatientRecords};
pub use rows::{title_row, RowBuilder, HPI_COLUMNS, LEADING_COLUMNS, TREATMENT_COLUMNS, VITALS_COLUMNS};
pub use runner::{render_csv, run_export, ExportContext};
