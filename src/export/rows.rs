//! Second export pass: title row and one padded data row per encounter.

use chrono_tz::Tz;

use super::aggregate::{Aggregation, ColumnWidths, EncounterRecords};
use crate::models::{Campaign, HistoryOfPresentIllness, Patient, Treatment, Units, Vitals};
use crate::units;

pub const LEADING_COLUMNS: usize = 20;

pub const VITALS_COLUMNS: [&str; 7] = [
    "Systolic Blood Pressure",
    "Diastolic Blood Pressure",
    "Mean Arterial Pressure",
    "Heart Rate",
    "Body Temperature",
    "Oxygen Concentration",
    "Glucose Level",
];

pub const TREATMENT_COLUMNS: [&str; 5] = [
    "Diagnosis",
    "Medication",
    "Administration Schedule",
    "Days",
    "Prescriber",
];

pub const HPI_COLUMNS: [&str; 11] = [
    "Chief Complaint",
    "Onset",
    "Provokes",
    "Palliates",
    "Quality",
    "Radiation",
    "Severity",
    "Time of Day",
    "Narrative",
    "Physical Examination",
    "Tests Ordered",
];

const DATE_SEEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

fn unit_suffixes(units: Units) -> (&'static str, &'static str) {
    match units {
        Units::Imperial => ("lbs", "F"),
        Units::Metric => ("kg", "C"),
    }
}

/// Header for an export with the given widths.
pub fn title_row(units: Units, widths: ColumnWidths) -> Vec<String> {
    let (weight_unit, temperature_unit) = unit_suffixes(units);
    let mut row: Vec<String> = [
        "Patient",
        "Sex Assigned at Birth",
        "Age (years)",
        "City",
        "Date Seen",
        "Height",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    row.push(format!("Weight ({})", weight_unit));
    row.extend(
        [
            "BMI",
            "History of Tobacco Use",
            "History of Diabetes",
            "History of Hypertension",
            "History of High Cholesterol",
            "History of Alcohol Abuse/Substance Abuse",
            "Community Health Worker Notes",
            "Procedure/Counseling",
            "Pharmacy Notes",
            "Medical/Surgical History",
            "Social History",
            "Current Medications",
            "Family History",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    for _ in 0..widths.vitals {
        for column in VITALS_COLUMNS {
            if column == "Body Temperature" {
                row.push(format!("{} ({})", column, temperature_unit));
            } else {
                row.push(column.to_string());
            }
        }
    }
    for _ in 0..widths.treatments {
        row.extend(TREATMENT_COLUMNS.iter().map(|s| s.to_string()));
    }
    for _ in 0..widths.hpis {
        row.extend(HPI_COLUMNS.iter().map(|s| s.to_string()));
    }
    row
}

fn flag(value: bool) -> String {
    let label = if value { "True" } else { "False" };
    label.to_string()
}

fn number<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn pad(row: &mut Vec<String>, groups: usize, group_len: usize) {
    row.extend(std::iter::repeat(String::new()).take(groups * group_len));
}

/// Renders data rows for one campaign's export.
#[derive(Debug, Clone)]
pub struct RowBuilder {
    units: Units,
    tz: Tz,
    widths: ColumnWidths,
}

impl RowBuilder {
    pub fn new(campaign: &Campaign, widths: ColumnWidths) -> Self {
        Self {
            units: campaign.units,
            tz: campaign.tz(),
            widths,
        }
    }

    pub fn title(&self) -> Vec<String> {
        title_row(self.units, self.widths)
    }

    /// Every data row in patient order.
    ///
    /// The ordinal advances once per patient that produces rows, so a
    /// patient without encounters leaves no gap in the numbering.
    pub fn rows(&self, aggregation: &Aggregation) -> Vec<Vec<String>> {
        let mut rows = Vec::with_capacity(aggregation.encounter_count());
        let mut ordinal = 0;
        for entry in &aggregation.patients {
            if entry.encounters.is_empty() {
                continue;
            }
            ordinal += 1;
            for records in &entry.encounters {
                rows.push(self.encounter_row(ordinal, &entry.patient, records));
            }
        }
        rows
    }

    pub fn encounter_row(
        &self,
        ordinal: usize,
        patient: &Patient,
        records: &EncounterRecords,
    ) -> Vec<String> {
        let encounter = &records.encounter;
        let imperial = self.units.is_imperial();
        let mut row = Vec::with_capacity(self.widths.row_len());

        row.push(ordinal.to_string());
        row.push(patient.sex_assigned_at_birth.label().to_string());
        row.push(patient.age.to_string());
        row.push(text(&patient.city));
        row.push(
            encounter
                .timestamp
                .with_timezone(&self.tz)
                .format(DATE_SEEN_FORMAT)
                .to_string(),
        );
        if imperial {
            row.push(
                units::height_to_imperial(
                    encounter.body_height_primary,
                    encounter.body_height_secondary,
                )
                .to_string(),
            );
            row.push(units::weight_to_imperial(encounter.body_weight).to_string());
        } else {
            row.push(
                units::metric_height(encounter.body_height_primary, encounter.body_height_secondary)
                    .to_string(),
            );
            row.push(number(encounter.body_weight));
        }
        row.push(number(encounter.body_mass_index));
        row.push(flag(encounter.smoking));
        row.push(flag(encounter.history_of_diabetes));
        row.push(flag(encounter.history_of_hypertension));
        row.push(flag(encounter.history_of_high_cholesterol));
        row.push(flag(encounter.alcohol));
        row.push(text(&encounter.community_health_worker_notes));
        row.push(text(&encounter.procedure));
        row.push(text(&encounter.pharmacy_notes));
        row.push(text(&encounter.medical_history));
        row.push(text(&encounter.social_history));
        row.push(text(&encounter.current_medications));
        row.push(text(&encounter.family_history));

        for vitals in &records.vitals {
            self.push_vitals(&mut row, vitals);
        }
        pad(
            &mut row,
            self.widths.vitals.saturating_sub(records.vitals.len()),
            VITALS_COLUMNS.len(),
        );

        for treatment in &records.treatments {
            push_treatment(&mut row, treatment);
        }
        pad(
            &mut row,
            self.widths.treatments.saturating_sub(records.treatments.len()),
            TREATMENT_COLUMNS.len(),
        );

        for history in &records.histories {
            push_history(&mut row, history);
        }
        pad(
            &mut row,
            self.widths.hpis.saturating_sub(records.histories.len()),
            HPI_COLUMNS.len(),
        );

        row
    }

    fn push_vitals(&self, row: &mut Vec<String>, vitals: &Vitals) {
        row.push(number(vitals.systolic_blood_pressure));
        row.push(number(vitals.diastolic_blood_pressure));
        row.push(number(vitals.mean_arterial_pressure));
        row.push(number(vitals.heart_rate));
        if self.units.is_imperial() {
            row.push(units::temperature_to_imperial(vitals.body_temperature).to_string());
        } else {
            row.push(number(vitals.body_temperature));
        }
        row.push(number(vitals.oxygen_concentration));
        row.push(number(vitals.glucose_level));
    }
}

fn push_treatment(row: &mut Vec<String>, treatment: &Treatment) {
    row.push(treatment.diagnosis.clone());
    row.push(treatment.medications.join(","));
    row.push(treatment.administration_schedule.clone());
    row.push(treatment.days.to_string());
    row.push(treatment.prescriber.clone());
}

fn push_history(row: &mut Vec<String>, history: &HistoryOfPresentIllness) {
    row.push(history.chief_complaint.clone());
    row.push(text(&history.onset));
    row.push(text(&history.provokes));
    row.push(text(&history.palliates));
    row.push(text(&history.quality));
    row.push(text(&history.radiation));
    row.push(text(&history.severity));
    row.push(text(&history.time_of_day));
    row.push(text(&history.narrative));
    row.push(text(&history.physical_examination));
    row.push(history.tests_ordered.join(","));
}
