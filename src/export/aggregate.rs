//! First export pass: gather sub-records and the widest count of each kind.

use tracing::{debug, instrument};

use super::rows::{HPI_COLUMNS, LEADING_COLUMNS, TREATMENT_COLUMNS, VITALS_COLUMNS};
use crate::db::Database;
use crate::error::AppResult;
use crate::models::{HistoryOfPresentIllness, Patient, PatientEncounter, Treatment, Vitals};

/// An encounter with every sub-record it owns. Empty collections are kept,
/// so each encounter carries all three kinds even when a count is zero.
#[derive(Debug, Clone)]
pub struct EncounterRecords {
    pub encounter: PatientEncounter,
    pub vitals: Vec<Vitals>,
    pub treatments: Vec<Treatment>,
    pub histories: Vec<HistoryOfPresentIllness>,
}

#[derive(Debug, Clone)]
pub struct PatientRecords {
    pub patient: Patient,
    pub encounters: Vec<EncounterRecords>,
}

/// Largest number of each sub-record kind on any single encounter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnWidths {
    pub vitals: usize,
    pub treatments: usize,
    pub hpis: usize,
}

impl ColumnWidths {
    /// Number of fields in every row of an export with these widths.
    pub fn row_len(&self) -> usize {
        LEADING_COLUMNS
            + VITALS_COLUMNS.len() * self.vitals
            + TREATMENT_COLUMNS.len() * self.treatments
            + HPI_COLUMNS.len() * self.hpis
    }

    fn observe(&mut self, records: &EncounterRecords) {
        self.vitals = self.vitals.max(records.vitals.len());
        self.treatments = self.treatments.max(records.treatments.len());
        self.hpis = self.hpis.max(records.histories.len());
    }
}

/// Result of the first pass, ready for row emission.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub patients: Vec<PatientRecords>,
    pub widths: ColumnWidths,
}

impl Aggregation {
    pub fn encounter_count(&self) -> usize {
        self.patients.iter().map(|p| p.encounters.len()).sum()
    }
}

/// Accumulates patients in input order while tracking running maxima.
#[derive(Debug, Default)]
pub struct AggregationBuilder {
    patients: Vec<PatientRecords>,
    widths: ColumnWidths,
}

impl AggregationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_patient(&mut self, patient: Patient, encounters: Vec<EncounterRecords>) {
        for records in &encounters {
            self.widths.observe(records);
        }
        self.patients.push(PatientRecords {
            patient,
            encounters,
        });
    }

    pub fn finish(self) -> Aggregation {
        Aggregation {
            patients: self.patients,
            widths: self.widths,
        }
    }
}

/// Load every encounter and sub-record for `patients`, preserving their order.
#[instrument(skip(db, patients), fields(patients = patients.len()))]
pub async fn collect(db: &Database, patients: Vec<Patient>) -> AppResult<Aggregation> {
    let mut builder = AggregationBuilder::new();
    for patient in patients {
        let mut encounters = Vec::new();
        for encounter in db.encounters_for_patient(patient.id).await? {
            encounters.push(EncounterRecords {
                vitals: db.vitals_for_encounter(encounter.id).await?,
                treatments: db.treatments_for_encounter(encounter.id).await?,
                histories: db.histories_for_encounter(encounter.id).await?,
                encounter,
            });
        }
        builder.push_patient(patient, encounters);
    }
    let aggregation = builder.finish();
    debug!(
        encounters = aggregation.encounter_count(),
        max_vitals = aggregation.widths.vitals,
        max_treatments = aggregation.widths.treatments,
        max_hpis = aggregation.widths.hpis,
        "export aggregated"
    );
    Ok(aggregation)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::models::SexAssignedAtBirth;

    pub fn patient(id: i64) -> Patient {
        Patient {
            id,
            first_name: "Maria".into(),
            middle_name: None,
            last_name: "Lopez".into(),
            sex_assigned_at_birth: SexAssignedAtBirth::Female,
            date_of_birth: NaiveDate::from_ymd_opt(1980, 5, 1).unwrap(),
            age: 43,
            phone_number: None,
            email_address: None,
            city: Some("Leon".into()),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    pub fn encounter(id: i64, patient_id: i64) -> PatientEncounter {
        PatientEncounter {
            id,
            patient_id,
            campaign_id: 1,
            body_height_primary: Some(1),
            body_height_secondary: Some(82.0),
            body_weight: Some(70.0),
            body_mass_index: Some(21.1),
            smoking: false,
            history_of_diabetes: true,
            history_of_hypertension: false,
            history_of_high_cholesterol: false,
            alcohol: false,
            patient_history: None,
            community_health_worker_notes: Some("follow up".into()),
            procedure: None,
            pharmacy_notes: None,
            medical_history: None,
            social_history: None,
            current_medications: None,
            family_history: None,
            active: true,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 18, 30, 0).unwrap(),
        }
    }

    pub fn vitals(id: i64, encounter_id: i64) -> Vitals {
        Vitals {
            id,
            encounter_id,
            systolic_blood_pressure: Some(120),
            diastolic_blood_pressure: Some(80),
            mean_arterial_pressure: None,
            heart_rate: Some(72),
            respiratory_rate: None,
            body_temperature: Some(37.0),
            oxygen_concentration: Some(98),
            glucose_level: None,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 18, 30, 0).unwrap(),
        }
    }

    pub fn treatment(id: i64, encounter_id: i64) -> Treatment {
        Treatment {
            id,
            encounter_id,
            diagnosis: "Hypertension".into(),
            medications: vec!["Amlodipine".into(), "Lisinopril".into()],
            administration_schedule: "Once daily".into(),
            days: 30,
            prescriber: "dr.ruiz".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 18, 30, 0).unwrap(),
        }
    }

    pub fn history(id: i64, encounter_id: i64) -> HistoryOfPresentIllness {
        HistoryOfPresentIllness {
            id,
            encounter_id,
            chief_complaint: "Headache".into(),
            onset: Some("2 days".into()),
            provokes: None,
            palliates: None,
            quality: None,
            radiation: None,
            severity: Some("7/10".into()),
            time_of_day: None,
            narrative: None,
            physical_examination: None,
            tests_ordered: vec!["CBC".into(), "BMP".into()],
        }
    }

    pub fn records(id: i64, patient_id: i64, vitals_count: usize) -> EncounterRecords {
        EncounterRecords {
            encounter: encounter(id, patient_id),
            vitals: (0..vitals_count).map(|n| vitals(n as i64 + 1, id)).collect(),
            treatments: Vec::new(),
            histories: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn tracks_the_widest_encounter_per_kind() {
        let mut builder = AggregationBuilder::new();
        builder.push_patient(
            patient(1),
            vec![records(1, 1, 0), records(2, 1, 2), records(3, 1, 1)],
        );
        let mut with_treatments = records(4, 2, 0);
        with_treatments.treatments = vec![treatment(1, 4)];
        with_treatments.histories = vec![history(1, 4), history(2, 4), history(3, 4)];
        builder.push_patient(patient(2), vec![with_treatments]);

        let aggregation = builder.finish();
        assert_eq!(
            aggregation.widths,
            ColumnWidths {
                vitals: 2,
                treatments: 1,
                hpis: 3
            }
        );
        assert_eq!(aggregation.encounter_count(), 4);
    }

    #[test]
    fn keeps_patients_without_encounters_in_order() {
        let mut builder = AggregationBuilder::new();
        builder.push_patient(patient(3), Vec::new());
        builder.push_patient(patient(1), vec![records(1, 1, 1)]);

        let aggregation = builder.finish();
        let ids: Vec<i64> = aggregation.patients.iter().map(|p| p.patient.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(aggregation.widths.vitals, 1);
    }

    #[test]
    fn row_length_follows_widths() {
        assert_eq!(ColumnWidths::default().row_len(), LEADING_COLUMNS);
        let widths = ColumnWidths {
            vitals: 2,
            treatments: 1,
            hpis: 3,
        };
        assert_eq!(widths.row_len(), 20 + 7 * 2 + 5 + 11 * 3);
    }
}
