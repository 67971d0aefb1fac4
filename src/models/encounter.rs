use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Units;
use crate::units;

/// One clinical visit. Body metrics are always stored metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientEncounter {
    pub id: i64,
    pub patient_id: i64,
    pub campaign_id: i64,
    pub body_height_primary: Option<i64>,
    pub body_height_secondary: Option<f64>,
    pub body_weight: Option<f64>,
    pub body_mass_index: Option<f64>,
    pub smoking: bool,
    pub history_of_diabetes: bool,
    pub history_of_hypertension: bool,
    pub history_of_high_cholesterol: bool,
    pub alcohol: bool,
    pub patient_history: Option<String>,
    pub community_health_worker_notes: Option<String>,
    pub procedure: Option<String>,
    pub pharmacy_notes: Option<String>,
    pub medical_history: Option<String>,
    pub social_history: Option<String>,
    pub current_medications: Option<String>,
    pub family_history: Option<String>,
    pub active: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub id: i64,
    pub encounter_id: i64,
    pub systolic_blood_pressure: Option<i64>,
    pub diastolic_blood_pressure: Option<i64>,
    pub mean_arterial_pressure: Option<f64>,
    pub heart_rate: Option<i64>,
    pub respiratory_rate: Option<i64>,
    /// Celsius
    pub body_temperature: Option<f64>,
    pub oxygen_concentration: Option<i64>,
    pub glucose_level: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub id: i64,
    pub encounter_id: i64,
    pub diagnosis: String,
    pub medications: Vec<String>,
    pub administration_schedule: String,
    pub days: i64,
    /// Username of the prescribing user.
    pub prescriber: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryOfPresentIllness {
    pub id: i64,
    pub encounter_id: i64,
    pub chief_complaint: String,
    pub onset: Option<String>,
    pub provokes: Option<String>,
    pub palliates: Option<String>,
    pub quality: Option<String>,
    pub radiation: Option<String>,
    pub severity: Option<String>,
    pub time_of_day: Option<String>,
    pub narrative: Option<String>,
    pub physical_examination: Option<String>,
    pub tests_ordered: Vec<String>,
}

// ===== Intake payloads =====

/// Encounter intake. Ranges apply to metric values, so imperial input is
/// normalized with [`NewEncounter::into_metric`] before validation.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewEncounter {
    #[validate(range(min = 0, max = 8))]
    pub body_height_primary: Option<i64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub body_height_secondary: Option<f64>,
    #[validate(range(min = 0.25, max = 500.0))]
    pub body_weight: Option<f64>,
    #[validate(range(min = 0.0, max = 500.0))]
    pub body_mass_index: Option<f64>,
    #[serde(default)]
    pub smoking: bool,
    #[serde(default)]
    pub history_of_diabetes: bool,
    #[serde(default)]
    pub history_of_hypertension: bool,
    #[serde(default)]
    pub history_of_high_cholesterol: bool,
    #[serde(default)]
    pub alcohol: bool,
    #[validate(length(max = 500))]
    pub patient_history: Option<String>,
    #[validate(length(max = 500))]
    pub community_health_worker_notes: Option<String>,
    #[validate(length(max = 500))]
    pub procedure: Option<String>,
    #[validate(length(max = 500))]
    pub pharmacy_notes: Option<String>,
    #[validate(length(max = 500))]
    pub medical_history: Option<String>,
    #[validate(length(max = 500))]
    pub social_history: Option<String>,
    #[validate(length(max = 500))]
    pub current_medications: Option<String>,
    #[validate(length(max = 500))]
    pub family_history: Option<String>,
    #[serde(default)]
    #[validate]
    pub vitals: Vec<NewVitals>,
    #[serde(default)]
    #[validate]
    pub treatments: Vec<NewTreatment>,
    #[serde(default)]
    #[validate]
    pub histories: Vec<NewHistoryOfPresentIllness>,
}

impl NewEncounter {
    /// Convert a payload entered in `units` into stored metric form.
    ///
    /// Imperial heights arrive as feet/inches, weights as pounds and
    /// temperatures as Fahrenheit. A height with only one component given
    /// converts with the other read as zero.
    pub fn into_metric(mut self, units: Units) -> Self {
        if !units.is_imperial() {
            return self;
        }
        if self.body_height_primary.is_some() || self.body_height_secondary.is_some() {
            let height =
                units::height_to_metric(self.body_height_primary, self.body_height_secondary);
            self.body_height_primary = Some(height.meters);
            self.body_height_secondary = Some(height.centimeters);
        }
        self.body_weight = self.body_weight.map(units::weight_to_metric);
        for vitals in &mut self.vitals {
            vitals.body_temperature = vitals.body_temperature.map(units::temperature_to_metric);
        }
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewVitals {
    #[validate(range(min = 1, max = 200))]
    pub systolic_blood_pressure: Option<i64>,
    #[validate(range(min = 1, max = 200))]
    pub diastolic_blood_pressure: Option<i64>,
    #[validate(range(min = 1.0))]
    pub mean_arterial_pressure: Option<f64>,
    #[validate(range(min = 40, max = 170))]
    pub heart_rate: Option<i64>,
    #[validate(range(min = 1, max = 500))]
    pub respiratory_rate: Option<i64>,
    #[validate(range(min = 1.0, max = 200.0))]
    pub body_temperature: Option<f64>,
    #[validate(range(min = 70, max = 100))]
    pub oxygen_concentration: Option<i64>,
    #[validate(range(min = 1.0, max = 500.0))]
    pub glucose_level: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewTreatment {
    #[validate(length(min = 1, max = 255))]
    pub diagnosis: String,
    #[validate(length(min = 1))]
    pub medications: Vec<String>,
    #[validate(length(min = 1, max = 255))]
    pub administration_schedule: String,
    #[validate(range(min = 1))]
    pub days: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewHistoryOfPresentIllness {
    #[validate(length(min = 1, max = 255))]
    pub chief_complaint: String,
    #[validate(length(max = 50))]
    pub onset: Option<String>,
    #[validate(length(max = 50))]
    pub provokes: Option<String>,
    #[validate(length(max = 50))]
    pub palliates: Option<String>,
    #[validate(length(max = 50))]
    pub quality: Option<String>,
    #[validate(length(max = 50))]
    pub radiation: Option<String>,
    #[validate(length(max = 50))]
    pub severity: Option<String>,
    #[validate(length(max = 50))]
    pub time_of_day: Option<String>,
    #[validate(length(max = 50))]
    pub narrative: Option<String>,
    #[validate(length(max = 255))]
    pub physical_examination: Option<String>,
    #[serde(default)]
    pub tests_ordered: Vec<String>,
}
