//! Imperial/metric conversions for body metrics and temperatures.
//!
//! Storage is always metric. Heights are stored as a whole-meter primary
//! component plus a centimeter secondary component. Imperial values are a
//! display and input transform applied at the edges.
//!
//! Absent components are read as zero before converting. A height missing
//! only its centimeter part therefore converts as if the part were 0.

use std::fmt;

use serde::Serialize;

pub const CM_PER_INCH: f64 = 2.54;
pub const LBS_PER_KG: f64 = 2.2046;

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImperialHeight {
    pub feet: i64,
    pub inches: f64,
}

impl fmt::Display for ImperialHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}' {}\"", self.feet, self.inches)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricHeight {
    pub meters: i64,
    pub centimeters: f64,
}

impl MetricHeight {
    pub fn total_centimeters(&self) -> f64 {
        self.meters as f64 * 100.0 + self.centimeters
    }
}

impl fmt::Display for MetricHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} m {} cm", self.meters, self.centimeters)
    }
}

/// Stored height components read with the absent-is-zero rule.
pub fn metric_height(meters: Option<i64>, centimeters: Option<f64>) -> MetricHeight {
    MetricHeight {
        meters: meters.unwrap_or(0),
        centimeters: centimeters.unwrap_or(0.0),
    }
}

pub fn height_to_imperial(meters: Option<i64>, centimeters: Option<f64>) -> ImperialHeight {
    let total_inches = metric_height(meters, centimeters).total_centimeters() / CM_PER_INCH;
    let mut feet = (total_inches / 12.0).floor() as i64;
    let mut inches = round2(total_inches - feet as f64 * 12.0);
    // 11.996 rounds up to a whole foot
    if inches >= 12.0 {
        feet += 1;
        inches = round2(inches - 12.0);
    }
    ImperialHeight { feet, inches }
}

/// Inverse of [`height_to_imperial`]; the centimeter part is left unrounded.
pub fn height_to_metric(feet: Option<i64>, inches: Option<f64>) -> MetricHeight {
    let total_cm = (feet.unwrap_or(0) as f64 * 12.0 + inches.unwrap_or(0.0)) * CM_PER_INCH;
    let meters = (total_cm / 100.0).floor() as i64;
    MetricHeight {
        meters,
        centimeters: total_cm - meters as f64 * 100.0,
    }
}

pub fn weight_to_imperial(kilograms: Option<f64>) -> f64 {
    round2(kilograms.unwrap_or(0.0) * LBS_PER_KG)
}

pub fn weight_to_metric(pounds: f64) -> f64 {
    pounds / LBS_PER_KG
}

pub fn temperature_to_imperial(celsius: Option<f64>) -> f64 {
    round2(celsius.unwrap_or(0.0) * 9.0 / 5.0 + 32.0)
}

pub fn temperature_to_metric(fahrenheit: f64) -> f64 {
    round2((fahrenheit - 32.0) * 5.0 / 9.0)
}
