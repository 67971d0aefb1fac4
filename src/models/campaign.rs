use std::str::FromStr;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Measurement system a campaign displays and accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Imperial,
    Metric,
}

impl Units {
    pub fn code(&self) -> &'static str {
        match self {
            Units::Imperial => "i",
            Units::Metric => "m",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(Units::Imperial),
            "m" => Some(Units::Metric),
            _ => None,
        }
    }

    pub fn is_imperial(&self) -> bool {
        matches!(self, Units::Imperial)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub units: Units,
    pub telehealth: bool,
    /// Days after which an encounter is closed.
    pub encounter_close_days: i64,
    pub country: String,
    /// IANA zone name, e.g. `America/Managua`.
    pub timezone: String,
    pub instance_id: i64,
}

impl Campaign {
    /// The campaign's zone, UTC when the stored name is not a known zone.
    pub fn tz(&self) -> Tz {
        Tz::from_str(&self.timezone).unwrap_or_else(|_| {
            warn!(campaign = %self.name, timezone = %self.timezone, "unknown timezone, using UTC");
            Tz::UTC
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub units: Units,
    #[serde(default)]
    pub telehealth: bool,
    pub encounter_close_days: i64,
    pub country: String,
    pub timezone: String,
    pub instance_id: i64,
}
