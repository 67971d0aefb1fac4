use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A generated CSV artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvExport {
    pub id: i64,
    pub user_id: i64,
    pub campaign_id: i64,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

/// Which patients an export covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    #[default]
    All,
    LastSevenDays,
    LastThirtyDays,
}

/// Closed interval `[from, to]`; `to` is the request instant, so activity
/// recorded in the same second as the request is still inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && instant <= self.to
    }
}

impl Timeframe {
    /// `None` means no time restriction.
    pub fn window(&self, now: DateTime<Utc>) -> Option<TimeWindow> {
        let days = match self {
            Timeframe::All => return None,
            Timeframe::LastSevenDays => 7,
            Timeframe::LastThirtyDays => 30,
        };
        Some(TimeWindow {
            from: now - Duration::days(days),
            to: now,
        })
    }

    pub fn selector(&self) -> u8 {
        match self {
            Timeframe::All => 1,
            Timeframe::LastSevenDays => 2,
            Timeframe::LastThirtyDays => 3,
        }
    }
}

impl TryFrom<u8> for Timeframe {
    type Error = AppError;

    fn try_from(selector: u8) -> Result<Self, Self::Error> {
        match selector {
            1 => Ok(Timeframe::All),
            2 => Ok(Timeframe::LastSevenDays),
            3 => Ok(Timeframe::LastThirtyDays),
            other => Err(AppError::Validation(format!(
                "timeframe must be 1, 2 or 3, got {}",
                other
            ))),
        }
    }
}
