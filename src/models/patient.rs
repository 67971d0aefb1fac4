use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Oldest age accepted at intake.
pub const MAX_AGE: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SexAssignedAtBirth {
    Female,
    Male,
    Other,
}

impl SexAssignedAtBirth {
    /// Single-letter storage code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Female => "f",
            Self::Male => "m",
            Self::Other => "o",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "f" => Some(Self::Female),
            "m" => Some(Self::Male),
            "o" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Female => "Female",
            Self::Male => "Male",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub sex_assigned_at_birth: SexAssignedAtBirth,
    pub date_of_birth: NaiveDate,
    pub age: i64,
    pub phone_number: Option<String>,
    pub email_address: Option<String>,
    pub city: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPatient {
    #[validate(length(min = 1, max = 30))]
    pub first_name: String,
    #[validate(length(max = 30))]
    pub middle_name: Option<String>,
    #[validate(length(min = 1, max = 30))]
    pub last_name: String,
    pub sex_assigned_at_birth: SexAssignedAtBirth,
    pub date_of_birth: NaiveDate,
    #[validate(length(min = 4, max = 30))]
    pub phone_number: Option<String>,
    #[validate(email)]
    pub email_address: Option<String>,
    #[validate(length(max = 30))]
    pub city: Option<String>,
}

impl NewPatient {
    /// Validate the payload and derive the patient's age as of `today`.
    pub fn checked_age(&self, today: NaiveDate) -> AppResult<i64> {
        self.validate()?;
        if self.date_of_birth > today {
            return Err(AppError::Validation(
                "date_of_birth: cannot be in the future".into(),
            ));
        }
        let age = age_on(self.date_of_birth, today);
        if age > MAX_AGE {
            return Err(AppError::Validation(format!(
                "date_of_birth: age must not exceed {} years",
                MAX_AGE
            )));
        }
        Ok(age)
    }
}

/// Whole years between `date_of_birth` and `today`.
pub fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> i64 {
    let mut years = i64::from(today.year() - date_of_birth.year());
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    years
}
