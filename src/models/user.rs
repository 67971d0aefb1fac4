use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    FemrAdmin,
    Clinician,
    OperationAdmin,
    CampaignManager,
}

/// Things a role may do. Checked once, at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewPatients,
    EditPatients,
    ExportPatients,
    ViewExports,
    ReadMessages,
    ManageInventory,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::FemrAdmin,
        Role::Clinician,
        Role::OperationAdmin,
        Role::CampaignManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::FemrAdmin => "femr_admin",
            Role::Clinician => "clinician",
            Role::OperationAdmin => "operation_admin",
            Role::CampaignManager => "campaign_manager",
        }
    }

    pub fn grants(&self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Role::Admin | Role::FemrAdmin | Role::CampaignManager => true,
            Role::OperationAdmin => {
                matches!(capability, ExportPatients | ViewExports | ReadMessages | ManageInventory)
            }
            Role::Clinician => matches!(capability, ViewPatients | EditPatients | ReadMessages),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("unknown role '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub active: bool,
    pub roles: Vec<Role>,
}

impl User {
    pub fn can(&self, capability: Capability) -> bool {
        self.roles.iter().any(|role| role.grants(capability))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub roles: Vec<Role>,
    pub campaigns: Vec<i64>,
}
