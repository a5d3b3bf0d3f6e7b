use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Fresh random identifier. The simple UUID form carries no `-`, so
            /// composite task ids stay unambiguous.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(AssetId);
id_newtype!(ControlId);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Generates `as_str`, `Display` and a case-insensitive `FromStr` from the
/// variant/wire-name table, keeping the serde names and the parser in step.
macro_rules! wire_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let raw = raw.trim();
                $(
                    if raw.eq_ignore_ascii_case($wire) {
                        return Ok($name::$variant);
                    }
                )+
                Err(ParseEnumError {
                    kind: $kind,
                    value: raw.to_string(),
                })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Engineer,
    #[default]
    Guest,
}

wire_enum!(Role, "role", {
    Admin => "admin",
    Engineer => "engineer",
    Guest => "guest",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Create assets, apply controls, change applied-control status.
    EditAssets,
    /// Add or remove entries of the global control catalog.
    ManageCatalog,
}

impl Role {
    pub fn allows(self, capability: Capability) -> bool {
        match (self, capability) {
            (Role::Admin, _) => true,
            (Role::Engineer, Capability::EditAssets) => true,
            (Role::Engineer, Capability::ManageCatalog) => false,
            (Role::Guest, _) => false,
        }
    }
}

/// Authenticated principal a request is evaluated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role.allows(capability)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

wire_enum!(Severity, "severity", {
    High => "High",
    Medium => "Medium",
    Low => "Low",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criticality {
    High,
    Medium,
    Low,
}

wire_enum!(Criticality, "criticality", {
    High => "High",
    Medium => "Medium",
    Low => "Low",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    #[serde(rename = "PLC")]
    Plc,
    #[serde(rename = "HMI")]
    Hmi,
    Historian,
    Network,
}

wire_enum!(AssetType, "asset type", {
    Plc => "PLC",
    Hmi => "HMI",
    Historian => "Historian",
    Network => "Network",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlStatus {
    Incomplete,
    Planned,
    Implemented,
}

wire_enum!(ControlStatus, "control status", {
    Incomplete => "Incomplete",
    Planned => "Planned",
    Implemented => "Implemented",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "To Do")]
    ToDo,
    #[serde(rename = "In Progress")]
    InProgress,
    Complete,
}

wire_enum!(TaskStatus, "task status", {
    ToDo => "To Do",
    InProgress => "In Progress",
    Complete => "Complete",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    High,
    Medium,
}

wire_enum!(TaskPriority, "task priority", {
    High => "High",
    Medium => "Medium",
});

/// Catalog entry describing a practice that can be applied to assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub id: ControlId,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Copy of a catalog control embedded in an asset, with per-asset status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedControl {
    pub id: ControlId,
    pub name: String,
    pub status: ControlStatus,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub location: String,
    pub criticality: Criticality,
    pub owner: String,
    pub last_review: DateTime<Utc>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub controls: Vec<AppliedControl>,
}

impl Asset {
    pub fn applied_control(&self, control_id: &ControlId) -> Option<&AppliedControl> {
        self.controls.iter().find(|c| &c.id == control_id)
    }

    pub fn has_control(&self, control_id: &ControlId) -> bool {
        self.applied_control(control_id).is_some()
    }
}

/// Asset builder form state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewAsset {
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub location: String,
    pub criticality: Criticality,
    pub owner: String,
}

impl Default for NewAsset {
    fn default() -> Self {
        Self {
            name: "New Asset".into(),
            asset_type: AssetType::Plc,
            location: "Production Line A".into(),
            criticality: Criticality::High,
            owner: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewControl {
    pub name: String,
    pub description: String,
    pub severity: Severity,
}

impl Default for NewControl {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            severity: Severity::Medium,
        }
    }
}

/// Outstanding work item derived from a non-implemented applied control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationTask {
    pub id: String,
    pub asset_id: AssetId,
    pub control_id: ControlId,
    pub asset_name: String,
    pub control_name: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    RiskDashboard,
    AssetBuilder,
    SecurityControls,
    RemediationTasks,
    Admin,
}

impl View {
    pub const ALL: [View; 5] = [
        View::RiskDashboard,
        View::AssetBuilder,
        View::SecurityControls,
        View::RemediationTasks,
        View::Admin,
    ];

    pub fn title(self) -> &'static str {
        match self {
            View::RiskDashboard => "Risk Dashboard",
            View::AssetBuilder => "Asset Builder",
            View::SecurityControls => "Security Controls",
            View::RemediationTasks => "Remediation Tasks",
            View::Admin => "Admin",
        }
    }

    /// The admin view is left out for other roles rather than shown disabled.
    pub fn visible_to(role: Role) -> Vec<View> {
        View::ALL
            .into_iter()
            .filter(|view| *view != View::Admin || role == Role::Admin)
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
