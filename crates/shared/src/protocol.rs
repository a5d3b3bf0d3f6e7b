use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        Asset, ControlId, ControlStatus, Control, NewAsset, NewControl, Role, TaskStatus, UserId,
        View,
    },
    error::ApiError,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignInRequest {
    /// Custom token issued by the identity provider; absent means anonymous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: UserId,
    pub role: Role,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub views: Vec<View>,
}

pub type CreateAssetRequest = NewAsset;
pub type CreateControlRequest = NewControl;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyControlRequest {
    pub control_id: ControlId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateControlStatusRequest {
    pub status: ControlStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTaskStatusRequest {
    pub status: TaskStatus,
}

/// Successful mutation plus the confirmation shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationReceipt<T> {
    pub record: T,
    pub message: String,
}

impl<T> MutationReceipt<T> {
    pub fn new(record: T, message: impl Into<String>) -> Self {
        Self {
            record,
            message: message.into(),
        }
    }
}

/// Asset together with its risk score, recomputed on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredAsset {
    #[serde(flatten)]
    pub asset: Asset,
    pub risk_score: u8,
    pub risk_band: RiskBand,
}

/// Colour band of a risk score on the dashboard bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    High,
    Elevated,
    Low,
}

impl RiskBand {
    pub fn for_score(score: u8) -> Self {
        if score > 60 {
            RiskBand::High
        } else if score > 30 {
            RiskBand::Elevated
        } else {
            RiskBand::Low
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub asset_count: usize,
    pub high_risk_assets: usize,
    pub average_risk: u8,
    pub implemented_controls: usize,
    pub open_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDashboard {
    pub summary: DashboardSummary,
    /// Highest risk first.
    pub assets: Vec<ScoredAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResponse {
    pub role: Role,
    pub views: Vec<View>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    AssetsChanged { assets: Vec<ScoredAsset> },
    ControlsChanged { controls: Vec<Control> },
    Error(ApiError),
}
