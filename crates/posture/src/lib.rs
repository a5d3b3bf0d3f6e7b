//! Derived security posture for OT assets.
//!
//! Everything here is a pure function of the current asset snapshot: risk
//! scores and remediation tasks are recomputed in full on every change and
//! never persisted.

pub mod risk;
pub mod summary;
pub mod tasks;

pub use risk::{risk_score, score_asset, score_assets, RiskBand, HIGH_RISK_THRESHOLD, MAX_RISK};
pub use summary::summarize;
pub use tasks::{control_status_for, derive_tasks, priority_for, task_id, task_status_for};

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use shared::domain::{
        AppliedControl, Asset, AssetId, AssetType, ControlId, ControlStatus, Criticality, UserId,
    };

    pub fn applied(id: &str, status: ControlStatus) -> AppliedControl {
        AppliedControl {
            id: ControlId::from(id),
            name: format!("control {id}"),
            status,
            applied_at: Utc::now(),
        }
    }

    pub fn asset(id: &str, criticality: Criticality, controls: Vec<AppliedControl>) -> Asset {
        let now = Utc::now();
        Asset {
            id: AssetId::from(id),
            name: format!("asset {id}"),
            asset_type: AssetType::Plc,
            location: "Production Line A".into(),
            criticality,
            owner: "ops".into(),
            last_review: now,
            created_by: UserId::from("tester"),
            created_at: now,
            controls,
        }
    }
}
