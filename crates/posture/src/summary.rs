use shared::{
    domain::{Asset, ControlStatus},
    protocol::DashboardSummary,
};

use crate::{derive_tasks, risk_score, HIGH_RISK_THRESHOLD};

/// Headline numbers for the risk dashboard cards.
pub fn summarize(assets: &[Asset]) -> DashboardSummary {
    let scores: Vec<u8> = assets.iter().map(|a| risk_score(&a.controls)).collect();
    let total: u32 = scores.iter().map(|s| u32::from(*s)).sum();
    let average_risk = if scores.is_empty() {
        0
    } else {
        (f64::from(total) / scores.len() as f64).round() as u8
    };

    DashboardSummary {
        asset_count: assets.len(),
        high_risk_assets: scores.iter().filter(|s| **s >= HIGH_RISK_THRESHOLD).count(),
        average_risk,
        implemented_controls: assets
            .iter()
            .flat_map(|a| a.controls.iter())
            .filter(|c| c.status == ControlStatus::Implemented)
            .count(),
        open_tasks: derive_tasks(assets).len(),
    }
}
