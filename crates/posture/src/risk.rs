use shared::{
    domain::{AppliedControl, Asset, ControlStatus},
    protocol::ScoredAsset,
};

pub use shared::protocol::RiskBand;

/// Score of an asset with no implemented mitigations.
pub const MAX_RISK: u8 = 100;
/// Reduction granted per implemented control.
pub const IMPLEMENTED_CONTROL_CREDIT: u8 = 10;
/// Scores at or above this count as high-risk on the dashboard.
pub const HIGH_RISK_THRESHOLD: u8 = 70;

/// Risk score in `[0, 100]` for an asset's applied controls.
///
/// Only `Implemented` controls lower the score; the result depends on the
/// number of implemented entries, not their order. An empty list is maximum
/// risk.
pub fn risk_score(controls: &[AppliedControl]) -> u8 {
    let implemented = controls
        .iter()
        .filter(|c| c.status == ControlStatus::Implemented)
        .count();
    let credit = implemented.saturating_mul(usize::from(IMPLEMENTED_CONTROL_CREDIT));
    usize::from(MAX_RISK).saturating_sub(credit) as u8
}

/// Attaches the recomputed score and its display band.
pub fn score_asset(asset: Asset) -> ScoredAsset {
    let risk_score = risk_score(&asset.controls);
    ScoredAsset {
        asset,
        risk_score,
        risk_band: RiskBand::for_score(risk_score),
    }
}

/// Pairs each asset with its recomputed score, highest risk first.
pub fn score_assets(assets: &[Asset]) -> Vec<ScoredAsset> {
    let mut scored: Vec<ScoredAsset> = assets
        .iter()
        .cloned()
        .map(score_asset)
        .collect();
    scored.sort_by(|a, b| b.risk_score.cmp(&a.risk_score));
    scored
}

#[cfg(test)]
#[path = "tests/risk_tests.rs"]
mod tests;
