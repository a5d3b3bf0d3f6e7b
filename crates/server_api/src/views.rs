use posture::{derive_tasks, score_asset, score_assets, summarize};
use shared::{
    domain::{Caller, Control, RemediationTask, Role, View},
    error::ApiError,
    protocol::{NavigationResponse, RiskDashboard, ScoredAsset},
};

use crate::{store_failure, ApiContext};

pub fn navigation(caller: &Caller) -> NavigationResponse {
    NavigationResponse {
        role: caller.role,
        views: View::visible_to(caller.role),
    }
}

pub async fn risk_dashboard(ctx: &ApiContext) -> Result<RiskDashboard, ApiError> {
    let assets = ctx
        .store
        .list_assets()
        .await
        .map_err(|e| store_failure("load assets", e))?;
    Ok(RiskDashboard {
        summary: summarize(&assets),
        assets: score_assets(&assets),
    })
}

/// Assets in store order, each with a freshly computed score.
pub async fn list_assets(ctx: &ApiContext) -> Result<Vec<ScoredAsset>, ApiError> {
    let assets = ctx
        .store
        .list_assets()
        .await
        .map_err(|e| store_failure("load assets", e))?;
    Ok(assets.into_iter().map(score_asset).collect())
}

pub async fn list_controls(ctx: &ApiContext) -> Result<Vec<Control>, ApiError> {
    ctx.store
        .list_controls()
        .await
        .map_err(|e| store_failure("load the control catalog", e))
}

pub async fn list_tasks(ctx: &ApiContext) -> Result<Vec<RemediationTask>, ApiError> {
    let assets = ctx
        .store
        .list_assets()
        .await
        .map_err(|e| store_failure("load assets", e))?;
    Ok(derive_tasks(&assets))
}

pub async fn admin_catalog(ctx: &ApiContext, caller: &Caller) -> Result<Vec<Control>, ApiError> {
    if caller.role != Role::Admin {
        return Err(ApiError::forbidden(
            "Access denied: this panel is restricted to the admin role.",
        ));
    }
    list_controls(ctx).await
}
