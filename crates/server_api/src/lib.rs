//! Role-gated mutations and read views over the collaborative document store.
//!
//! Every mutation checks the caller's capability before touching the store,
//! validates against the latest collection snapshot, and performs exactly one
//! write. Failures of any kind are returned once as an [`ApiError`]; nothing is
//! retried or queued.

use std::sync::Arc;

use chrono::Utc;
use posture::control_status_for;
use shared::{
    domain::{
        AppliedControl, Asset, AssetId, Caller, Capability, Control, ControlId, ControlStatus,
        NewAsset, NewControl, TaskStatus,
    },
    error::{ApiError, ErrorCode},
    protocol::MutationReceipt,
};
use storage::{DocumentStore, StoreError};
use tracing::{error, info, warn};

mod views;

pub use views::{admin_catalog, list_assets, list_controls, list_tasks, navigation, risk_dashboard};

#[derive(Clone)]
pub struct ApiContext {
    pub store: Arc<dyn DocumentStore>,
}

impl ApiContext {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

pub async fn create_asset(
    ctx: &ApiContext,
    caller: &Caller,
    draft: NewAsset,
) -> Result<MutationReceipt<Asset>, ApiError> {
    require(
        caller,
        Capability::EditAssets,
        "You must be an Admin or Engineer to add assets.",
    )?;
    let name = draft.name.trim();
    let owner = draft.owner.trim();
    if name.is_empty() || owner.is_empty() {
        return Err(ApiError::validation("Asset name and owner are required."));
    }

    let now = Utc::now();
    let asset = Asset {
        id: AssetId::generate(),
        name: name.to_string(),
        asset_type: draft.asset_type,
        location: draft.location.trim().to_string(),
        criticality: draft.criticality,
        owner: owner.to_string(),
        last_review: now,
        created_by: caller.user_id.clone(),
        created_at: now,
        controls: Vec::new(),
    };
    ctx.store
        .create_asset(&asset)
        .await
        .map_err(|e| store_failure("add asset", e))?;

    info!(asset_id = %asset.id, user_id = %caller.user_id, "asset created");
    let message = format!("Asset \"{}\" added successfully.", asset.name);
    Ok(MutationReceipt::new(asset, message))
}

pub async fn create_control(
    ctx: &ApiContext,
    caller: &Caller,
    draft: NewControl,
) -> Result<MutationReceipt<Control>, ApiError> {
    require(
        caller,
        Capability::ManageCatalog,
        "Only Admins can add new global controls.",
    )?;
    let name = draft.name.trim();
    let description = draft.description.trim();
    if name.is_empty() || description.is_empty() {
        return Err(ApiError::validation(
            "Control name and description are required.",
        ));
    }

    let control = Control {
        id: ControlId::generate(),
        name: name.to_string(),
        description: description.to_string(),
        severity: draft.severity,
        created_by: caller.user_id.clone(),
        created_at: Utc::now(),
    };
    ctx.store
        .create_control(&control)
        .await
        .map_err(|e| store_failure("add control", e))?;

    info!(control_id = %control.id, user_id = %caller.user_id, "catalog control created");
    let message = format!("New control \"{}\" added successfully.", control.name);
    Ok(MutationReceipt::new(control, message))
}

/// Removes a control from the catalog. Assets that already embed a copy keep it.
pub async fn delete_control(
    ctx: &ApiContext,
    caller: &Caller,
    control_id: &ControlId,
) -> Result<MutationReceipt<Control>, ApiError> {
    require(caller, Capability::ManageCatalog, "Only Admins can delete controls.")?;
    let control = find_catalog_control(ctx, control_id).await?;

    ctx.store
        .delete_control(control_id)
        .await
        .map_err(|e| store_failure("delete control", e))?;

    info!(control_id = %control.id, user_id = %caller.user_id, "catalog control deleted");
    let message = format!("Control \"{}\" deleted successfully.", control.name);
    Ok(MutationReceipt::new(control, message))
}

pub async fn apply_control(
    ctx: &ApiContext,
    caller: &Caller,
    asset_id: &AssetId,
    control_id: &ControlId,
) -> Result<MutationReceipt<Asset>, ApiError> {
    require(
        caller,
        Capability::EditAssets,
        "Only Admins or Engineers can apply new controls.",
    )?;
    let control = find_catalog_control(ctx, control_id).await?;
    let mut asset = find_asset(ctx, asset_id).await?;
    if asset.has_control(control_id) {
        return Err(ApiError::validation(format!(
            "Control \"{}\" is already applied to this asset.",
            control.name
        )));
    }

    let now = Utc::now();
    let mut controls = asset.controls.clone();
    controls.push(AppliedControl {
        id: control.id.clone(),
        name: control.name.clone(),
        status: ControlStatus::Incomplete,
        applied_at: now,
    });
    ctx.store
        .update_asset_controls(&asset.id, &controls, now)
        .await
        .map_err(|e| store_failure("apply control to asset", e))?;
    asset.controls = controls;
    asset.last_review = now;

    info!(asset_id = %asset.id, control_id = %control.id, user_id = %caller.user_id, "control applied");
    let message = format!(
        "Control \"{}\" applied to asset \"{}\". Status set to {}.",
        control.name,
        asset.name,
        ControlStatus::Incomplete
    );
    Ok(MutationReceipt::new(asset, message))
}

pub async fn update_control_status(
    ctx: &ApiContext,
    caller: &Caller,
    asset_id: &AssetId,
    control_id: &ControlId,
    status: ControlStatus,
) -> Result<MutationReceipt<Asset>, ApiError> {
    require(
        caller,
        Capability::EditAssets,
        "Only Admins or Engineers can update control status.",
    )?;
    let (asset, control_name) = set_control_status(ctx, caller, asset_id, control_id, status).await?;
    let message = format!("Control status for {control_name} updated to \"{status}\".");
    Ok(MutationReceipt::new(asset, message))
}

/// Task updates are written back as the matching applied-control status.
pub async fn update_task_status(
    ctx: &ApiContext,
    caller: &Caller,
    asset_id: &AssetId,
    control_id: &ControlId,
    status: TaskStatus,
) -> Result<MutationReceipt<Asset>, ApiError> {
    require(
        caller,
        Capability::EditAssets,
        "Only Admins or Engineers can update task status.",
    )?;
    let control_status = control_status_for(status);
    let (asset, control_name) =
        set_control_status(ctx, caller, asset_id, control_id, control_status).await?;
    let message = format!(
        "Task \"{control_name}\" on \"{}\" moved to \"{status}\".",
        asset.name
    );
    Ok(MutationReceipt::new(asset, message))
}

async fn set_control_status(
    ctx: &ApiContext,
    caller: &Caller,
    asset_id: &AssetId,
    control_id: &ControlId,
    status: ControlStatus,
) -> Result<(Asset, String), ApiError> {
    let mut asset = find_asset(ctx, asset_id).await?;
    let Some(index) = asset.controls.iter().position(|c| &c.id == control_id) else {
        return Err(ApiError::not_found(format!(
            "Control {control_id} is not applied to asset \"{}\".",
            asset.name
        )));
    };

    let now = Utc::now();
    let mut controls = asset.controls.clone();
    controls[index].status = status;
    ctx.store
        .update_asset_controls(&asset.id, &controls, now)
        .await
        .map_err(|e| store_failure("update control", e))?;
    let control_name = controls[index].name.clone();
    asset.controls = controls;
    asset.last_review = now;

    info!(
        asset_id = %asset.id,
        control_id = %control_id,
        status = %status,
        user_id = %caller.user_id,
        "applied control status changed"
    );
    Ok((asset, control_name))
}

async fn find_asset(ctx: &ApiContext, asset_id: &AssetId) -> Result<Asset, ApiError> {
    ctx.store
        .list_assets()
        .await
        .map_err(|e| store_failure("load assets", e))?
        .into_iter()
        .find(|a| &a.id == asset_id)
        .ok_or_else(|| ApiError::not_found(format!("Asset {asset_id} not found.")))
}

async fn find_catalog_control(
    ctx: &ApiContext,
    control_id: &ControlId,
) -> Result<Control, ApiError> {
    ctx.store
        .list_controls()
        .await
        .map_err(|e| store_failure("load the control catalog", e))?
        .into_iter()
        .find(|c| &c.id == control_id)
        .ok_or_else(|| ApiError::not_found(format!("Control {control_id} is not in the catalog.")))
}

fn require(caller: &Caller, capability: Capability, message: &str) -> Result<(), ApiError> {
    if caller.can(capability) {
        return Ok(());
    }
    warn!(
        user_id = %caller.user_id,
        role = %caller.role,
        ?capability,
        "mutation rejected for insufficient role"
    );
    Err(ApiError::forbidden(message))
}

fn store_failure(action: &str, err: StoreError) -> ApiError {
    error!(action, error = %err, "document store request failed");
    ApiError::new(
        ErrorCode::Internal,
        format!("Failed to {action}. The document store rejected the request."),
    )
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
