use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::DateTime;
use shared::domain::{AssetType, Criticality, Role, Severity, View};
use shared::protocol::RiskBand;
use storage::{Collection, StoreSnapshot, Storage};
use tokio::sync::broadcast;

/// Wraps the SQLite store and counts every write that reaches it.
struct RecordingStore {
    inner: Storage,
    writes: AtomicUsize,
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        self.inner.list_assets().await
    }

    async fn list_controls(&self) -> Result<Vec<Control>, StoreError> {
        self.inner.list_controls().await
    }

    async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.create_asset(asset).await
    }

    async fn update_asset_controls(
        &self,
        asset_id: &AssetId,
        controls: &[AppliedControl],
        last_review: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .update_asset_controls(asset_id, controls, last_review)
            .await
    }

    async fn create_control(&self, control: &Control) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.create_control(control).await
    }

    async fn delete_control(&self, control_id: &ControlId) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_control(control_id).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreSnapshot> {
        self.inner.subscribe()
    }
}

/// Backend that rejects every request.
struct UnavailableStore {
    events: broadcast::Sender<StoreSnapshot>,
}

impl UnavailableStore {
    fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }

    fn rejection(id: &str) -> StoreError {
        StoreError::Malformed {
            collection: Collection::Assets,
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl DocumentStore for UnavailableStore {
    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        Err(Self::rejection("*"))
    }

    async fn list_controls(&self) -> Result<Vec<Control>, StoreError> {
        Err(Self::rejection("*"))
    }

    async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        Err(Self::rejection(asset.id.as_str()))
    }

    async fn update_asset_controls(
        &self,
        asset_id: &AssetId,
        _controls: &[AppliedControl],
        _last_review: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(Self::rejection(asset_id.as_str()))
    }

    async fn create_control(&self, control: &Control) -> Result<(), StoreError> {
        Err(Self::rejection(control.id.as_str()))
    }

    async fn delete_control(&self, control_id: &ControlId) -> Result<(), StoreError> {
        Err(Self::rejection(control_id.as_str()))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreSnapshot> {
        self.events.subscribe()
    }
}

fn admin() -> Caller {
    Caller::new("admin-uid", Role::Admin)
}

fn engineer() -> Caller {
    Caller::new("engineer-uid", Role::Engineer)
}

fn guest() -> Caller {
    Caller::new("anonymous", Role::Guest)
}

async fn setup() -> (ApiContext, Arc<RecordingStore>) {
    let storage = Storage::new("sqlite::memory:", "gateway-test")
        .await
        .expect("db");
    let store = Arc::new(RecordingStore {
        inner: storage,
        writes: AtomicUsize::new(0),
    });
    (ApiContext::new(store.clone()), store)
}

fn boiler() -> NewAsset {
    NewAsset {
        name: "Boiler 1 Controller".into(),
        asset_type: AssetType::Plc,
        location: "Plant Floor 3".into(),
        criticality: Criticality::High,
        owner: "Process Engineering".into(),
    }
}

fn mfa() -> NewControl {
    NewControl {
        name: "Multi-factor authentication".into(),
        description: "Require MFA for remote engineering access".into(),
        severity: Severity::High,
    }
}

async fn seeded(ctx: &ApiContext) -> (Asset, Control) {
    let asset = create_asset(ctx, &engineer(), boiler())
        .await
        .expect("asset")
        .record;
    let control = create_control(ctx, &admin(), mfa())
        .await
        .expect("control")
        .record;
    (asset, control)
}

#[tokio::test]
async fn engineer_creates_asset_with_empty_control_list() {
    let (ctx, _) = setup().await;
    let receipt = create_asset(&ctx, &engineer(), boiler())
        .await
        .expect("create");
    assert_eq!(receipt.record.created_by.as_str(), "engineer-uid");
    assert!(receipt.record.controls.is_empty());
    assert!(receipt.message.contains("Boiler 1 Controller"));

    let assets = list_assets(&ctx).await.expect("assets");
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].risk_score, 100);
    assert_eq!(assets[0].risk_band, RiskBand::High);
}

#[tokio::test]
async fn asset_requires_name_and_owner() {
    let (ctx, store) = setup().await;
    let mut missing_owner = boiler();
    missing_owner.owner = "   ".into();
    let err = create_asset(&ctx, &admin(), missing_owner)
        .await
        .expect_err("owner required");
    assert_eq!(err.code, ErrorCode::Validation);

    let mut missing_name = boiler();
    missing_name.name.clear();
    let err = create_asset(&ctx, &admin(), missing_name)
        .await
        .expect_err("name required");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn guest_mutations_are_rejected_before_reaching_the_store() {
    let (ctx, store) = setup().await;
    let (asset, control) = seeded(&ctx).await;
    let writes_before = store.writes.load(Ordering::SeqCst);

    let err = create_asset(&ctx, &guest(), boiler())
        .await
        .expect_err("guest create asset");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = create_control(&ctx, &guest(), mfa())
        .await
        .expect_err("guest create control");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = apply_control(&ctx, &guest(), &asset.id, &control.id)
        .await
        .expect_err("guest apply");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = update_control_status(
        &ctx,
        &guest(),
        &asset.id,
        &control.id,
        ControlStatus::Implemented,
    )
    .await
    .expect_err("guest update");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = update_task_status(&ctx, &guest(), &asset.id, &control.id, TaskStatus::Complete)
        .await
        .expect_err("guest task update");
    assert_eq!(err.code, ErrorCode::Forbidden);

    assert_eq!(store.writes.load(Ordering::SeqCst), writes_before);
}

#[tokio::test]
async fn engineer_cannot_manage_the_catalog() {
    let (ctx, _) = setup().await;
    let (_, control) = seeded(&ctx).await;

    let err = create_control(&ctx, &engineer(), mfa())
        .await
        .expect_err("engineer create control");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = delete_control(&ctx, &engineer(), &control.id)
        .await
        .expect_err("engineer delete control");
    assert_eq!(err.code, ErrorCode::Forbidden);
    assert_eq!(list_controls(&ctx).await.expect("controls").len(), 1);
}

#[tokio::test]
async fn control_requires_name_and_description() {
    let (ctx, _) = setup().await;
    let mut draft = mfa();
    draft.description.clear();
    let err = create_control(&ctx, &admin(), draft)
        .await
        .expect_err("description required");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn applying_control_starts_incomplete_and_stamps_review() {
    let (ctx, _) = setup().await;
    let (asset, control) = seeded(&ctx).await;

    let receipt = apply_control(&ctx, &engineer(), &asset.id, &control.id)
        .await
        .expect("apply");
    let applied = &receipt.record.controls[0];
    assert_eq!(applied.id, control.id);
    assert_eq!(applied.name, control.name);
    assert_eq!(applied.status, ControlStatus::Incomplete);
    assert!(receipt.record.last_review > asset.last_review);

    let stored = list_assets(&ctx).await.expect("assets");
    assert_eq!(stored[0].asset.controls.len(), 1);
    assert_eq!(stored[0].asset.last_review, receipt.record.last_review);
}

#[tokio::test]
async fn applying_a_present_control_is_rejected_without_duplicating() {
    let (ctx, store) = setup().await;
    let (asset, control) = seeded(&ctx).await;
    apply_control(&ctx, &engineer(), &asset.id, &control.id)
        .await
        .expect("first apply");
    let writes_before = store.writes.load(Ordering::SeqCst);

    let err = apply_control(&ctx, &admin(), &asset.id, &control.id)
        .await
        .expect_err("duplicate apply");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(err.message.contains("already applied"));

    let stored = list_assets(&ctx).await.expect("assets");
    assert_eq!(stored[0].asset.controls.len(), 1);
    assert_eq!(store.writes.load(Ordering::SeqCst), writes_before);
}

#[tokio::test]
async fn applying_unknown_control_or_asset_is_not_found() {
    let (ctx, _) = setup().await;
    let (asset, control) = seeded(&ctx).await;

    let err = apply_control(&ctx, &engineer(), &asset.id, &ControlId::from("nope"))
        .await
        .expect_err("unknown control");
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = apply_control(&ctx, &engineer(), &AssetId::from("nope"), &control.id)
        .await
        .expect_err("unknown asset");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn implementing_controls_lowers_risk_and_clears_tasks() {
    let (ctx, _) = setup().await;
    let (asset, control) = seeded(&ctx).await;
    apply_control(&ctx, &engineer(), &asset.id, &control.id)
        .await
        .expect("apply");

    let tasks = list_tasks(&ctx).await.expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::ToDo);
    assert_eq!(tasks[0].id, format!("{}-{}", asset.id, control.id));

    update_control_status(
        &ctx,
        &engineer(),
        &asset.id,
        &control.id,
        ControlStatus::Implemented,
    )
    .await
    .expect("implement");

    assert!(list_tasks(&ctx).await.expect("tasks").is_empty());
    let dashboard = risk_dashboard(&ctx).await.expect("dashboard");
    assert_eq!(dashboard.assets[0].risk_score, 90);
    assert_eq!(dashboard.assets[0].risk_band, RiskBand::High);
    assert_eq!(dashboard.summary.implemented_controls, 1);
    assert_eq!(dashboard.summary.high_risk_assets, 1);
}

#[tokio::test]
async fn task_status_is_written_back_onto_the_asset() {
    let (ctx, _) = setup().await;
    let (asset, control) = seeded(&ctx).await;
    apply_control(&ctx, &engineer(), &asset.id, &control.id)
        .await
        .expect("apply");

    let receipt = update_task_status(
        &ctx,
        &engineer(),
        &asset.id,
        &control.id,
        TaskStatus::InProgress,
    )
    .await
    .expect("task update");
    assert_eq!(receipt.record.controls[0].status, ControlStatus::Planned);

    let tasks = list_tasks(&ctx).await.expect("tasks");
    assert_eq!(tasks[0].status, TaskStatus::InProgress);

    update_task_status(&ctx, &admin(), &asset.id, &control.id, TaskStatus::Complete)
        .await
        .expect("complete");
    assert!(list_tasks(&ctx).await.expect("tasks").is_empty());
}

#[tokio::test]
async fn status_update_for_unapplied_control_is_not_found() {
    let (ctx, _) = setup().await;
    let (asset, control) = seeded(&ctx).await;
    let err = update_control_status(
        &ctx,
        &engineer(),
        &asset.id,
        &control.id,
        ControlStatus::Planned,
    )
    .await
    .expect_err("control not applied");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn deleting_catalog_control_keeps_embedded_copies() {
    let (ctx, _) = setup().await;
    let (asset, control) = seeded(&ctx).await;
    apply_control(&ctx, &engineer(), &asset.id, &control.id)
        .await
        .expect("apply");

    let receipt = delete_control(&ctx, &admin(), &control.id)
        .await
        .expect("delete");
    assert_eq!(receipt.record.id, control.id);

    assert!(list_controls(&ctx).await.expect("controls").is_empty());
    assert_eq!(list_tasks(&ctx).await.expect("tasks").len(), 1);
}

#[tokio::test]
async fn store_failures_surface_as_internal_errors() {
    let ctx = ApiContext::new(Arc::new(UnavailableStore::new()));

    let err = create_asset(&ctx, &admin(), boiler())
        .await
        .expect_err("store down");
    assert_eq!(err.code, ErrorCode::Internal);
    assert!(err.message.starts_with("Failed to add asset"));

    let err = risk_dashboard(&ctx).await.expect_err("store down");
    assert_eq!(err.code, ErrorCode::Internal);
}

#[tokio::test]
async fn admin_panel_is_admin_only() {
    let (ctx, _) = setup().await;
    seeded(&ctx).await;

    assert_eq!(admin_catalog(&ctx, &admin()).await.expect("admin").len(), 1);
    let err = admin_catalog(&ctx, &engineer())
        .await
        .expect_err("engineer");
    assert_eq!(err.code, ErrorCode::Forbidden);

    assert!(navigation(&admin()).views.contains(&View::Admin));
    assert!(!navigation(&guest()).views.contains(&View::Admin));
}
