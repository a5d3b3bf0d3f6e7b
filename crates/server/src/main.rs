use std::{net::SocketAddr, sync::Arc};

use axum::{
    async_trait,
    extract::{
        ws::{Message, WebSocket},
        FromRequestParts, Path, Query, State, WebSocketUpgrade,
    },
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use identity::{AuthEvent, IdentityError, IdentityProvider, LocalIdentityProvider, SessionConfig};
use posture::score_assets;
use serde::Deserialize;
use server_api::{
    admin_catalog, apply_control, create_asset, create_control, delete_control, list_assets,
    list_controls, list_tasks, navigation, risk_dashboard, update_control_status,
    update_task_status, ApiContext,
};
use shared::{
    domain::{Asset, AssetId, Caller, Control, ControlId, RemediationTask, View},
    error::{ApiError, ErrorCode},
    protocol::{
        ApplyControlRequest, CreateAssetRequest, CreateControlRequest, MutationReceipt,
        NavigationResponse, RiskDashboard, ScoredAsset, ServerEvent, SessionResponse,
        SignInRequest, UpdateControlStatusRequest, UpdateTaskStatusRequest,
    },
};
use storage::{Storage, StoreSnapshot};
use tokio::sync::broadcast::error::RecvError;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    identity: Arc<dyn IdentityProvider>,
    storage: Storage,
}

type HttpError = (StatusCode, Json<ApiError>);
type HttpResult<T> = Result<T, HttpError>;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url, &settings.app_id)
        .await
        .map_err(|error| {
            error!(
                %database_url,
                %error,
                "failed to open SQLite database; verify parent directory exists and permissions are correct"
            );
            error
        })?;
    info!(
        namespace = storage.namespace(),
        configured_users = settings.roles.len(),
        "document store ready"
    );

    let identity = LocalIdentityProvider::new(
        SessionConfig {
            issuer: settings.app_id.clone(),
            secret: settings.session_secret,
            ttl_seconds: settings.session_ttl_seconds,
            provider_secret: settings.provider_secret,
        },
        settings.roles,
    );
    let state = AppState {
        api: ApiContext::new(Arc::new(storage.clone())),
        identity: Arc::new(identity),
        storage,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/session", post(sign_in).delete(sign_out))
        .route("/views", get(http_navigation))
        .route("/dashboard", get(http_dashboard))
        .route("/assets", get(http_list_assets).post(http_create_asset))
        .route("/assets/:asset_id/controls", post(http_apply_control))
        .route(
            "/assets/:asset_id/controls/:control_id",
            put(http_update_control_status),
        )
        .route("/controls", get(http_list_controls).post(http_create_control))
        .route("/controls/:control_id", delete(http_delete_control))
        .route("/tasks", get(http_list_tasks))
        .route("/tasks/:asset_id/:control_id", put(http_update_task_status))
        .route("/admin/controls", get(http_admin_catalog))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Caller resolved from the session token in the `Authorization: Bearer`
/// header, or the `token` query parameter for WebSocket upgrades.
struct Authenticated(Caller);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(parts) else {
            return Err(http_error(ApiError::new(
                ErrorCode::Unauthorized,
                "Sign in to continue.",
            )));
        };
        let caller = state.identity.authenticate(&token).await.map_err(|e| {
            debug!(error = %e, "request rejected");
            http_error(ApiError::new(
                ErrorCode::Unauthorized,
                "Your session is no longer valid. Sign in again.",
            ))
        })?;
        Ok(Self(caller))
    }
}

fn session_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    if from_header.is_some() {
        return from_header;
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|v| !v.is_empty())
}

fn http_error(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> HttpResult<&'static str> {
    state.storage.health_check().await.map_err(|e| {
        error!(error = %e, "health check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Internal, "Document store unavailable.")),
        )
    })?;
    Ok("ok")
}

async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignInRequest>,
) -> HttpResult<Json<SessionResponse>> {
    let session = state
        .identity
        .sign_in(req.custom_token.as_deref())
        .await
        .map_err(|e| match e {
            IdentityError::InvalidCredential(_) => {
                debug!(error = %e, "sign-in rejected");
                http_error(ApiError::new(
                    ErrorCode::Unauthorized,
                    "The identity provider token was rejected.",
                ))
            }
            e => {
                error!(error = %e, "failed to issue session");
                http_error(ApiError::new(ErrorCode::Internal, "Failed to sign in."))
            }
        })?;

    let role = session.caller.role;
    Ok(Json(SessionResponse {
        user_id: session.caller.user_id,
        role,
        token: session.token,
        expires_at: session.expires_at,
        views: View::visible_to(role),
    }))
}

async fn sign_out(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> HttpResult<StatusCode> {
    state
        .identity
        .sign_out(&caller.user_id)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %caller.user_id, "sign-out failed");
            http_error(ApiError::new(ErrorCode::Internal, "Failed to sign out."))
        })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_navigation(Authenticated(caller): Authenticated) -> Json<NavigationResponse> {
    Json(navigation(&caller))
}

async fn http_dashboard(
    State(state): State<Arc<AppState>>,
    Authenticated(_caller): Authenticated,
) -> HttpResult<Json<RiskDashboard>> {
    let dashboard = risk_dashboard(&state.api).await.map_err(http_error)?;
    Ok(Json(dashboard))
}

async fn http_list_assets(
    State(state): State<Arc<AppState>>,
    Authenticated(_caller): Authenticated,
) -> HttpResult<Json<Vec<ScoredAsset>>> {
    let assets = list_assets(&state.api).await.map_err(http_error)?;
    Ok(Json(assets))
}

async fn http_create_asset(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(req): Json<CreateAssetRequest>,
) -> HttpResult<(StatusCode, Json<MutationReceipt<Asset>>)> {
    let receipt = create_asset(&state.api, &caller, req)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn http_apply_control(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(asset_id): Path<AssetId>,
    Json(req): Json<ApplyControlRequest>,
) -> HttpResult<Json<MutationReceipt<Asset>>> {
    let receipt = apply_control(&state.api, &caller, &asset_id, &req.control_id)
        .await
        .map_err(http_error)?;
    Ok(Json(receipt))
}

async fn http_update_control_status(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path((asset_id, control_id)): Path<(AssetId, ControlId)>,
    Json(req): Json<UpdateControlStatusRequest>,
) -> HttpResult<Json<MutationReceipt<Asset>>> {
    let receipt = update_control_status(&state.api, &caller, &asset_id, &control_id, req.status)
        .await
        .map_err(http_error)?;
    Ok(Json(receipt))
}

async fn http_list_controls(
    State(state): State<Arc<AppState>>,
    Authenticated(_caller): Authenticated,
) -> HttpResult<Json<Vec<Control>>> {
    let controls = list_controls(&state.api).await.map_err(http_error)?;
    Ok(Json(controls))
}

async fn http_create_control(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(req): Json<CreateControlRequest>,
) -> HttpResult<(StatusCode, Json<MutationReceipt<Control>>)> {
    let receipt = create_control(&state.api, &caller, req)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn http_delete_control(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(control_id): Path<ControlId>,
) -> HttpResult<Json<MutationReceipt<Control>>> {
    let receipt = delete_control(&state.api, &caller, &control_id)
        .await
        .map_err(http_error)?;
    Ok(Json(receipt))
}

async fn http_list_tasks(
    State(state): State<Arc<AppState>>,
    Authenticated(_caller): Authenticated,
) -> HttpResult<Json<Vec<RemediationTask>>> {
    let tasks = list_tasks(&state.api).await.map_err(http_error)?;
    Ok(Json(tasks))
}

async fn http_update_task_status(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path((asset_id, control_id)): Path<(AssetId, ControlId)>,
    Json(req): Json<UpdateTaskStatusRequest>,
) -> HttpResult<Json<MutationReceipt<Asset>>> {
    let receipt = update_task_status(&state.api, &caller, &asset_id, &control_id, req.status)
        .await
        .map_err(http_error)?;
    Ok(Json(receipt))
}

async fn http_admin_catalog(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> HttpResult<Json<Vec<Control>>> {
    let controls = admin_catalog(&state.api, &caller)
        .await
        .map_err(http_error)?;
    Ok(Json(controls))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket, caller))
}

/// Pushes the current assets and catalog, then every subsequent collection
/// snapshot, until the client disconnects or the caller signs out.
async fn ws_connection(state: Arc<AppState>, socket: WebSocket, caller: Caller) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before the initial read so no write between the two is missed.
    let mut changes = state.api.store.subscribe();
    let mut auth_events = state.identity.subscribe_events();
    let initial = initial_events(&state.api).await;
    let user_id = caller.user_id;
    info!(user_id = %user_id, "live view subscribed");

    let send_task = tokio::spawn(async move {
        for event in &initial {
            if send_event(&mut sender, event).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(snapshot) => {
                        if send_event(&mut sender, &snapshot_event(snapshot)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(user_id = %user_id, skipped, "live view lagged behind store changes");
                    }
                    Err(RecvError::Closed) => break,
                },
                auth = auth_events.recv() => match auth {
                    Ok(AuthEvent::SignedOut { user_id: signed_out }) if signed_out == user_id => {
                        debug!(user_id = %user_id, "closing live view after sign-out");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

async fn initial_events(ctx: &ApiContext) -> Vec<ServerEvent> {
    let assets = match risk_dashboard(ctx).await {
        Ok(dashboard) => ServerEvent::AssetsChanged {
            assets: dashboard.assets,
        },
        Err(e) => ServerEvent::Error(e),
    };
    let controls = match list_controls(ctx).await {
        Ok(controls) => ServerEvent::ControlsChanged { controls },
        Err(e) => ServerEvent::Error(e),
    };
    vec![assets, controls]
}

fn snapshot_event(snapshot: StoreSnapshot) -> ServerEvent {
    match snapshot {
        StoreSnapshot::Assets(assets) => ServerEvent::AssetsChanged {
            assets: score_assets(&assets),
        },
        StoreSnapshot::Controls(controls) => ServerEvent::ControlsChanged { controls },
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to encode live view event");
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
