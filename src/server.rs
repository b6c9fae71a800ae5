
use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Json,
};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth,
    conf::{self, ConfJwt},
    data::Storage,
    docs::ApiDoc,
    entitlement::{self, Plan},
    monitor::{self, Delivery},
    telegram::Telegram,
    transport::{Reply, Transport},
    types::{BotStats, User, UserUsage},
};

#[derive(Debug)]
pub struct ApiError(StatusCode, Json<ErrorResponse>);

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        ApiError(
            status,
            Json(ErrorResponse {
                error: status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string(),
                details: None,
            }),
        )
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(?error, "Request failed.");
        StatusCode::INTERNAL_SERVER_ERROR.into()
    }
}

impl ApiError {
    fn with_details(status: StatusCode, details: &str) -> Self {
        let ApiError(status, Json(mut body)) = ApiError::from(status);
        body.details = Some(details.to_string());
        ApiError(status, Json(body))
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError(status, body) = self;
        (status, body).into_response()
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, ToSchema)]
pub struct ErrorResponse {
    error: String,
    details: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    /// Absent when no chat transport is configured; broadcasts then fail.
    pub transport: Option<Arc<dyn Transport>>,
    pub jwt: ConfJwt,
    pub broadcast_pause: Duration,
}

#[tracing::instrument(name = "server", skip_all)]
pub async fn run() -> anyhow::Result<()> {
    let conf = conf::global();
    let dir = std::env::current_dir()?;
    tracing::info!(?dir, ?conf, "Starting.");
    let addr = SocketAddr::from((conf.addr, conf.port));
    let storage = Storage::connect().await?;
    let transport: Option<Arc<dyn Transport>> =
        if conf.telegram.token.is_empty() {
            tracing::warn!("No Telegram token configured. Broadcasts disabled.");
            None
        } else {
            Some(Arc::new(Telegram::new(&conf.telegram)?))
        };
    let state = AppState {
        storage,
        transport,
        jwt: conf.jwt.clone(),
        broadcast_pause: Duration::from_secs_f32(conf.monitor.broadcast_pause),
    };
    let service =
        router(state).into_make_service_with_connect_info::<SocketAddr>();

    match &conf.tls {
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::warn!(?addr, "Listening unencrypted.");
            axum::serve(listener, service).await?;
        }
        Some(conf::Tls {
            cert_file,
            key_file,
        }) => {
            // XXX One MUST do this manual init of rustls provider when using
            //     more than a single dep which itself depends on rustls.
            //     Here we using 2:
            //     - axum_server
            //     - reqwest
            rustls::crypto::aws_lc_rs::default_provider()
                .install_default()
                .map_err(|crypto_provider| {
                    anyhow!(
                        "Failed to install default crypto provider: \
                        {crypto_provider:?}"
                    )
                })?;

            let config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    cert_file, key_file,
                )
                .await
                .context(format!(
                    "Failed to construct RustlsConfig. \
                    cert_file={cert_file:?}, key_file={key_file:?}"
                ))?;

            tracing::info!(
                ?addr,
                ?cert_file,
                ?key_file,
                "Listening with TLS."
            );
            axum_server::bind_rustls(addr, config)
                .serve(service)
                .await?;
        }
    }

    Ok(())
}

pub fn router(state: AppState) -> axum::Router {
    let admin = axum::Router::new()
        .route("/stats", get(stats_handler))
        .route("/users", get(users_handler))
        .route("/users/:uid", get(usage_handler))
        .route("/users/:uid/plan", put(plan_handler))
        .route("/broadcast", post(broadcast_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_layer,
        ));
    axum::Router::new()
        .route("/health", get(health_check))
        .merge(admin)
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .route_layer(middleware::from_fn(req_id_layer))
        .with_state(state)
}

#[tracing::instrument(
    skip_all,
    fields(
        req_id = REQ_ID.get().req_id,
        uid = CALLER.get().uid,
    )
)]
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Bot-wide counters", body = BotStats),
        (status = 401, description = "Missing or invalid JWT token"),
        (status = 403, description = "Not an admin"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<BotStats>, ApiError> {
    tracing::info!("Handling stats request.");
    let stats = state.storage.stats().await?;
    Ok(Json(stats))
}

#[tracing::instrument(
    skip_all,
    fields(
        req_id = REQ_ID.get().req_id,
        uid = CALLER.get().uid,
    )
)]
#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "Active users, most recent first", body = Vec<User>),
        (status = 401, description = "Missing or invalid JWT token"),
        (status = 403, description = "Not an admin"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn users_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = state.storage.active_users().await?;
    tracing::info!(count = users.len(), "Listing users.");
    Ok(Json(users))
}

#[tracing::instrument(
    skip_all,
    fields(
        req_id = REQ_ID.get().req_id,
        uid = CALLER.get().uid,
        chat = chat,
    )
)]
#[utoipa::path(
    get,
    path = "/users/{uid}",
    params(
        ("uid" = i64, Path, description = "Chat id of the user")
    ),
    responses(
        (status = 200, description = "User with today's usage", body = UserUsage),
        (status = 401, description = "Missing or invalid JWT token"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such user"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn usage_handler(
    State(state): State<AppState>,
    Path(chat): Path<i64>,
) -> Result<Json<UserUsage>, ApiError> {
    let now = chrono::Utc::now();
    // Checked first: it may downgrade a lapsed plan.
    let is_premium = state.storage.is_premium_at(chat, now).await;
    let user = state
        .storage
        .user(chat)
        .await?
        .ok_or(ApiError::from(StatusCode::NOT_FOUND))?;
    let queries_today =
        state.storage.queries_count(chat, now.date_naive()).await?;
    let remaining_today =
        (!is_premium).then(|| entitlement::quota_remaining(queries_today));
    Ok(Json(UserUsage {
        user,
        is_premium,
        queries_today,
        remaining_today,
    }))
}

#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct PlanChange {
    pub plan: Plan,
    /// Paid plans only. Absent means no expiry.
    pub days: Option<u32>,
}

#[tracing::instrument(
    skip_all,
    fields(
        req_id = REQ_ID.get().req_id,
        uid = CALLER.get().uid,
        chat = chat,
    )
)]
#[utoipa::path(
    put,
    path = "/users/{uid}/plan",
    params(
        ("uid" = i64, Path, description = "Chat id of the user")
    ),
    request_body = PlanChange,
    responses(
        (status = 200, description = "Plan changed", body = User),
        (status = 400, description = "Days out of range"),
        (status = 401, description = "Missing or invalid JWT token"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such user"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn plan_handler(
    State(state): State<AppState>,
    Path(chat): Path<i64>,
    Json(change): Json<PlanChange>,
) -> Result<Json<User>, ApiError> {
    let expires_at = change
        .days
        .map(|days| {
            entitlement::expiry_after(chrono::Utc::now(), days).ok_or_else(|| {
                ApiError::with_details(StatusCode::BAD_REQUEST, "days out of range")
            })
        })
        .transpose()?;
    let found = state
        .storage
        .set_plan(chat, change.plan, expires_at)
        .await?;
    if !found {
        return Err(StatusCode::NOT_FOUND.into());
    }
    tracing::info!(plan = %change.plan, ?expires_at, "Plan changed.");
    let user = state
        .storage
        .user(chat)
        .await?
        .ok_or(ApiError::from(StatusCode::NOT_FOUND))?;
    Ok(Json(user))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    All,
    Premium,
    Free,
}

#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct BroadcastRequest {
    pub text: String,
    pub audience: Audience,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, ToSchema, PartialEq)]
pub struct BroadcastReport {
    pub sent: u64,
    pub failed: u64,
    /// Active users outside the audience.
    pub skipped: u64,
}

#[tracing::instrument(
    skip_all,
    fields(
        req_id = REQ_ID.get().req_id,
        uid = CALLER.get().uid,
    )
)]
#[utoipa::path(
    post,
    path = "/broadcast",
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "Broadcast finished", body = BroadcastReport),
        (status = 400, description = "Empty text"),
        (status = 401, description = "Missing or invalid JWT token"),
        (status = 403, description = "Not an admin"),
        (status = 500, description = "Internal server error"),
        (status = 503, description = "No chat transport configured"),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn broadcast_handler(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastReport>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::with_details(
            StatusCode::BAD_REQUEST,
            "text must not be empty",
        ));
    }
    let Some(transport) = &state.transport else {
        return Err(StatusCode::SERVICE_UNAVAILABLE.into());
    };
    let mut chats = Vec::new();
    let mut skipped = 0;
    for user in state.storage.active_users().await? {
        let wanted = match request.audience {
            Audience::All => true,
            Audience::Premium => state.storage.is_premium(user.chat_id).await,
            Audience::Free => !state.storage.is_premium(user.chat_id).await,
        };
        if wanted {
            chats.push(user.chat_id);
        } else {
            skipped += 1;
        }
    }
    let Delivery { sent, failed } = monitor::broadcast(
        transport.as_ref(),
        &chats,
        &Reply::text(request.text),
        state.broadcast_pause,
    )
    .await;
    tracing::info!(
        audience = ?request.audience,
        sent,
        failed,
        skipped,
        "Broadcast done."
    );
    Ok(Json(BroadcastReport {
        sent,
        failed,
        skipped,
    }))
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Clone)]
struct Caller {
    pub uid: String,
}

#[derive(Debug, Clone)]
struct ReqId {
    pub req_id: String,
}

impl ReqId {
    fn new() -> Self {
        let req_id = cuid2::create_id();
        Self { req_id }
    }
}

tokio::task_local! {
    static CALLER: Caller;
    static REQ_ID: ReqId;
}

async fn req_id_layer(req: Request, next: Next) -> Response {
    REQ_ID.scope(ReqId::new(), next.run(req)).await
}

async fn auth_layer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_token = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| {
            tracing::warn!("Missing Authorization header");
            StatusCode::UNAUTHORIZED
        })?
        .to_str()
        .map_err(|e| {
            tracing::warn!(error = ?e, "Invalid Authorization header encoding");
            StatusCode::UNAUTHORIZED
        })?
        .strip_prefix("Bearer ")
        .ok_or_else(|| {
            tracing::warn!("Authorization header missing 'Bearer ' prefix");
            StatusCode::UNAUTHORIZED
        })?;

    let claims = authorize(auth_token, &state.jwt)
        .ok_or(ApiError::from(StatusCode::UNAUTHORIZED))?;
    if !claims.is_admin() {
        tracing::warn!(uid = ?claims.sub, role = ?claims.role, "Not an admin.");
        return Err(StatusCode::FORBIDDEN.into());
    }
    tracing::debug!(uid = ?claims.sub, "Admin authenticated.");
    let caller = Caller { uid: claims.sub };
    Ok(CALLER.scope(caller, next.run(req)).await)
}

fn authorize(auth_token: &str, jwt_conf: &ConfJwt) -> Option<auth::Claims> {
    auth::Claims::from_str(auth_token, jwt_conf)
        .inspect_err(|error| {
            tracing::warn!(
                ?error,
                token_prefix = ?auth_token.get(..10).unwrap_or(""),
                "JWT validation failed"
            );
        })
        .ok()
}
