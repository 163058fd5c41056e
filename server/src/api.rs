use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bell_protocol::{AccountView, RoomSummary};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    auth::{self, SessionClaims},
    config::Config,
    credentials::CredentialIssuer,
    error::{BellError, BellResult},
    gateway::Gateway,
    rooms::{RoomDetails, RoomRegistry},
    users::{SignedIn, UserRegistry},
    ws,
};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub gateway: Arc<Gateway>,
    pub issuer: CredentialIssuer,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let secret = match &config.jwt_secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                warn!("no JWT secret configured; using a random one, sessions end on restart");
                let mut secret = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                secret
            }
        };
        if config.media.is_none() {
            warn!("media API keys not configured; /api/token will fail");
        }
        let users = Arc::new(UserRegistry::new(secret));
        let rooms = Arc::new(RoomRegistry::new(config.rooms.clone()));
        let gateway = Arc::new(Gateway::new(users.clone(), rooms.clone()));
        Self {
            users,
            rooms,
            gateway,
            issuer: CredentialIssuer::new(config.media.clone()),
            started: Instant::now(),
        }
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/rooms", post(create_room))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms/:id", get(room_details))
        .route("/api/token", post(issue_token))
        .route("/ws", get(ws::ws_handler))
        .merge(authed)
        .with_state(state)
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, BellError> {
    let claims = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(auth::bearer_token)
        .and_then(|token| state.users.validate_session_token(token));
    let Some(claims) = claims else {
        return Err(BellError::Auth("missing or invalid token".into()));
    };
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResp {
    status: &'static str,
    uptime: u64,
    active_rooms: usize,
    active_users: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResp> {
    Json(HealthResp {
        status: "ok",
        uptime: state.started.elapsed().as_secs(),
        active_rooms: state.rooms.active_count(),
        active_users: state.users.online_count(),
    })
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RegisterReq {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterReq>,
) -> BellResult<(StatusCode, Json<SignedIn>)> {
    let signed_in = state
        .users
        .register(
            req.username.as_deref().unwrap_or_default(),
            req.email.as_deref().unwrap_or_default(),
            req.password.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(signed_in)))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LoginReq {
    email: Option<String>,
    password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginReq>,
) -> BellResult<Json<SignedIn>> {
    let signed_in = state
        .users
        .login(
            req.email.as_deref().unwrap_or_default(),
            req.password.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(signed_in))
}

#[derive(Serialize)]
struct UserResp {
    user: AccountView,
}

async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> BellResult<Json<UserResp>> {
    let user = state
        .users
        .get(&claims.sub)
        .ok_or_else(|| BellError::Auth("account no longer exists".into()))?;
    Ok(Json(UserResp { user }))
}

#[derive(Serialize)]
struct RoomsResp {
    rooms: Vec<RoomSummary>,
}

async fn list_rooms(State(state): State<AppState>) -> Json<RoomsResp> {
    Json(RoomsResp {
        rooms: state.rooms.list_active(),
    })
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct CreateRoomReq {
    room_name: Option<String>,
    is_private: Option<bool>,
}

#[derive(Serialize)]
struct RoomResp {
    room: RoomSummary,
}

fn generated_room_name() -> String {
    format!("room-{:08x}", rand::random::<u32>())
}

async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<CreateRoomReq>,
) -> BellResult<(StatusCode, Json<RoomResp>)> {
    let name = req
        .room_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(generated_room_name);
    let room = state
        .rooms
        .create(&name, claims.sub, req.is_private.unwrap_or(false))?;
    Ok((StatusCode::CREATED, Json(RoomResp { room })))
}

async fn room_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BellResult<Json<RoomDetails>> {
    state
        .rooms
        .get(&id)
        .map(Json)
        .ok_or_else(|| BellError::NotFound(format!("room {id}")))
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct TokenReq {
    room_name: Option<String>,
    participant_name: Option<String>,
    metadata: Option<Value>,
}

#[derive(Serialize)]
struct TokenResp {
    token: String,
}

async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenReq>,
) -> BellResult<impl IntoResponse> {
    let token = state.issuer.issue(
        req.room_name.as_deref().unwrap_or_default(),
        req.participant_name.as_deref().unwrap_or_default(),
        req.metadata.as_ref(),
    )?;
    Ok(Json(TokenResp { token }))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler available; run until the process is killed
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Run the HTTP server on the configured address until ctrl-c.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind))?;
    let state = AppState::new(&config);
    info!(%addr, ?config, "bell listening");
    axum::Server::try_bind(&addr)
        .with_context(|| format!("binding {addr}"))?
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    Ok(())
}
