use std::sync::Arc;

use axum::{
    extract::{Json, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::bus::EventBus;
use crate::filters::FilterState;
use crate::i18n::{self, Language};
use crate::manager::{
    DeleteOutcome, LoginReply, LookupReply, Manager, SearchQuery, SearchReply, SendOutcome,
};
use crate::store::{self, Store};

// -----------------------------------------------------------------------------
// Request bodies
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LookupBody {
    #[serde(default)]
    pub tickbarr: String,
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectThreadBody {
    pub group_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteThreadBody {
    pub group_id: i64,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrefsBody {
    pub theme: Option<String>,
    pub language: Option<String>,
}

// -----------------------------------------------------------------------------
// Server state
// -----------------------------------------------------------------------------

pub struct AppState {
    pub manager: Arc<Manager>,
    pub bus: Arc<EventBus>,
    pub store: Arc<Store>,
}

/// Local HTTP surface for the dashboard UI. Component failures are JSON
/// `{success:false, error}` replies, never 5xx; the UI renders them inline.
pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(manager: Arc<Manager>, bus: Arc<EventBus>, store: Arc<Store>) -> Self {
        Self {
            state: Arc::new(AppState {
                manager,
                bus,
                store,
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/login", post(login_handler))
            .route("/api/logout", post(logout_handler))
            .route("/api/session", get(session_handler))
            .route("/api/lookup", post(lookup_handler))
            .route("/api/search", post(search_handler))
            .route("/api/chat/messages", get(messages_handler))
            .route("/api/chat/send", post(send_handler))
            .route("/api/chat/threads", get(threads_handler))
            .route("/api/chat/threads/new", post(new_thread_handler))
            .route("/api/chat/threads/select", post(select_thread_handler))
            .route("/api/chat/threads/delete", post(delete_thread_handler))
            .route("/api/filters", get(filters_handler))
            .route("/api/filters/apply", post(apply_filters_handler))
            .route("/api/filters/clear", post(clear_filters_handler))
            .route("/api/prefs", get(prefs_handler).post(set_prefs_handler))
            .route("/api/events", get(events_handler))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
    }
}

fn err(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "success": false, "error": message.into() }))
}

// -----------------------------------------------------------------------------
// Auth
// -----------------------------------------------------------------------------

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Json<Value> {
    if body.username.trim().is_empty() || body.password.is_empty() {
        return err("Missing username or password");
    }

    match state.manager.login(body.username.trim(), &body.password).await {
        Ok(LoginReply::LoggedIn(identity)) => Json(json!({
            "success": true,
            "usercode": identity.usercode,
            "username": identity.username,
        })),
        Ok(LoginReply::Rejected(message)) => err(message),
        Err(e) => {
            error!("Login failed: {:#}", e);
            err(i18n::connection_error(state.manager.language()))
        }
    }
}

async fn logout_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.manager.logout().await;
    Json(json!({ "success": true }))
}

async fn session_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let identity = state.manager.identity();
    let theme = state
        .store
        .get(store::KEY_THEME)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| "light".to_string());

    Json(json!({
        "loggedIn": identity.is_some(),
        "usercode": identity.as_ref().map(|i| i.usercode.clone()),
        "username": identity.as_ref().map(|i| i.username.clone()),
        "activeGroup": state.manager.active_group(),
        "language": state.manager.language().code(),
        "theme": theme,
    }))
}

// -----------------------------------------------------------------------------
// Ticket lookup and advanced search
// -----------------------------------------------------------------------------

async fn lookup_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LookupBody>,
) -> Json<Value> {
    let tickbarr = body.tickbarr.trim();
    if tickbarr.is_empty() {
        return err("Missing tickbarr");
    }

    match state.manager.lookup(tickbarr).await {
        Ok(LookupReply::Found {
            tickbarr,
            hash,
            record,
        }) => Json(json!({
            "success": true,
            "tickbarr": tickbarr,
            "hash": hash,
            "record": record,
        })),
        Ok(LookupReply::NotFound { message }) => err(message),
        Err(e) => {
            error!("Lookup failed: {:#}", e);
            err(i18n::connection_error(state.manager.language()))
        }
    }
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(query): Json<SearchQuery>,
) -> Json<Value> {
    match state.manager.search(&query).await {
        Ok(SearchReply::Results(results)) => Json(
            serde_json::to_value(&results).unwrap_or_else(|_| json!({ "success": false })),
        ),
        Ok(SearchReply::MissingFilters { message }) => err(message),
        Err(e) => {
            error!("Search failed: {:#}", e);
            err(i18n::connection_error(state.manager.language()))
        }
    }
}

// -----------------------------------------------------------------------------
// Chat
// -----------------------------------------------------------------------------

async fn messages_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "activeGroup": state.manager.active_group(),
        "messages": state.manager.transcript(),
    }))
}

async fn send_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendBody>,
) -> Json<Value> {
    match state.manager.send_message(&body.text).await {
        SendOutcome::Sent => Json(json!({ "success": true })),
        SendOutcome::Busy => err("A message is already being processed"),
        SendOutcome::EmptyInput => err("Empty message"),
        SendOutcome::NotAuthenticated => err("Not logged in"),
    }
}

async fn threads_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "activeGroup": state.manager.active_group(),
        "conversations": state.manager.conversations(),
    }))
}

async fn new_thread_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    match state.manager.start_new_thread().await {
        Some(group) => Json(json!({ "success": true, "conversationGroup": group })),
        None => err("Could not start a new conversation"),
    }
}

async fn select_thread_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectThreadBody>,
) -> Json<Value> {
    state.manager.select_thread(body.group_id).await;
    Json(json!({
        "success": true,
        "activeGroup": state.manager.active_group(),
        "messages": state.manager.transcript(),
    }))
}

async fn delete_thread_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteThreadBody>,
) -> Json<Value> {
    match state.manager.delete_thread(body.group_id, body.confirmed).await {
        DeleteOutcome::Deleted => Json(json!({ "success": true })),
        DeleteOutcome::NeedsConfirmation => err("Deletion requires confirmation"),
        DeleteOutcome::Failed => err("Could not delete the conversation"),
        DeleteOutcome::NotAuthenticated => err("Not logged in"),
    }
}

// -----------------------------------------------------------------------------
// Filters
// -----------------------------------------------------------------------------

async fn filters_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "filters": state.manager.filters_view(),
    }))
}

async fn apply_filters_handler(
    State(state): State<Arc<AppState>>,
    Json(snapshot): Json<FilterState>,
) -> Json<Value> {
    state.manager.apply_filters(snapshot);
    Json(json!({ "success": true }))
}

async fn clear_filters_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.manager.clear_filters();
    Json(json!({ "success": true }))
}

// -----------------------------------------------------------------------------
// Preferences
// -----------------------------------------------------------------------------

async fn prefs_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let theme = state.store.get(store::KEY_THEME).await.ok().flatten();
    Json(json!({
        "theme": theme.unwrap_or_else(|| "light".to_string()),
        "language": state.manager.language().code(),
    }))
}

async fn set_prefs_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PrefsBody>,
) -> Json<Value> {
    if let Some(theme) = &body.theme {
        if let Err(e) = state.store.set(store::KEY_THEME, theme).await {
            error!("Failed to persist the theme: {:#}", e);
        }
    }
    if let Some(code) = &body.language {
        let language = Language::from_code(code);
        state.manager.set_language(language);
        if let Err(e) = state.store.set(store::KEY_LANGUAGE, language.code()).await {
            error!("Failed to persist the language: {:#}", e);
        }
    }
    Json(json!({ "success": true }))
}

// -----------------------------------------------------------------------------
// Event stream
// -----------------------------------------------------------------------------

pub async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::BoxError>>> {
    info!("New SSE connection established");

    let mut rx = state.bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(payload) => yield Ok(SseEvent::default().data(payload)),
                    Err(e) => error!("Failed to serialize event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The UI refetches on reconnect; dropped events are fine.
                    error!("SSE receiver lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
