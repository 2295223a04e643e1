//! End-to-end tests for the session, exchange and filter logic, run against
//! a stub traceability backend served on an ephemeral port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::Notify;

use trazalink::backend::BackendClient;
use trazalink::bus::{Event, EventBus};
use trazalink::chat::Role;
use trazalink::filters::FilterState;
use trazalink::gateway::GatewayClient;
use trazalink::i18n::{self, Language};
use trazalink::manager::{
    DeleteOutcome, LoginReply, LookupReply, Manager, SearchQuery, SearchReply, SendOutcome,
};
use trazalink::store::{self, Store};

// -----------------------------------------------------------------------------
// Stub backend
// -----------------------------------------------------------------------------

#[derive(Default)]
struct StubState {
    current_group: Mutex<Option<i64>>,
    history: Mutex<HashMap<i64, Vec<Value>>>,
    conversations: Mutex<Vec<Value>>,
    next_group: AtomicI64,
    chat_calls: AtomicUsize,
    new_conversation_calls: AtomicUsize,
    delete_calls: Mutex<Vec<i64>>,
    chat_reply: Mutex<Value>,
    hold_chat: AtomicBool,
    chat_gate: Notify,
    chat_garbage: AtomicBool,
    fail_new_conversation: AtomicBool,
    hash: Mutex<Option<String>>,
    filter_data_calls: AtomicUsize,
}

impl StubState {
    fn new() -> Arc<Self> {
        let stub = Self::default();
        stub.next_group.store(1, Ordering::SeqCst);
        *stub.chat_reply.lock().unwrap() =
            json!({ "success": true, "response": "The fabric is cotton." });
        Arc::new(stub)
    }

    fn set_reply(&self, reply: Value) {
        *self.chat_reply.lock().unwrap() = reply;
    }

    fn seed_history(&self, group: i64, pairs: &[(&str, &str, &str)]) {
        let entries = pairs
            .iter()
            .map(|(q, a, ts)| json!({ "question": q, "answer": a, "timestamp": ts }))
            .collect();
        self.history.lock().unwrap().insert(group, entries);
    }
}

async fn stub_login() -> Json<Value> {
    Json(json!({ "access_token": "stub-token" }))
}

async fn stub_protected() -> Json<Value> {
    Json(json!({ "username": "Ana", "usercode": "U1" }))
}

async fn stub_chat(State(stub): State<Arc<StubState>>, Json(_body): Json<Value>) -> String {
    stub.chat_calls.fetch_add(1, Ordering::SeqCst);
    if stub.hold_chat.load(Ordering::SeqCst) {
        stub.chat_gate.notified().await;
    }
    if stub.chat_garbage.load(Ordering::SeqCst) {
        return "definitely not json".to_string();
    }
    stub.chat_reply.lock().unwrap().to_string()
}

async fn stub_get_hash(
    State(stub): State<Arc<StubState>>,
    Json(_body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    match stub.hash.lock().unwrap().clone() {
        Some(hash) => (StatusCode::OK, Json(json!({ "hash": hash }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no hash for this ticket" })),
        ),
    }
}

async fn stub_filter_data(
    State(stub): State<Arc<StubState>>,
    Json(_body): Json<Value>,
) -> Json<Value> {
    stub.filter_data_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "success": true,
        "count": 1,
        "data": [{ "numecaja": "12", "esticlie": "A1" }],
    }))
}

async fn stub_gateway_record(Path(hash): Path<String>) -> Json<Value> {
    Json(json!({ "hash": hash, "product": "shirt" }))
}

async fn stub_conversations(State(stub): State<Arc<StubState>>) -> Json<Value> {
    let conversations = stub.conversations.lock().unwrap().clone();
    Json(json!({ "success": true, "conversations": conversations }))
}

async fn stub_current_group(State(stub): State<Arc<StubState>>) -> Json<Value> {
    let current = *stub.current_group.lock().unwrap();
    Json(json!({ "success": true, "conversation_group": current }))
}

async fn stub_history(
    State(stub): State<Arc<StubState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let group = body["conversation_group"].as_i64().unwrap_or_default();
    let history = stub
        .history
        .lock()
        .unwrap()
        .get(&group)
        .cloned()
        .unwrap_or_default();
    Json(json!({ "success": true, "history": history }))
}

async fn stub_new_conversation(State(stub): State<Arc<StubState>>) -> Json<Value> {
    stub.new_conversation_calls.fetch_add(1, Ordering::SeqCst);
    if stub.fail_new_conversation.load(Ordering::SeqCst) {
        return Json(json!({ "success": false }));
    }
    let group = stub.next_group.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "success": true, "conversation_group": group }))
}

async fn stub_delete_conversation(
    State(stub): State<Arc<StubState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let group = body["conversation_group"].as_i64().unwrap_or_default();
    stub.delete_calls.lock().unwrap().push(group);
    stub.conversations
        .lock()
        .unwrap()
        .retain(|c| c["group_id"].as_i64() != Some(group));
    Json(json!({ "success": true }))
}

async fn spawn_stub(stub: Arc<StubState>) -> String {
    let app = Router::new()
        .route("/login", post(stub_login))
        .route("/protected", get(stub_protected))
        .route("/get_hash", post(stub_get_hash))
        .route("/filter_data", post(stub_filter_data))
        .route("/bzz/:hash", get(stub_gateway_record))
        .route("/chat", post(stub_chat))
        .route("/chat/conversations", post(stub_conversations))
        .route("/chat/current_group", post(stub_current_group))
        .route("/chat/history", post(stub_history))
        .route("/chat/new_conversation", post(stub_new_conversation))
        .route("/chat/delete_conversation", post(stub_delete_conversation))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Builds a manager against the stub and logs in, which also runs the boot
/// sequence (current thread + conversation list).
async fn logged_in_manager(stub: Arc<StubState>) -> (Arc<Manager>, tempfile::TempDir) {
    let base = spawn_stub(stub).await;

    let dir = tempfile::tempdir().unwrap();
    let db_store = Arc::new(Store::new(dir.path().join("client.db")).await.unwrap());
    db_store.init().await.unwrap();

    let bus = Arc::new(EventBus::new());
    let backend = Arc::new(BackendClient::new(base.clone()).unwrap());
    let gateway = Arc::new(GatewayClient::new(format!("{}/bzz", base)).unwrap());

    let manager = Arc::new(Manager::new(
        backend,
        gateway,
        db_store,
        bus,
        "deepseek".to_string(),
        Language::En,
    ));

    match manager.login("user", "secret").await.unwrap() {
        LoginReply::LoggedIn(identity) => assert_eq!(identity.usercode, "U1"),
        LoginReply::Rejected(message) => panic!("login rejected: {}", message),
    }

    (manager, dir)
}

// -----------------------------------------------------------------------------
// Session manager
// -----------------------------------------------------------------------------

#[tokio::test]
async fn no_active_thread_yields_single_welcome_message() {
    let stub = StubState::new();
    let (manager, _dir) = logged_in_manager(stub).await;

    assert_eq!(manager.active_group(), None);
    let transcript = manager.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::Assistant);
    assert_eq!(transcript[0].content, i18n::welcome(Language::En));
}

#[tokio::test]
async fn empty_history_falls_back_to_welcome() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    let (manager, _dir) = logged_in_manager(stub).await;

    assert_eq!(manager.active_group(), Some(7));
    let transcript = manager.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::Assistant);
}

#[tokio::test]
async fn selecting_a_thread_reloads_its_history_in_order() {
    let stub = StubState::new();
    stub.seed_history(
        7,
        &[
            ("q1", "a1", "2025-03-01 10:00:00"),
            ("q2", "a2", "2025-03-01 10:05:00"),
        ],
    );
    let (manager, _dir) = logged_in_manager(stub).await;

    manager.select_thread(7).await;

    assert_eq!(manager.active_group(), Some(7));
    let transcript = manager.transcript();
    let contents: Vec<&str> = transcript.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["q1", "a1", "q2", "a2"]);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[1].role, Role::Assistant);
    assert_eq!(transcript[2].role, Role::User);
    assert_eq!(transcript[3].role, Role::Assistant);
}

#[tokio::test]
async fn starting_a_new_thread_resets_the_transcript() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    stub.seed_history(7, &[("q1", "a1", "2025-03-01 10:00:00")]);
    let (manager, _dir) = logged_in_manager(stub.clone()).await;
    assert_eq!(manager.transcript().len(), 2);

    let group = manager.start_new_thread().await;

    assert_eq!(group, Some(1));
    assert_eq!(manager.active_group(), Some(1));
    let transcript = manager.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::Assistant);
}

#[tokio::test]
async fn deleting_the_active_thread_resets_to_welcome() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    stub.seed_history(7, &[("q1", "a1", "2025-03-01 10:00:00")]);
    *stub.conversations.lock().unwrap() = vec![
        json!({ "group_id": 7, "first_question": "q1", "start_date": "2025-03-01 10:00" }),
        json!({ "group_id": 3, "first_question": "older", "start_date": "2025-02-01 09:00" }),
    ];
    let (manager, _dir) = logged_in_manager(stub.clone()).await;

    // Without confirmation nothing reaches the backend.
    assert_eq!(
        manager.delete_thread(7, false).await,
        DeleteOutcome::NeedsConfirmation
    );
    assert!(stub.delete_calls.lock().unwrap().is_empty());

    assert_eq!(manager.delete_thread(7, true).await, DeleteOutcome::Deleted);
    assert_eq!(manager.active_group(), None);
    let transcript = manager.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::Assistant);
    assert_eq!(*stub.delete_calls.lock().unwrap(), vec![7]);
}

#[tokio::test]
async fn deleting_a_non_active_thread_leaves_the_transcript_alone() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    stub.seed_history(7, &[("q1", "a1", "2025-03-01 10:00:00")]);
    *stub.conversations.lock().unwrap() = vec![
        json!({ "group_id": 7, "first_question": "q1", "start_date": "2025-03-01 10:00" }),
        json!({ "group_id": 3, "first_question": "older", "start_date": "2025-02-01 09:00" }),
    ];
    let (manager, _dir) = logged_in_manager(stub.clone()).await;
    let before = manager.transcript();

    assert_eq!(manager.delete_thread(3, true).await, DeleteOutcome::Deleted);

    assert_eq!(manager.active_group(), Some(7));
    let after = manager.transcript();
    assert_eq!(before.len(), after.len());
    assert_eq!(manager.conversations().len(), 1);
}

#[tokio::test]
async fn logout_clears_the_persisted_session() {
    let stub = StubState::new();
    let base = spawn_stub(stub).await;

    let dir = tempfile::tempdir().unwrap();
    let db_store = Arc::new(Store::new(dir.path().join("client.db")).await.unwrap());
    db_store.init().await.unwrap();

    let manager = Arc::new(Manager::new(
        Arc::new(BackendClient::new(base.clone()).unwrap()),
        Arc::new(GatewayClient::new(format!("{}/bzz", base)).unwrap()),
        db_store.clone(),
        Arc::new(EventBus::new()),
        "deepseek".to_string(),
        Language::En,
    ));

    manager.login("user", "secret").await.unwrap();
    assert!(db_store.get(store::KEY_TOKEN).await.unwrap().is_some());

    manager.logout().await;
    assert!(db_store.get(store::KEY_TOKEN).await.unwrap().is_none());
    assert!(manager.identity().is_none());
    assert!(manager.transcript().is_empty());
}

// -----------------------------------------------------------------------------
// Message exchange
// -----------------------------------------------------------------------------

#[tokio::test]
async fn first_send_creates_a_thread_and_appends_the_reply() {
    let stub = StubState::new();
    let (manager, _dir) = logged_in_manager(stub.clone()).await;
    assert_eq!(manager.active_group(), None);

    let outcome = manager.send_message("What fabric is this?").await;

    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(stub.new_conversation_calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.active_group(), Some(1));

    let transcript = manager.transcript();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[0].role, Role::Assistant); // welcome
    assert_eq!(transcript[1].role, Role::User);
    assert_eq!(transcript[1].content, "What fabric is this?");
    assert_eq!(transcript[2].role, Role::Assistant);
    assert_eq!(transcript[2].content, "The fabric is cotton.");
}

#[tokio::test]
async fn failed_thread_creation_degrades_to_a_connection_error_message() {
    let stub = StubState::new();
    stub.fail_new_conversation.store(true, Ordering::SeqCst);
    let (manager, _dir) = logged_in_manager(stub.clone()).await;

    let outcome = manager.send_message("What fabric is this?").await;

    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(stub.chat_calls.load(Ordering::SeqCst), 0);
    assert_eq!(manager.active_group(), None);

    let transcript = manager.transcript();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[1].role, Role::User);
    assert_eq!(transcript[2].content, i18n::connection_error(Language::En));
}

#[tokio::test]
async fn blank_input_is_blocked_before_any_network_call() {
    let stub = StubState::new();
    let (manager, _dir) = logged_in_manager(stub.clone()).await;

    assert_eq!(manager.send_message("   ").await, SendOutcome::EmptyInput);
    assert_eq!(stub.chat_calls.load(Ordering::SeqCst), 0);
    assert_eq!(manager.transcript().len(), 1);
}

#[tokio::test]
async fn only_one_send_is_in_flight_at_a_time() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    stub.hold_chat.store(true, Ordering::SeqCst);
    let (manager, _dir) = logged_in_manager(stub.clone()).await;

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.send_message("first question").await })
    };

    // Let the first send reach the backend and park there.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stub.chat_calls.load(Ordering::SeqCst), 1);

    let second = manager.send_message("second question").await;
    assert_eq!(second, SendOutcome::Busy);
    // The refused send issued no call and appended nothing.
    assert_eq!(stub.chat_calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.transcript().len(), 2); // welcome + first user message

    stub.hold_chat.store(false, Ordering::SeqCst);
    stub.chat_gate.notify_one();
    assert_eq!(first.await.unwrap(), SendOutcome::Sent);

    // The guard is released; sending works again.
    assert_eq!(
        manager.send_message("third question").await,
        SendOutcome::Sent
    );
    assert_eq!(stub.chat_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn backend_error_field_is_rendered_as_assistant_text() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    stub.set_reply(json!({ "error": "no data for that client" }));
    let (manager, _dir) = logged_in_manager(stub).await;

    manager.send_message("anything").await;

    let transcript = manager.transcript();
    assert_eq!(
        transcript.last().unwrap().content,
        "Error: no data for that client"
    );
}

#[tokio::test]
async fn malformed_reply_yields_the_generic_message() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    stub.set_reply(json!({}));
    let (manager, _dir) = logged_in_manager(stub).await;

    manager.send_message("anything").await;

    assert_eq!(
        manager.transcript().last().unwrap().content,
        i18n::could_not_process(Language::En)
    );
}

#[tokio::test]
async fn unparseable_reply_counts_as_a_transport_failure() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    stub.chat_garbage.store(true, Ordering::SeqCst);
    let (manager, _dir) = logged_in_manager(stub.clone()).await;

    manager.send_message("anything").await;

    assert_eq!(
        manager.transcript().last().unwrap().content,
        i18n::connection_error(Language::En)
    );
    // The guard was released despite the failure.
    stub.chat_garbage.store(false, Ordering::SeqCst);
    assert_eq!(manager.send_message("again").await, SendOutcome::Sent);
}

// -----------------------------------------------------------------------------
// Filter reconciliation through the exchange
// -----------------------------------------------------------------------------

#[tokio::test]
async fn extracted_filters_fill_only_blank_fields() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    stub.set_reply(json!({
        "success": true,
        "response": "Found 12 garments.",
        "extracted_filters": { "client": "NIKE", "size": "M" },
        "corrections": { "LASCOSTE": "LACOSTE" },
    }));
    let (manager, _dir) = logged_in_manager(stub).await;

    manager.apply_filters(FilterState {
        client: "LACOSTE".to_string(),
        ..Default::default()
    });

    manager.send_message("how many size M?").await;

    let view = manager.filters_view();
    assert_eq!(view.form.client, "LACOSTE"); // manual value wins
    assert_eq!(view.form.size, "M");
    assert_eq!(view.highlighted, vec!["size".to_string()]);
    // The merged form is the context for the next turn.
    assert_eq!(view.context.client, "LACOSTE");
    assert_eq!(view.context.size, "M");
}

#[tokio::test]
async fn clearing_filters_resets_form_and_context() {
    let stub = StubState::new();
    *stub.current_group.lock().unwrap() = Some(7);
    stub.set_reply(json!({
        "success": true,
        "response": "ok",
        "extracted_filters": { "gender": "mujer" },
    }));
    let (manager, _dir) = logged_in_manager(stub).await;

    manager.send_message("women's garments?").await;
    assert_eq!(manager.filters_view().form.gender, "mujer");

    manager.clear_filters();
    let view = manager.filters_view();
    assert!(view.form.is_blank());
    assert!(view.context.is_blank());
    assert!(view.highlighted.is_empty());
}

// -----------------------------------------------------------------------------
// Ticket lookup and advanced search
// -----------------------------------------------------------------------------

#[tokio::test]
async fn all_blank_search_is_blocked_before_any_network_call() {
    let stub = StubState::new();
    let (manager, _dir) = logged_in_manager(stub.clone()).await;

    let query = SearchQuery {
        box_number: Some("   ".to_string()),
        ..Default::default()
    };
    match manager.search(&query).await.unwrap() {
        SearchReply::MissingFilters { message } => {
            assert_eq!(message, i18n::need_one_filter(Language::En));
        }
        SearchReply::Results(_) => panic!("blank search must not reach the backend"),
    }
    assert_eq!(stub.filter_data_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn search_with_one_filter_reaches_the_backend() {
    let stub = StubState::new();
    let (manager, _dir) = logged_in_manager(stub.clone()).await;

    let query = SearchQuery {
        box_number: Some("12".to_string()),
        ..Default::default()
    };
    match manager.search(&query).await.unwrap() {
        SearchReply::Results(results) => {
            assert!(results.success);
            assert_eq!(results.count, 1);
            assert_eq!(results.data.len(), 1);
        }
        SearchReply::MissingFilters { .. } => panic!("one filter is enough"),
    }
    assert_eq!(stub.filter_data_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lookup_without_hash_reports_not_found() {
    let stub = StubState::new();
    let (manager, _dir) = logged_in_manager(stub).await;

    match manager.lookup("TB-404").await.unwrap() {
        LookupReply::NotFound { message } => {
            assert_eq!(message, i18n::hash_not_found(Language::En));
        }
        LookupReply::Found { .. } => panic!("the backend knows no hash for this ticket"),
    }
}

#[tokio::test]
async fn lookup_resolves_hash_and_fetches_the_record() {
    let stub = StubState::new();
    *stub.hash.lock().unwrap() = Some("abc123".to_string());
    let (manager, _dir) = logged_in_manager(stub).await;

    match manager.lookup("TB-1").await.unwrap() {
        LookupReply::Found {
            tickbarr,
            hash,
            record,
        } => {
            assert_eq!(tickbarr, "TB-1");
            assert_eq!(hash, "abc123");
            assert_eq!(record["product"], "shirt");
        }
        LookupReply::NotFound { .. } => panic!("the hash exists"),
    }
}

// -----------------------------------------------------------------------------
// Unauthenticated access and notifications
// -----------------------------------------------------------------------------

#[tokio::test]
async fn selecting_a_thread_before_login_does_nothing() {
    let stub = StubState::new();
    let base = spawn_stub(stub).await;

    let dir = tempfile::tempdir().unwrap();
    let db_store = Arc::new(Store::new(dir.path().join("client.db")).await.unwrap());
    db_store.init().await.unwrap();

    let manager = Arc::new(Manager::new(
        Arc::new(BackendClient::new(base.clone()).unwrap()),
        Arc::new(GatewayClient::new(format!("{}/bzz", base)).unwrap()),
        db_store,
        Arc::new(EventBus::new()),
        "deepseek".to_string(),
        Language::En,
    ));

    manager.select_thread(7).await;

    assert_eq!(manager.active_group(), None);
    assert!(manager.transcript().is_empty());
}

#[tokio::test]
async fn restoring_a_session_publishes_a_notification() {
    let stub = StubState::new();
    let base = spawn_stub(stub).await;

    let dir = tempfile::tempdir().unwrap();
    let db_store = Arc::new(Store::new(dir.path().join("client.db")).await.unwrap());
    db_store.init().await.unwrap();

    let bus = Arc::new(EventBus::new());
    let backend = Arc::new(BackendClient::new(base.clone()).unwrap());
    let gateway = Arc::new(GatewayClient::new(format!("{}/bzz", base)).unwrap());

    // First run: log in, which persists the token.
    let first = Arc::new(Manager::new(
        backend.clone(),
        gateway.clone(),
        db_store.clone(),
        Arc::new(EventBus::new()),
        "deepseek".to_string(),
        Language::En,
    ));
    first.login("user", "secret").await.unwrap();

    // Second run: restore from the same store and watch the bus.
    let second = Arc::new(Manager::new(
        backend,
        gateway,
        db_store,
        bus.clone(),
        "deepseek".to_string(),
        Language::En,
    ));
    let mut rx = bus.subscribe();
    assert!(second.restore_session().await);
    assert!(second.identity().is_some());

    let mut saw_notification = false;
    while let Ok(event) = rx.try_recv() {
        if let Event::SystemNotification { message, .. } = event {
            assert!(message.contains("Ana"));
            saw_notification = true;
        }
    }
    assert!(saw_notification);
}
