use crate::backend::client::LoginOutcome;
use crate::backend::types::{ChatRequest, FilterDataRequest, FilterDataResponse};
use crate::backend::BackendClient;
use crate::bus::{Event, EventBus, NotificationLevel};
use crate::chat::{self, ConversationThread, Message};
use crate::filters::{ExtractedFilters, FilterPanel, FilterState, HIGHLIGHT_WINDOW};
use crate::gateway::GatewayClient;
use crate::i18n::{self, Language};
use crate::store::{self, Store};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub usercode: String,
    pub username: String,
}

/// Where the session stands with respect to conversations. `ActiveThread`
/// transitions to itself on select/create (new id) and to `NoActiveThread`
/// when the active thread is deleted; ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    NoActiveThread,
    ActiveThread(i64),
}

impl SessionPhase {
    pub fn active_group(&self) -> Option<i64> {
        match self {
            SessionPhase::ActiveThread(group) => Some(*group),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The exchange settled; the outcome (reply or handled error) is in the
    /// transcript.
    Sent,
    /// A previous send has not settled yet; nothing was issued.
    Busy,
    /// Blank input; blocked before any network call.
    EmptyInput,
    NotAuthenticated,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The caller has not confirmed; no backend call was made.
    NeedsConfirmation,
    Failed,
    NotAuthenticated,
}

#[derive(Debug)]
pub enum LoginReply {
    LoggedIn(Identity),
    Rejected(String),
}

#[derive(Debug)]
pub enum LookupReply {
    Found {
        tickbarr: String,
        hash: String,
        record: Value,
    },
    NotFound {
        message: String,
    },
}

/// The four searchable fields of the advanced-search form, mapped onto the
/// backend's column filters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    pub box_number: Option<String>,
    pub client_style: Option<String>,
    pub label: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug)]
pub enum SearchReply {
    Results(FilterDataResponse),
    /// All fields blank; blocked before any network call.
    MissingFilters { message: String },
}

/// Combined filter view for the UI: the editable form, the chat-context
/// snapshot, and which fields currently carry the auto-fill highlight.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiltersView {
    pub form: FilterState,
    pub context: FilterState,
    pub highlighted: Vec<String>,
    pub active_count: usize,
}

struct SessionState {
    identity: Option<Identity>,
    language: Language,
    phase: SessionPhase,
    transcript: Vec<Message>,
    conversations: Vec<ConversationThread>,
    filters: FilterPanel,
}

/// Clears the in-flight flag on every exit path of a send.
struct SendGuard<'a>(&'a AtomicBool);

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The stateful hub of the dashboard: owns the active conversation, the
/// in-memory transcript and both filter instances, and talks to the backend
/// on behalf of the UI. One instance per running client.
pub struct Manager {
    backend: Arc<BackendClient>,
    gateway: Arc<GatewayClient>,
    store: Arc<Store>,
    bus: Arc<EventBus>,
    model: String,
    state: Mutex<SessionState>,
    sending: AtomicBool,
}

impl Manager {
    pub fn new(
        backend: Arc<BackendClient>,
        gateway: Arc<GatewayClient>,
        store: Arc<Store>,
        bus: Arc<EventBus>,
        model: String,
        language: Language,
    ) -> Self {
        Self {
            backend,
            gateway,
            store,
            bus,
            model,
            state: Mutex::new(SessionState {
                identity: None,
                language,
                phase: SessionPhase::Uninitialized,
                transcript: Vec::new(),
                conversations: Vec::new(),
                filters: FilterPanel::new(),
            }),
            sending: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap()
    }

    // --- Accessors -------------------------------------------------------

    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    pub fn language(&self) -> Language {
        self.lock().language
    }

    pub fn set_language(&self, language: Language) {
        self.lock().language = language;
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn active_group(&self) -> Option<i64> {
        self.lock().phase.active_group()
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.lock().transcript.clone()
    }

    pub fn conversations(&self) -> Vec<ConversationThread> {
        self.lock().conversations.clone()
    }

    pub fn filters_view(&self) -> FiltersView {
        let state = self.lock();
        FiltersView {
            form: state.filters.form().clone(),
            context: state.filters.context().clone(),
            highlighted: state.filters.highlighted_at(Instant::now()),
            active_count: state.filters.form().active_count(),
        }
    }

    // --- Authentication --------------------------------------------------

    /// Exchanges credentials for a token, resolves the identity behind it
    /// and boots the session. A rejection is an application-level reply;
    /// only an unreachable backend is an Err.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginReply> {
        match self.backend.login(username, password).await? {
            LoginOutcome::Granted { access_token } => {
                let who = self.backend.protected(&access_token).await?;
                let identity = Identity {
                    usercode: who.usercode,
                    username: who.username,
                };
                if let Err(e) = self.persist_identity(&access_token, &identity).await {
                    warn!("Failed to persist the session: {:#}", e);
                }
                {
                    self.lock().identity = Some(identity.clone());
                }
                info!("Logged in as {} ({})", identity.username, identity.usercode);
                self.initialize().await;
                Ok(LoginReply::LoggedIn(identity))
            }
            LoginOutcome::Denied { message } => Ok(LoginReply::Rejected(message)),
        }
    }

    async fn persist_identity(&self, token: &str, identity: &Identity) -> Result<()> {
        self.store.set(store::KEY_TOKEN, token).await?;
        self.store.set(store::KEY_USERCODE, &identity.usercode).await?;
        self.store.set(store::KEY_USERNAME, &identity.username).await?;
        Ok(())
    }

    /// Revalidates a persisted token on startup. Returns whether a session
    /// was restored; a stale token is dropped silently.
    pub async fn restore_session(&self) -> bool {
        let token = match self.store.get(store::KEY_TOKEN).await {
            Ok(Some(token)) => token,
            Ok(None) => return false,
            Err(e) => {
                warn!("Failed to read the persisted token: {:#}", e);
                return false;
            }
        };

        match self.backend.protected(&token).await {
            Ok(who) => {
                let identity = Identity {
                    usercode: who.usercode,
                    username: who.username,
                };
                info!("Session restored for {}", identity.usercode);
                let username = identity.username.clone();
                {
                    self.lock().identity = Some(identity);
                }
                self.bus.publish(Event::SystemNotification {
                    level: NotificationLevel::Info,
                    message: format!("Session restored for {}", username),
                });
                self.initialize().await;
                true
            }
            Err(e) => {
                warn!("Persisted token is no longer valid: {:#}", e);
                if let Err(e) = self.store.clear_identity().await {
                    warn!("Failed to clear the persisted session: {:#}", e);
                }
                false
            }
        }
    }

    pub async fn logout(&self) {
        if let Err(e) = self.store.clear_identity().await {
            warn!("Failed to clear the persisted session: {:#}", e);
        }
        {
            let mut state = self.lock();
            state.identity = None;
            state.phase = SessionPhase::Uninitialized;
            state.transcript.clear();
            state.conversations.clear();
            state.filters.clear_all();
        }
        self.bus.publish(Event::ThreadChanged { group: None });
    }

    // --- Session management ----------------------------------------------

    /// Boot sequence after login or restore: pick up the backend's notion
    /// of the current conversation, then the session list.
    pub async fn initialize(&self) {
        {
            self.lock().phase = SessionPhase::Loading;
        }
        self.load_active_thread().await;
        self.load_conversation_list().await;
    }

    /// Refreshes the conversation list. On failure the previous list stays.
    pub async fn load_conversation_list(&self) {
        let Some(identity) = self.identity() else {
            return;
        };
        match self.backend.conversations(&identity.usercode).await {
            Ok(list) => {
                {
                    self.lock().conversations = list;
                }
                self.bus.publish(Event::ConversationsUpdated);
            }
            Err(e) => {
                warn!(
                    "Failed to load the conversation list, keeping the previous one: {:#}",
                    e
                );
                self.bus.publish(Event::SystemNotification {
                    level: NotificationLevel::Warning,
                    message: "Could not refresh the conversation list".to_string(),
                });
            }
        }
    }

    pub async fn load_active_thread(&self) {
        let Some(identity) = self.identity() else {
            return;
        };
        let lang = self.language();
        match self.backend.current_group(&identity.usercode).await {
            Ok(Some(group)) => {
                {
                    self.lock().phase = SessionPhase::ActiveThread(group);
                }
                self.load_history(group).await;
            }
            Ok(None) => self.reset_to_welcome(None, lang),
            Err(e) => {
                warn!("Failed to resolve the current conversation: {:#}", e);
                self.reset_to_welcome(None, lang);
            }
        }
    }

    /// Replaces the transcript with the given thread's history, expanded
    /// pair by pair. Empty or unreachable history degrades to the welcome
    /// message.
    pub async fn load_history(&self, group: i64) {
        let Some(identity) = self.identity() else {
            return;
        };
        let lang = self.language();
        match self.backend.history(&identity.usercode, group).await {
            Ok(history) if history.is_empty() => self.reset_to_welcome(Some(group), lang),
            Ok(history) => {
                {
                    let mut state = self.lock();
                    state.phase = SessionPhase::ActiveThread(group);
                    state.transcript = chat::expand_history(&history);
                }
                self.bus.publish(Event::ThreadChanged { group: Some(group) });
            }
            Err(e) => {
                warn!("Failed to load history for conversation {}: {:#}", group, e);
                self.reset_to_welcome(Some(group), lang);
            }
        }
    }

    pub async fn start_new_thread(&self) -> Option<i64> {
        let Some(identity) = self.identity() else {
            return None;
        };
        let lang = self.language();
        match self.backend.new_conversation(&identity.usercode).await {
            Ok(group) => {
                self.reset_to_welcome(Some(group), lang);
                self.load_conversation_list().await;
                Some(group)
            }
            Err(e) => {
                // Active thread and transcript stay as they were.
                error!("Failed to start a new conversation: {:#}", e);
                None
            }
        }
    }

    pub async fn select_thread(&self, group: i64) {
        if self.identity().is_none() {
            return;
        }
        {
            self.lock().phase = SessionPhase::ActiveThread(group);
        }
        self.load_history(group).await;
    }

    /// Deletes a conversation. The blocking confirmation prompt lives in the
    /// UI; an unconfirmed request is refused before any backend call.
    pub async fn delete_thread(&self, group: i64, confirmed: bool) -> DeleteOutcome {
        if !confirmed {
            return DeleteOutcome::NeedsConfirmation;
        }
        let Some(identity) = self.identity() else {
            return DeleteOutcome::NotAuthenticated;
        };
        let lang = self.language();
        let was_active = self.active_group() == Some(group);

        match self
            .backend
            .delete_conversation(&identity.usercode, group)
            .await
        {
            Ok(()) => {
                self.load_conversation_list().await;
                if was_active {
                    self.reset_to_welcome(None, lang);
                }
                DeleteOutcome::Deleted
            }
            Err(e) => {
                error!("Failed to delete conversation {}: {:#}", group, e);
                DeleteOutcome::Failed
            }
        }
    }

    fn reset_to_welcome(&self, group: Option<i64>, lang: Language) {
        {
            let mut state = self.lock();
            state.phase = match group {
                Some(group) => SessionPhase::ActiveThread(group),
                None => SessionPhase::NoActiveThread,
            };
            state.transcript = vec![chat::welcome_message(lang)];
        }
        self.bus.publish(Event::ThreadChanged { group });
    }

    // --- Message exchange ------------------------------------------------

    /// One user utterance, one assistant reply. The user message is appended
    /// optimistically; every failure mode settles into an assistant-visible
    /// message and the in-flight flag is released on all paths. At most one
    /// send is in flight at a time.
    pub async fn send_message(self: &Arc<Self>, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::EmptyInput;
        }
        let (identity, lang) = {
            let state = self.lock();
            (state.identity.clone(), state.language)
        };
        let Some(identity) = identity else {
            return SendOutcome::NotAuthenticated;
        };

        if self
            .sending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SendOutcome::Busy;
        }
        let _guard = SendGuard(&self.sending);

        let (prior_len, group) = {
            let state = self.lock();
            (state.transcript.len(), state.phase.active_group())
        };

        self.append(Message::user(text));

        // No active thread yet: create one and adopt it before the call.
        let group = match group {
            Some(group) => group,
            None => match self.backend.new_conversation(&identity.usercode).await {
                Ok(group) => {
                    {
                        self.lock().phase = SessionPhase::ActiveThread(group);
                    }
                    self.bus.publish(Event::ThreadChanged { group: Some(group) });
                    group
                }
                Err(e) => {
                    error!("Failed to create a conversation for this send: {:#}", e);
                    self.append(Message::assistant(i18n::connection_error(lang)));
                    return SendOutcome::Sent;
                }
            },
        };

        let filters = {
            self.lock().filters.context().clone()
        };
        let request = ChatRequest {
            question: text.to_string(),
            model: self.model.clone(),
            filters,
            user_code: identity.usercode.clone(),
            user_name: identity.username.clone(),
            conversation_group: group,
        };

        match self.backend.chat(&request).await {
            Ok(reply) => match (&reply.response, &reply.error) {
                (Some(response), _) if reply.success => {
                    self.append(Message::assistant(response.clone()));
                    if reply.has_extracted_values() {
                        if let Some(corrections) = &reply.corrections {
                            for (field, note) in corrections {
                                info!("Assistant corrected '{}': {}", field, note);
                            }
                        }
                        self.merge_extracted_filters(&reply.extracted_as_strings());
                    }
                }
                (_, Some(backend_error)) => {
                    self.append(Message::assistant(i18n::backend_error(lang, backend_error)));
                }
                _ => self.append(Message::assistant(i18n::could_not_process(lang))),
            },
            Err(e) => {
                error!("Chat request failed: {:#}", e);
                self.append(Message::assistant(i18n::connection_error(lang)));
            }
        }

        // The first real exchange makes this thread show up in the list.
        if prior_len <= 1 {
            self.load_conversation_list().await;
        }

        SendOutcome::Sent
    }

    // Appends to whatever transcript is currently rendered, even if the
    // reply settled after a thread switch.
    fn append(&self, message: Message) {
        {
            self.lock().transcript.push(message.clone());
        }
        self.bus.publish(Event::MessageAppended(message));
    }

    // --- Filter reconciliation -------------------------------------------

    fn merge_extracted_filters(self: &Arc<Self>, delta: &ExtractedFilters) {
        let (changed, generation, form) = {
            let mut state = self.lock();
            let changed = state.filters.merge_extracted(delta, Instant::now());
            (changed, state.filters.generation(), state.filters.form().clone())
        };
        if changed.is_empty() {
            return;
        }

        self.bus.publish(Event::FiltersAutoFilled {
            fields: changed,
            filters: form,
        });

        // Schedule the highlight expiry; a newer merge supersedes it.
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(HIGHLIGHT_WINDOW).await;
            let cleared = {
                manager.lock().filters.expire_highlight(generation)
            };
            if cleared {
                manager.bus.publish(Event::HighlightCleared);
            }
        });
    }

    pub fn apply_filters(&self, snapshot: FilterState) {
        {
            self.lock().filters.apply_manual(snapshot.clone());
        }
        self.bus.publish(Event::FiltersApplied { filters: snapshot });
    }

    pub fn clear_filters(&self) {
        {
            self.lock().filters.clear_all();
        }
        self.bus.publish(Event::FiltersApplied {
            filters: FilterState::default(),
        });
    }

    // --- Ticket lookup and advanced search -------------------------------

    /// Resolves a ticket to its content hash and fetches the traceability
    /// record from the storage gateway.
    pub async fn lookup(&self, tickbarr: &str) -> Result<LookupReply> {
        let lang = self.language();
        match self.backend.get_hash(tickbarr).await? {
            Some(hash) => {
                let record = self.gateway.fetch_record(&hash).await?;
                Ok(LookupReply::Found {
                    tickbarr: tickbarr.to_string(),
                    hash,
                    record,
                })
            }
            None => Ok(LookupReply::NotFound {
                message: i18n::hash_not_found(lang).to_string(),
            }),
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchReply> {
        let request = FilterDataRequest {
            numecaja: clean(&query.box_number),
            esticlie: clean(&query.client_style),
            etiqclie: clean(&query.label),
            coditall: clean(&query.size),
        };

        if request.numecaja.is_none()
            && request.esticlie.is_none()
            && request.etiqclie.is_none()
            && request.coditall.is_none()
        {
            return Ok(SearchReply::MissingFilters {
                message: i18n::need_one_filter(self.language()).to_string(),
            });
        }

        Ok(SearchReply::Results(self.backend.filter_data(&request).await?))
    }
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
