//! Conversation state: the session list, the active pointer, and sending.

use super::prompt::{DEFAULT_SYSTEM_PROMPT, PromptMode, chat_turns, transcript_prompt};
use super::{Message, Session, derive_title};
use crate::error::{Error, Result};
use crate::model::ModelSelection;
use crate::provider::{self, ChatRequest, GenerateRequest, ModelApi, StreamEvent};
use crate::storage::StorageFacade;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Storage key for the serialized session list.
pub const SESSIONS_KEY: &str = "nexusChat_sessions";

/// Optional extras for a single send.
#[derive(Debug, Default)]
pub struct SendOptions {
    /// Receives raw text deltas while the reply streams in.
    pub tx: Option<mpsc::Sender<StreamEvent>>,
    /// Aborts the backend request when cancelled.
    pub cancel: Option<CancellationToken>,
}

/// Clears the loading flag when dropped, whatever way the send ends.
struct LoadingGuard(Arc<watch::Sender<bool>>);

impl LoadingGuard {
    fn engage(flag: &Arc<watch::Sender<bool>>) -> Self {
        flag.send_replace(true);
        Self(Arc::clone(flag))
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

/// Owns every conversation and the one active pointer.
///
/// Mutations persist the whole list through the storage facade before
/// returning. Sending takes `&mut self`, so overlapping sends on one store
/// are impossible.
pub struct ConversationStore {
    storage: StorageFacade,
    api: Arc<dyn ModelApi>,
    model: ModelSelection,
    mode: PromptMode,
    system_prompt: String,
    sessions: Vec<Session>,
    active_id: Option<String>,
    loading: Arc<watch::Sender<bool>>,
}

impl ConversationStore {
    /// Load persisted sessions, creating a first one if there are none.
    pub fn new(storage: StorageFacade, api: Arc<dyn ModelApi>, model: ModelSelection) -> Self {
        let sessions: Vec<Session> = storage.get(SESSIONS_KEY, Vec::new());
        let (loading, _) = watch::channel(false);

        let mut store = Self {
            storage,
            api,
            model,
            mode: PromptMode::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            sessions,
            active_id: None,
            loading: Arc::new(loading),
        };

        match store.sessions.first() {
            Some(first) => store.active_id = Some(first.id.clone()),
            None => {
                store.create_session();
            }
        }

        tracing::debug!(
            sessions = store.sessions.len(),
            active = ?store.active_id,
            "Conversation store ready"
        );
        store
    }

    #[must_use]
    pub fn with_mode(mut self, mode: PromptMode) -> Self {
        self.mode = mode;
        self
    }

    /// Instruction for chat mode. Blank disables it.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn mode(&self) -> PromptMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PromptMode) {
        self.mode = mode;
    }

    pub fn model(&self) -> &ModelSelection {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut ModelSelection {
        &mut self.model
    }

    pub fn api(&self) -> &Arc<dyn ModelApi> {
        &self.api
    }

    /// All sessions, newest-created first.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    /// The session the active pointer resolves to, if any.
    pub fn active_session(&self) -> Option<&Session> {
        self.active_id.as_deref().and_then(|id| self.session(id))
    }

    /// Find the one session whose id starts with `prefix`.
    pub fn resolve_id(&self, prefix: &str) -> Result<String> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(Error::Session("Empty session id".into()));
        }
        if let Some(exact) = self.session(prefix) {
            return Ok(exact.id.clone());
        }

        let mut matches = self.sessions.iter().filter(|s| s.id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Ok(only.id.clone()),
            (Some(_), Some(_)) => Err(Error::Session(format!(
                "Session id '{prefix}' is ambiguous"
            ))),
            (None, _) => Err(Error::Session(format!("Session not found: {prefix}"))),
        }
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Observe the loading flag from elsewhere (e.g. a spinner task).
    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    /// Start a new conversation at the top of the list and make it active.
    pub fn create_session(&mut self) -> &Session {
        let session = Session::new();
        tracing::debug!(id = %session.id, "Created session");
        self.active_id = Some(session.id.clone());
        self.sessions.insert(0, session);
        self.persist();
        &self.sessions[0]
    }

    /// Point at `id`. Membership is not checked: an unknown id simply leaves
    /// no active session until another is chosen.
    pub fn set_active(&mut self, id: &str) {
        if self.session(id).is_none() {
            tracing::warn!(id, "Activating unknown session");
        }
        self.active_id = Some(id.to_string());
    }

    /// Remove a session. The list is never left empty.
    ///
    /// Returns whether a session with that id existed.
    pub fn delete_session(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        let removed = self.sessions.len() != before;

        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.sessions.first().map(|s| s.id.clone());
        }

        if self.sessions.is_empty() {
            // create_session persists
            self.create_session();
        } else {
            self.persist();
        }

        if removed {
            tracing::debug!(id, "Deleted session");
        }
        removed
    }

    /// Rename a session. Returns whether it existed.
    pub fn update_title(&mut self, id: &str, title: impl Into<String>) -> bool {
        let title = title.into();
        let found = match self.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                session.title = title;
                session.updated_at = chrono::Utc::now();
                true
            }
            None => false,
        };
        self.persist();
        found
    }

    /// Drop every session and start over with a single fresh one.
    pub fn clear(&mut self) {
        self.storage.remove(SESSIONS_KEY);
        self.sessions.clear();
        self.active_id = None;
        self.create_session();
        tracing::debug!("Cleared all sessions");
    }

    /// Send `content` in the active session and return the assistant reply.
    ///
    /// With no active session this logs and returns an empty reply without
    /// contacting the backend.
    pub async fn send_message(&mut self, content: &str) -> Result<String> {
        self.send_message_with(content, SendOptions::default()).await
    }

    /// [`send_message`](Self::send_message) with streaming and cancellation.
    ///
    /// The user message is persisted before the request goes out. On failure
    /// or cancellation it stays, and no assistant message is added.
    pub async fn send_message_with(&mut self, content: &str, options: SendOptions) -> Result<String> {
        let Some(mut session) = self.active_session().cloned() else {
            tracing::error!(active = ?self.active_id, "No active session found");
            return Ok(String::new());
        };

        let _loading = LoadingGuard::engage(&self.loading);

        session.push(Message::user(content));
        if session.messages.len() == 1 && session.has_default_title() {
            session.title = derive_title(content);
        }
        self.replace_session(session.clone());
        self.persist();

        tracing::debug!(
            session = %session.id,
            model = self.model.current(),
            mode = ?self.mode,
            history = session.messages.len(),
            "Sending message"
        );

        let reply = self.request_reply(&session.messages, options).await?;

        session.push(Message::assistant(reply.clone()));
        self.replace_session(session);
        self.persist();

        Ok(reply)
    }

    async fn request_reply(&self, history: &[Message], options: SendOptions) -> Result<String> {
        let SendOptions { tx, cancel } = options;
        let model = self.model.current().to_string();

        let request = async {
            match self.mode {
                PromptMode::Generate => {
                    let request = GenerateRequest::new(transcript_prompt(history)).with_model(model);
                    self.api.generate(request, tx).await
                }
                PromptMode::Chat => {
                    let request =
                        ChatRequest::new(chat_turns(&self.system_prompt, history)).with_model(model);
                    self.api.chat(request, tx).await
                }
            }
        };

        let reply = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(provider::Error::Cancelled),
                    reply = request => reply,
                }
            }
            None => request.await,
        };

        reply.map_err(|e| {
            tracing::debug!(error = %e, "Model request failed");
            Error::from(e)
        })
    }

    fn replace_session(&mut self, updated: Session) {
        if let Some(slot) = self.sessions.iter_mut().find(|s| s.id == updated.id) {
            *slot = updated;
        }
    }

    fn persist(&self) {
        self.storage.set(SESSIONS_KEY, &self.sessions);
    }
}
