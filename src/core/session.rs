//! Session store.
//!
//! Owns the thread collection, the current-thread pointer, and the send
//! flow. Every mutation rewrites the persisted thread collection, filtered
//! to non-empty threads and with each thread's model reduced to its
//! identifying subset; loading rehydrates models through the registry.
//!
//! A send returns a [`PendingResponse`] rather than committing the
//! assistant message immediately: the caller drives typing playback and
//! then calls [`SessionStore::commit_response`]. One response may be in
//! flight per thread; a second send on the same thread is rejected.

use crate::api::GeneratedImage;
use crate::core::chat::{Chat, PersistedChat};
use crate::core::message::{Attachment, Message, Role};
use crate::core::orchestrator::{RequestError, RequestOrchestrator, RoutingNotice};
use crate::core::registry::{Model, ModelRef, ModelRegistry};
use crate::core::settings::SettingsStore;
use crate::storage::{image_cache_key, StorageBackend, StorageError, CHATS_KEY};
use crate::utils::id::new_id;
use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Phrases that flag a user message as an image-generation request.
const IMAGE_INTENT_PHRASES: &[&str] = &[
    "generate an image",
    "create an image",
    "generate a picture",
    "create a picture",
    "make an image",
    "make a picture",
    "visualize",
];

/// Keyword routing: does this user input ask for an image?
pub fn detect_image_intent(text: &str) -> bool {
    let lowered = text.to_lowercase();
    IMAGE_INTENT_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
        || lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == "draw")
}

#[derive(Debug)]
pub enum SessionError {
    /// A previous send on this thread has not been committed yet.
    SendInFlight,
    UnknownChat(String),
    /// Regenerate was called on a thread with no user message to reissue.
    NothingToRegenerate,
    Request(RequestError),
    Storage(StorageError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::SendInFlight => {
                write!(f, "A response is already in flight for this chat")
            }
            SessionError::UnknownChat(id) => write!(f, "No chat with id {id}"),
            SessionError::NothingToRegenerate => {
                write!(f, "No user message to regenerate from")
            }
            SessionError::Request(err) => write!(f, "{err}"),
            SessionError::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl StdError for SessionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            SessionError::Request(err) => Some(err),
            SessionError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RequestError> for SessionError {
    fn from(err: RequestError) -> Self {
        SessionError::Request(err)
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::Storage(err)
    }
}

/// A completed provider response awaiting playback and commit.
#[derive(Debug)]
pub struct PendingResponse {
    pub chat_id: String,
    /// Id the committed assistant message will carry; also keys the image
    /// cache entry for generated images.
    pub message_id: String,
    pub content: String,
    pub image: Option<GeneratedImage>,
    pub model: ModelRef,
    pub notices: Vec<RoutingNotice>,
}

pub struct SessionStore {
    registry: Arc<ModelRegistry>,
    orchestrator: Arc<RequestOrchestrator>,
    settings: Arc<SettingsStore>,
    storage: Arc<dyn StorageBackend>,
    chats: Vec<Chat>,
    current_id: String,
    in_flight: HashSet<String>,
}

impl SessionStore {
    /// Load persisted threads, rehydrating each model through the registry.
    /// With nothing persisted, one fresh chat is created and selected;
    /// otherwise the most recently updated thread becomes current.
    pub fn load(
        registry: Arc<ModelRegistry>,
        orchestrator: Arc<RequestOrchestrator>,
        settings: Arc<SettingsStore>,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self, SessionError> {
        let chats: Vec<Chat> = match storage.get(CHATS_KEY) {
            Some(raw) => match serde_json::from_str::<Vec<PersistedChat>>(&raw) {
                Ok(persisted) => persisted
                    .into_iter()
                    .map(|chat| chat.into_chat(&registry))
                    .collect(),
                Err(err) => {
                    warn!(error = %err, "stored chats did not parse; starting empty");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut store = Self {
            registry,
            orchestrator,
            settings,
            storage,
            chats,
            current_id: String::new(),
            in_flight: HashSet::new(),
        };

        match store
            .chats
            .iter()
            .max_by_key(|chat| chat.updated_at)
            .map(|chat| chat.id.clone())
        {
            Some(id) => store.current_id = id,
            None => {
                store.create_chat()?;
            }
        }
        Ok(store)
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn current_chat(&self) -> &Chat {
        // load() and delete_chat() guarantee a current chat always exists.
        self.chats
            .iter()
            .find(|chat| chat.id == self.current_id)
            .expect("session invariant: current chat exists")
    }

    pub fn chat(&self, id: &str) -> Option<&Chat> {
        self.chats.iter().find(|chat| chat.id == id)
    }

    fn chat_mut(&mut self, id: &str) -> Result<&mut Chat, SessionError> {
        self.chats
            .iter_mut()
            .find(|chat| chat.id == id)
            .ok_or_else(|| SessionError::UnknownChat(id.to_string()))
    }

    /// The model new threads start with: the settings default resolved
    /// through the registry, or the registry default.
    fn default_model(&self) -> Model {
        let settings = self.settings.snapshot();
        match settings.default_model {
            Some(model_ref) => self.registry.model_by_id(&model_ref.id).clone(),
            None => self.registry.default_model().clone(),
        }
    }

    /// Create a thread on the default model (after limit-check substitution)
    /// and make it current. Other empty untouched threads are removed; the
    /// store never accumulates more than one.
    pub fn create_chat(&mut self) -> Result<(&Chat, Option<RoutingNotice>), SessionError> {
        let model = self.default_model();
        self.create_chat_with_model(model)
    }

    pub fn create_chat_with_model(
        &mut self,
        model: Model,
    ) -> Result<(&Chat, Option<RoutingNotice>), SessionError> {
        let (model, notice) = self.orchestrator.limit_checked(&model);

        self.chats.retain(|chat| !chat.is_empty());
        let chat = Chat::new(model);
        self.current_id = chat.id.clone();
        self.chats.insert(0, chat);
        self.persist()?;
        Ok((&self.chats[0], notice))
    }

    /// Move the current-chat pointer. No other side effects.
    pub fn select_chat(&mut self, id: &str) -> Result<(), SessionError> {
        if self.chat(id).is_none() {
            return Err(SessionError::UnknownChat(id.to_string()));
        }
        self.current_id = id.to_string();
        Ok(())
    }

    /// Append a message to the current thread and persist.
    pub fn add_message(
        &mut self,
        content: &str,
        role: Role,
        attachments: Vec<Attachment>,
    ) -> Result<(), SessionError> {
        let id = self.current_id.clone();
        let message = match role {
            Role::User => Message::user(content, attachments),
            _ => Message::new(role, content),
        };
        self.chat_mut(&id)?.push_message(message);
        self.persist()
    }

    /// The full send flow: append the user message, route (image intent,
    /// daily limits), dispatch, and return the reply as a
    /// [`PendingResponse`] for playback. Failures append a visible
    /// assistant-role message describing what happened, so the conversation
    /// log always reflects it.
    pub async fn send_message(
        &mut self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<PendingResponse, SessionError> {
        let chat_id = self.current_id.clone();
        if self.in_flight.contains(&chat_id) {
            return Err(SessionError::SendInFlight);
        }

        self.chat_mut(&chat_id)?
            .push_message(Message::user(content, attachments));
        self.persist()?;

        self.dispatch(&chat_id, content).await
    }

    /// Drop the last assistant message (and everything after it) from the
    /// current thread, then reissue the triggering user message without
    /// re-appending it.
    pub async fn regenerate(&mut self) -> Result<PendingResponse, SessionError> {
        let chat_id = self.current_id.clone();
        if self.in_flight.contains(&chat_id) {
            return Err(SessionError::SendInFlight);
        }

        let user_text = {
            let chat = self.chat_mut(&chat_id)?;
            let last_user = chat
                .messages
                .iter()
                .rposition(|message| message.is_user())
                .ok_or(SessionError::NothingToRegenerate)?;
            chat.messages.truncate(last_user + 1);
            chat.touch();
            chat.messages[last_user].content.clone()
        };
        self.persist()?;

        self.dispatch(&chat_id, &user_text).await
    }

    async fn dispatch(
        &mut self,
        chat_id: &str,
        user_text: &str,
    ) -> Result<PendingResponse, SessionError> {
        self.in_flight.insert(chat_id.to_string());

        let (model, history) = {
            let chat = self
                .chat(chat_id)
                .ok_or_else(|| SessionError::UnknownChat(chat_id.to_string()))?;
            (chat.model.clone(), chat.messages.clone())
        };

        let image_intent = self.settings.snapshot().enable_image_generation
            && detect_image_intent(user_text);

        let outcome = if image_intent {
            self.orchestrator
                .generate_image(&model, user_text)
                .await
                .map(|outcome| PendingResponse {
                    chat_id: chat_id.to_string(),
                    message_id: new_id(),
                    content: outcome.image.caption.clone().unwrap_or_default(),
                    image: Some(outcome.image),
                    model: outcome.effective_model.model_ref(),
                    notices: outcome.notices,
                })
        } else {
            self.orchestrator
                .send_chat_request(&model, &history)
                .await
                .map(|outcome| PendingResponse {
                    chat_id: chat_id.to_string(),
                    message_id: new_id(),
                    content: outcome.completion.content,
                    image: None,
                    model: outcome.effective_model.model_ref(),
                    notices: outcome.notices,
                })
        };

        match outcome {
            Ok(pending) => Ok(pending),
            Err(err) => {
                self.in_flight.remove(chat_id);
                let failure_text = err.to_string();
                if let Ok(chat) = self.chat_mut(chat_id) {
                    chat.push_message(Message::new(Role::Assistant, failure_text));
                }
                self.persist()?;
                Err(err.into())
            }
        }
    }

    /// Commit a played-back response: append the assistant message (tagged
    /// with the model that produced it), cache a generated image under the
    /// message id, clear the in-flight flag, persist. Returns the committed
    /// message.
    pub fn commit_response(&mut self, pending: PendingResponse) -> Result<Message, SessionError> {
        self.in_flight.remove(&pending.chat_id);

        if let Some(image) = &pending.image {
            if let Err(err) = self
                .storage
                .set(&image_cache_key(&pending.message_id), &image.data_url)
            {
                warn!(error = %err, "failed to cache generated image");
            }
        }

        let message = Message {
            id: pending.message_id,
            role: Role::Assistant,
            content: pending.content,
            timestamp: chrono::Utc::now(),
            model: Some(pending.model),
            attachments: Vec::new(),
        };
        let committed = message.clone();
        self.chat_mut(&pending.chat_id)?.push_message(message);
        self.persist()?;
        Ok(committed)
    }

    /// Abandon a response without committing it, e.g. when its playback
    /// checkpoint went stale after a reload. Clears the in-flight flag so
    /// the thread accepts sends again; the reply is dropped.
    pub fn discard_pending(&mut self, pending: PendingResponse) {
        self.in_flight.remove(&pending.chat_id);
    }

    pub fn rename_chat(&mut self, id: &str, title: &str) -> Result<(), SessionError> {
        let chat = self.chat_mut(id)?;
        chat.title = title.to_string();
        chat.touch();
        self.persist()
    }

    /// Delete a thread. Deleting the current thread selects the most
    /// recently updated remaining thread, or creates a fresh one; the
    /// session is never left with zero chats.
    pub fn delete_chat(&mut self, id: &str) -> Result<(), SessionError> {
        if self.chat(id).is_none() {
            return Err(SessionError::UnknownChat(id.to_string()));
        }
        self.chats.retain(|chat| chat.id != id);
        self.in_flight.remove(id);

        if self.current_id == id {
            match self
                .chats
                .iter()
                .max_by_key(|chat| chat.updated_at)
                .map(|chat| chat.id.clone())
            {
                Some(next) => self.current_id = next,
                None => {
                    self.create_chat()?;
                    return Ok(());
                }
            }
        }
        self.persist()
    }

    pub fn set_chat_folder(&mut self, id: &str, folder: Option<&str>) -> Result<(), SessionError> {
        let chat = self.chat_mut(id)?;
        chat.folder = folder.map(str::to_string);
        chat.touch();
        self.persist()
    }

    pub fn pin_chat(&mut self, id: &str) -> Result<(), SessionError> {
        self.set_pinned(id, true)
    }

    pub fn unpin_chat(&mut self, id: &str) -> Result<(), SessionError> {
        self.set_pinned(id, false)
    }

    fn set_pinned(&mut self, id: &str, pinned: bool) -> Result<(), SessionError> {
        let chat = self.chat_mut(id)?;
        chat.is_pinned = pinned;
        chat.touch();
        self.persist()
    }

    /// Assign a model to the current thread (explicit user action), after
    /// the same limit-check substitution as thread creation.
    pub fn set_current_chat_model(
        &mut self,
        model: Model,
    ) -> Result<Option<RoutingNotice>, SessionError> {
        let (model, notice) = self.orchestrator.limit_checked(&model);
        let id = self.current_id.clone();
        let chat = self.chat_mut(&id)?;
        chat.model = model;
        chat.touch();
        self.persist()?;
        Ok(notice)
    }

    /// Rewrite the persisted thread collection: non-empty threads only,
    /// models reduced to their identifying subset.
    fn persist(&self) -> Result<(), SessionError> {
        let persisted: Vec<PersistedChat> = self
            .chats
            .iter()
            .filter(|chat| !chat.is_empty())
            .map(Chat::to_persisted)
            .collect();
        let serialized = serde_json::to_string(&persisted)
            .map_err(|source| StorageError::Serialize { source })?;
        self.storage.set(CHATS_KEY, &serialized)?;
        Ok(())
    }
}
