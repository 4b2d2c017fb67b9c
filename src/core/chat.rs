//! Conversation threads.
//!
//! A [`Chat`] owns its message log and the full registry [`Model`] assigned
//! to it. Persistence reduces the model to a [`ModelRef`]; the session store
//! rehydrates it through the registry on load so a thread never carries a
//! stale capability shape after a catalog update.

use crate::core::message::Message;
use crate::core::registry::{Model, ModelRef, ModelRegistry};
use crate::utils::id::new_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to a thread before its first user message arrives.
pub const PLACEHOLDER_TITLE: &str = "New Chat";

const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub model: Model,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub folder: Option<String>,
}

impl Chat {
    pub fn new(model: Model) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: PLACEHOLDER_TITLE.to_string(),
            messages: Vec::new(),
            model,
            created_at: now,
            updated_at: now,
            is_pinned: false,
            folder: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_placeholder_title(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }

    /// Refresh `updated_at`, keeping it strictly increasing even when two
    /// mutations land within one clock tick.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }

    /// Append a message and refresh the timestamp. Derives the title from
    /// the first user message while the placeholder is still in place.
    pub fn push_message(&mut self, message: Message) {
        if message.is_user() && self.has_placeholder_title() {
            self.title = derive_title(&message.content);
        }
        self.messages.push(message);
        self.touch();
    }

    /// Reduce to the persisted shape: model as its identifying subset only.
    pub fn to_persisted(&self) -> PersistedChat {
        PersistedChat {
            id: self.id.clone(),
            title: self.title.clone(),
            messages: self.messages.clone(),
            model: self.model.model_ref(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            is_pinned: self.is_pinned,
            folder: self.folder.clone(),
        }
    }
}

/// Derive a thread title from the first user message: the leading 30
/// characters plus an ellipsis when truncated.
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return PLACEHOLDER_TITLE.to_string();
    }
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        trimmed.to_string()
    } else {
        let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", truncated.trim_end())
    }
}

/// Storage shape of a thread, with the model reduced to [`ModelRef`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedChat {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub model: ModelRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

impl PersistedChat {
    /// Rehydrate into a full [`Chat`], resolving the persisted model id
    /// through the registry. Unknown ids fall back to the default model.
    pub fn into_chat(self, registry: &ModelRegistry) -> Chat {
        let model = registry.model_by_id(&self.model.id).clone();
        Chat {
            id: self.id,
            title: self.title,
            messages: self.messages,
            model,
            created_at: self.created_at,
            updated_at: self.updated_at,
            is_pinned: self.is_pinned,
            folder: self.folder,
        }
    }
}
