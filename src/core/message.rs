//! Transcript messages and attachments.

use crate::core::registry::ModelRef;
use crate::utils::id::new_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// A file or image attached to a user message.
///
/// The bytes ride through the core opaquely and are inlined on the wire by
/// the provider adapters; only id and MIME type survive persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub mime: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: new_id(),
            mime: mime.into(),
            bytes,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// One entry in a conversation transcript. Immutable once appended, except
/// that regeneration drops an assistant message and everything after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// The model that produced an assistant message, kept for display and
    /// regeneration. Absent on user and system messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            model: None,
            attachments: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::new(Role::User, content)
        }
    }

    pub fn assistant(content: impl Into<String>, model: ModelRef) -> Self {
        Self {
            model: Some(model),
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_round_trip_through_strings() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::try_from(role.as_str()), Ok(role));
        }
        assert!(Role::try_from("tool").is_err());
    }

    #[test]
    fn attachment_bytes_are_not_serialized() {
        let attachment = Attachment::new("image/png", vec![1, 2, 3]);
        let json = serde_json::to_value(&attachment).unwrap();

        assert_eq!(json["mime"], "image/png");
        assert!(json.get("bytes").is_none());

        let restored: Attachment = serde_json::from_value(json).unwrap();
        assert!(restored.bytes.is_empty());
        assert_eq!(restored.id, attachment.id);
    }

    #[test]
    fn message_serializes_camel_case() {
        let message = Message::new(Role::User, "hello");
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        assert!(json.get("timestamp").is_some());
        assert!(json.get("model").is_none());
        assert!(json.get("attachments").is_none());
    }

    #[test]
    fn image_detection_uses_mime_prefix() {
        assert!(Attachment::new("image/jpeg", vec![]).is_image());
        assert!(!Attachment::new("text/plain", vec![]).is_image());
    }
}
