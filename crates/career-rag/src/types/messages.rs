//! Messages exchanged over a chat session

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The only inbound message kind the bridge accepts
pub const USER_MESSAGE_KIND: &str = "user_msg";

/// Inbound message from the end-user client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default, alias = "conversation_id")]
    pub conversation_id: String,
    #[serde(default)]
    pub text: String,
}

impl ClientMessage {
    /// Parse and validate a raw inbound frame into a turn
    pub fn parse_turn(raw: &str) -> Result<Turn> {
        let message: ClientMessage = serde_json::from_str(raw)
            .map_err(|e| Error::validation(format!("Invalid message format: {}", e)))?;
        message.into_turn()
    }

    /// Validate kind and text
    pub fn into_turn(self) -> Result<Turn> {
        if self.kind != USER_MESSAGE_KIND {
            return Err(Error::validation(format!(
                "Invalid message format: unsupported kind '{}'",
                self.kind
            )));
        }
        if self.text.trim().is_empty() {
            return Err(Error::validation("Invalid message format: empty text"));
        }
        Ok(Turn {
            conversation_id: self.conversation_id,
            text: self.text,
            context: None,
        })
    }
}

/// Outbound event to the end-user client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    /// One generated token, in emission order
    Token(String),
    /// Out-of-band source link for web evidence
    SourceUrl(String),
    /// Structured error for a failed or rejected turn
    Error(String),
}

impl ServerEvent {
    pub fn is_token(&self) -> bool {
        matches!(self, ServerEvent::Token(_))
    }
}

/// One user message within a session
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub conversation_id: String,
    pub text: String,
    /// Structured user context injected by the bridge
    pub context: Option<String>,
}

impl Turn {
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }
}

/// Identity returned by the authentication service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}
