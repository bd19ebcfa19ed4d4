//! One end-user chat connection

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::UserIdentity;

/// State owned by a single bridge for the lifetime of a connection
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub user: Option<UserIdentity>,
    pub created_at: DateTime<Utc>,
    /// Profile summary attached to every turn of this session
    user_context: Option<String>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(user: Option<UserIdentity>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user,
            created_at: Utc::now(),
            user_context: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_user_context(mut self, context: Option<String>) -> Self {
        self.user_context = context;
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn user_context(&self) -> Option<&str> {
        self.user_context.as_deref()
    }

    /// Handle that tears the session down when cancelled
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
