use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONVERSATION_DELIMITER: char = '+';

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("invalid conversation id '{0}'")]
    InvalidConversationId(String),
    #[error("user '{user}' is not a participant of conversation '{conversation}'")]
    NotAParticipant { conversation: String, user: String },
}

/// Order-independent key for a direct conversation between two users:
/// the two ids sorted and joined with `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn between(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{first}{CONVERSATION_DELIMITER}{second}"))
    }

    /// Accepts a key from outside (a link, a route) and normalises it to the
    /// canonical order.
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let (a, b) = split_pair(raw)?;
        Ok(Self::between(a, b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn participants(&self) -> (&str, &str) {
        // Constructed only through `between`/`parse`, so the delimiter is present.
        self.0
            .split_once(CONVERSATION_DELIMITER)
            .unwrap_or((self.0.as_str(), ""))
    }

    pub fn contains(&self, user_id: &str) -> bool {
        let (a, b) = self.participants();
        a == user_id || b == user_id
    }

    pub fn other_participant(&self, self_id: &str) -> Result<&str, ChatError> {
        let (a, b) = self.participants();
        pick_other(&self.0, a, b, self_id)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn conversation_id(a: &str, b: &str) -> ConversationId {
    ConversationId::between(a, b)
}

/// Resolves the peer in `conversation_id` from `self_id`'s point of view.
pub fn other_participant(conversation_id: &str, self_id: &str) -> Result<String, ChatError> {
    let (a, b) = split_pair(conversation_id)?;
    pick_other(conversation_id, a, b, self_id).map(str::to_string)
}

fn split_pair(raw: &str) -> Result<(&str, &str), ChatError> {
    let mut parts = raw.split(CONVERSATION_DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() => Ok((a, b)),
        _ => Err(ChatError::InvalidConversationId(raw.to_string())),
    }
}

fn pick_other<'a>(
    conversation: &str,
    a: &'a str,
    b: &'a str,
    self_id: &str,
) -> Result<&'a str, ChatError> {
    if a == self_id {
        Ok(b)
    } else if b == self_id {
        Ok(a)
    } else {
        Err(ChatError::NotAParticipant {
            conversation: conversation.to_string(),
            user: self_id.to_string(),
        })
    }
}
