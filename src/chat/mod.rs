use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::clock::parse_instant;

pub mod identity;
pub mod inbox;
pub mod timeline;

pub use identity::{conversation_id, other_participant, ChatError, ConversationId};
pub use inbox::{build_inbox, ChatBox};
pub use timeline::{group_by_time, group_by_time_checked, DisplayItem, TimelineError, DEFAULT_GAP};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: String,
}

impl Message {
    pub fn sent_at(&self) -> Option<OffsetDateTime> {
        parse_instant(&self.created_at)
    }

    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::between(&self.sender_id, &self.receiver_id)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }
}

#[cfg(test)]
pub(crate) fn sample(id: i64, from: &str, to: &str, at: &str) -> Message {
    Message {
        id,
        sender_id: from.to_string(),
        receiver_id: to.to_string(),
        content: format!("message {id}"),
        created_at: at.to_string(),
    }
}
