use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

use super::{ConversationId, Message};
use crate::clock::parse_instant;
use crate::profile::{display_name, Profile};

/// One conversation row in a user's inbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatBox {
    pub id: ConversationId,
    pub peer_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub last_message: String,
    pub last_message_time: String,
}

/// Groups `messages` into one entry per conversation `user_id` takes part in,
/// keeping the newest message of each. Entries come back newest first.
///
/// Messages not involving `user_id` are skipped.
pub fn build_inbox(
    user_id: &str,
    messages: &[Message],
    profiles: &HashMap<String, Profile>,
) -> Vec<ChatBox> {
    let mut latest: IndexMap<ConversationId, &Message> = IndexMap::new();
    for message in messages.iter().filter(|m| m.involves(user_id)) {
        latest
            .entry(message.conversation_id())
            .and_modify(|current| {
                if is_newer(message, *current) {
                    *current = message;
                }
            })
            .or_insert(message);
    }

    let mut boxes: Vec<ChatBox> = latest
        .into_iter()
        .map(|(id, message)| {
            let peer_id = if message.sender_id == user_id {
                message.receiver_id.clone()
            } else {
                message.sender_id.clone()
            };
            let profile = profiles.get(&peer_id);
            ChatBox {
                name: display_name(profile, &peer_id),
                avatar_url: profile.and_then(|p| p.avatar_url.clone()),
                last_message: message.content.clone(),
                last_message_time: message.created_at.clone(),
                peer_id,
                id,
            }
        })
        .collect();
    // Stable, so conversations with equal times keep first-seen order.
    boxes.sort_by(|a, b| {
        let a_at = parse_instant(&a.last_message_time);
        let b_at = parse_instant(&b.last_message_time);
        b_at.cmp(&a_at)
    });
    boxes
}

fn is_newer(candidate: &Message, current: &Message) -> bool {
    match (candidate.sent_at(), current.sent_at()) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}
