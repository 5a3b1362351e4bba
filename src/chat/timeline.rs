use thiserror::Error;
use time::{Duration, OffsetDateTime};

use super::Message;

/// Messages at least this far apart get a fresh timestamp marker.
pub const DEFAULT_GAP: Duration = Duration::minutes(5);

/// One row of a rendered conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayItem<'a> {
    Timestamp { time: OffsetDateTime },
    Message(&'a Message),
}

impl DisplayItem<'_> {
    pub fn is_marker(&self) -> bool {
        matches!(self, DisplayItem::Timestamp { .. })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimelineError {
    #[error("message at index {index} is older than the message before it")]
    UnsortedInput { index: usize },
    #[error("message {id} has an unparseable timestamp '{raw}'")]
    InvalidTimestamp { id: i64, raw: String },
}

/// Interleaves timestamp markers into `messages`, which must already be sorted
/// oldest first. The first message always gets a marker.
///
/// A message whose timestamp cannot be parsed is emitted without a marker and
/// does not move the gap reference.
pub fn group_by_time(messages: &[Message], gap: Duration) -> Vec<DisplayItem<'_>> {
    let mut items = Vec::with_capacity(messages.len() * 2);
    let mut last = OffsetDateTime::UNIX_EPOCH;
    for message in messages {
        if let Some(sent_at) = message.sent_at() {
            if sent_at - last >= gap {
                items.push(DisplayItem::Timestamp { time: sent_at });
            }
            last = sent_at;
        }
        items.push(DisplayItem::Message(message));
    }
    items
}

/// Like [`group_by_time`], but verifies the ordering precondition first.
pub fn group_by_time_checked(
    messages: &[Message],
    gap: Duration,
) -> Result<Vec<DisplayItem<'_>>, TimelineError> {
    let mut previous: Option<OffsetDateTime> = None;
    for (index, message) in messages.iter().enumerate() {
        let sent_at = message
            .sent_at()
            .ok_or_else(|| TimelineError::InvalidTimestamp {
                id: message.id,
                raw: message.created_at.clone(),
            })?;
        if previous.is_some_and(|prev| sent_at < prev) {
            return Err(TimelineError::UnsortedInput { index });
        }
        previous = Some(sent_at);
    }
    Ok(group_by_time(messages, gap))
}
