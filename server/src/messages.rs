use std::collections::VecDeque;

use bell_protocol::{Author, ChatMessage};
use time::OffsetDateTime;
use uuid::Uuid;

/// Ordered message log that keeps only the most recent `limit` entries.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    entries: VecDeque<ChatMessage>,
    limit: usize,
}

impl MessageHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(128)),
            limit,
        }
    }

    /// Append a message, dropping the oldest ones beyond the limit.
    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push_back(message);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ChatMessage> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build a new message. The author is copied so history survives later profile changes.
pub fn create_message(room_id: &str, author: Author, text: &str) -> ChatMessage {
    ChatMessage {
        id: Uuid::new_v4(),
        room_id: room_id.to_string(),
        text: text.to_string(),
        author,
        created_at: OffsetDateTime::now_utc().unix_timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            id: Uuid::nil(),
            username: "alice".into(),
            avatar: None,
        }
    }

    #[test]
    fn keeps_last_hundred_in_order() {
        let mut history = MessageHistory::new(100);
        for i in 0..150 {
            history.push(create_message("demo", author(), &format!("m{i}")));
        }
        assert_eq!(history.len(), 100);
        let all = history.recent(usize::MAX);
        let texts: Vec<_> = all.iter().map(|m| m.text.as_str()).collect();
        let expected: Vec<String> = (50..150).map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn recent_returns_tail() {
        let mut history = MessageHistory::new(10);
        assert!(history.is_empty());
        for i in 0..5 {
            history.push(create_message("demo", author(), &i.to_string()));
        }
        let tail = history.recent(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "3");
        assert_eq!(tail[1].text, "4");
        assert_eq!(history.recent(50).len(), 5);
    }
}
