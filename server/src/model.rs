use std::{collections::HashMap, time::Instant};

use bell_protocol::{
    AccountId, AccountView, Author, ParticipantView, RoomId, RoomSummary, SessionId,
};
use time::OffsetDateTime;

use crate::messages::MessageHistory;

pub type Participant = ParticipantView;

/// Project an account into a room. Media starts enabled.
pub fn participant_for(session_id: SessionId, account: &AccountView) -> Participant {
    Participant {
        account_id: account.id,
        session_id,
        username: account.username.clone(),
        avatar: account.avatar.clone(),
        video_enabled: true,
        audio_enabled: true,
        joined_at: OffsetDateTime::now_utc().unix_timestamp(),
    }
}

pub fn author_of(participant: &Participant) -> Author {
    Author {
        id: participant.account_id,
        username: participant.username.clone(),
        avatar: participant.avatar.clone(),
    }
}

#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub creator: AccountId,
    pub is_private: bool,
    pub participants: HashMap<AccountId, Participant>,
    pub history: MessageHistory,
    pub active: bool,
    pub capacity: usize,
    pub created_at: i64,
    /// When the room last lost its final participant.
    pub vacated_at: Option<Instant>,
}

impl Room {
    pub fn new(
        id: &str,
        creator: AccountId,
        is_private: bool,
        capacity: usize,
        history_limit: usize,
    ) -> Self {
        Self {
            id: id.to_string(),
            creator,
            is_private,
            participants: HashMap::new(),
            history: MessageHistory::new(history_limit),
            active: true,
            capacity,
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
            vacated_at: None,
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.id.clone(),
            participant_count: self.participants.len(),
            capacity: self.capacity,
            created_at: self.created_at,
            is_private: self.is_private,
        }
    }

    /// Participants in join order.
    pub fn participant_list(&self) -> Vec<Participant> {
        let mut list: Vec<_> = self.participants.values().cloned().collect();
        list.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.username.cmp(&b.username))
        });
        list
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.participants.values().map(|p| p.session_id).collect()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.capacity
    }
}
