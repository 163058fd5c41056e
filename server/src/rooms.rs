use std::{
    collections::HashMap,
    sync::Arc,
    time::Instant,
};

use bell_protocol::{AccountId, ChatMessage, MediaKind, RoomSummary, SessionId};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

pub use crate::model::Room;
use crate::{
    config::RoomSettings,
    error::{BellError, BellResult},
    housekeeping,
    messages::create_message,
    model::{author_of, Participant},
};

/// Everything a session needs after joining a room.
#[derive(Debug, Clone)]
pub struct JoinedRoom {
    pub room: RoomSummary,
    pub participants: Vec<Participant>,
    pub messages: Vec<ChatMessage>,
    /// Sessions that were already in the room.
    pub others: Vec<SessionId>,
}

#[derive(Debug, Clone)]
pub struct Departure {
    pub participant: Participant,
    pub remaining: usize,
    pub recipients: Vec<SessionId>,
}

#[derive(Debug, Clone)]
pub struct Posted {
    pub message: ChatMessage,
    pub recipients: Vec<SessionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomDetails {
    pub room: RoomSummary,
    pub participants: Vec<Participant>,
}

/// In-memory store of rooms. Every compound mutation happens under one lock.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
    settings: RoomSettings,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    fn new_room(&self, room_id: &str, creator: AccountId, is_private: bool) -> Room {
        info!(room = %room_id, creator = %creator, "room created");
        Room::new(
            room_id,
            creator,
            is_private,
            self.settings.capacity,
            self.settings.history_limit,
        )
    }

    /// Summaries of all active rooms, oldest first.
    pub fn list_active(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.lock();
        let mut list: Vec<_> = rooms
            .values()
            .filter(|r| r.active)
            .map(Room::summary)
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn active_count(&self) -> usize {
        self.rooms.lock().values().filter(|r| r.active).count()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.lock().contains_key(room_id)
    }

    pub fn get(&self, room_id: &str) -> Option<RoomDetails> {
        self.rooms.lock().get(room_id).map(|r| RoomDetails {
            room: r.summary(),
            participants: r.participant_list(),
        })
    }

    /// Create an empty room. It stays listed until its grace period runs out
    /// without anyone joining.
    pub fn create(
        self: &Arc<Self>,
        room_id: &str,
        creator: AccountId,
        is_private: bool,
    ) -> BellResult<RoomSummary> {
        let summary = {
            let mut rooms = self.rooms.lock();
            if rooms.contains_key(room_id) {
                return Err(BellError::Conflict(format!("room {room_id} already exists")));
            }
            let mut room = self.new_room(room_id, creator, is_private);
            room.vacated_at = Some(Instant::now());
            let summary = room.summary();
            rooms.insert(room_id.to_string(), room);
            summary
        };
        self.arm_eviction(room_id);
        Ok(summary)
    }

    pub fn get_or_create(self: &Arc<Self>, room_id: &str, requester: AccountId) -> RoomSummary {
        let (summary, created) = {
            let mut rooms = self.rooms.lock();
            match rooms.get(room_id) {
                Some(room) => (room.summary(), false),
                None => {
                    let mut room = self.new_room(room_id, requester, false);
                    room.vacated_at = Some(Instant::now());
                    let summary = room.summary();
                    rooms.insert(room_id.to_string(), room);
                    (summary, true)
                }
            }
        };
        if created {
            self.arm_eviction(room_id);
        }
        summary
    }

    fn arm_eviction(self: &Arc<Self>, room_id: &str) {
        housekeeping::spawn_room_eviction(
            Arc::downgrade(self),
            room_id.to_string(),
            self.settings.grace_period,
        );
    }

    /// Resolve or create the room and add the participant if there is space.
    pub fn join(&self, room_id: &str, participant: Participant) -> BellResult<JoinedRoom> {
        let mut rooms = self.rooms.lock();
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| self.new_room(room_id, participant.account_id, false));

        let rejoining = room.participants.contains_key(&participant.account_id);
        if !rejoining && room.is_full() {
            return Err(BellError::Capacity {
                room: room.id.clone(),
                capacity: room.capacity,
            });
        }
        let session_id = participant.session_id;
        room.participants.insert(participant.account_id, participant);
        room.active = true;
        room.vacated_at = None;

        Ok(JoinedRoom {
            room: room.summary(),
            participants: room.participant_list(),
            messages: room.history.recent(self.settings.join_history),
            others: room
                .session_ids()
                .into_iter()
                .filter(|s| *s != session_id)
                .collect(),
        })
    }

    /// Remove the participant owned by `session_id`, if it is still there.
    pub fn leave(
        &self,
        room_id: &str,
        account_id: &AccountId,
        session_id: &SessionId,
    ) -> Option<Departure> {
        let mut rooms = self.rooms.lock();
        let room = rooms.get_mut(room_id)?;
        if room.participants.get(account_id)?.session_id != *session_id {
            return None;
        }
        let participant = room.participants.remove(account_id)?;
        Some(Departure {
            participant,
            remaining: room.participants.len(),
            recipients: room.session_ids(),
        })
    }

    /// Append a message from the participant owned by `session_id`.
    pub fn post_message(
        &self,
        room_id: &str,
        account_id: &AccountId,
        session_id: &SessionId,
        text: &str,
    ) -> BellResult<Posted> {
        let mut rooms = self.rooms.lock();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| BellError::NotFound(format!("room {room_id}")))?;
        let author = room
            .participants
            .get(account_id)
            .filter(|p| p.session_id == *session_id)
            .map(author_of)
            .ok_or_else(|| BellError::validation("not a participant of this room"))?;
        let message = create_message(room_id, author, text);
        room.history.push(message.clone());
        Ok(Posted {
            message,
            recipients: room.session_ids(),
        })
    }

    /// Update a media flag and return the sessions to notify.
    pub fn set_media(
        &self,
        room_id: &str,
        account_id: &AccountId,
        session_id: &SessionId,
        kind: MediaKind,
        enabled: bool,
    ) -> Option<Vec<SessionId>> {
        let mut rooms = self.rooms.lock();
        let room = rooms.get_mut(room_id)?;
        let participant = room
            .participants
            .get_mut(account_id)
            .filter(|p| p.session_id == *session_id)?;
        match kind {
            MediaKind::Video => participant.video_enabled = enabled,
            MediaKind::Audio => participant.audio_enabled = enabled,
        }
        let own = participant.session_id;
        Some(room.session_ids().into_iter().filter(|s| *s != own).collect())
    }

    /// The participant a session holds in a room.
    pub fn participant_by_session(
        &self,
        room_id: &str,
        session_id: &SessionId,
    ) -> Option<Participant> {
        self.rooms
            .lock()
            .get(room_id)?
            .participants
            .values()
            .find(|p| p.session_id == *session_id)
            .cloned()
    }

    pub fn history(&self, room_id: &str) -> Vec<ChatMessage> {
        self.rooms
            .lock()
            .get(room_id)
            .map(|r| r.history.recent(usize::MAX))
            .unwrap_or_default()
    }

    /// Mark an empty room inactive and remove it after the grace period if it stays empty.
    pub fn schedule_eviction(self: &Arc<Self>, room_id: &str) {
        {
            let mut rooms = self.rooms.lock();
            let Some(room) = rooms.get_mut(room_id) else {
                return;
            };
            if !room.participants.is_empty() {
                return;
            }
            room.active = false;
            room.vacated_at = Some(Instant::now());
        }
        debug!(room = %room_id, grace = ?self.settings.grace_period, "room empty; eviction armed");
        self.arm_eviction(room_id);
    }

    /// Remove the room if it is still empty and has been for the whole grace period.
    pub fn evict_if_vacant(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.lock();
        let expired = rooms.get(room_id).is_some_and(|r| {
            r.participants.is_empty()
                && r
                    .vacated_at
                    .is_some_and(|at| at.elapsed() >= self.settings.grace_period)
        });
        if expired {
            rooms.remove(room_id);
            info!(room = %room_id, "empty room evicted");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bell_protocol::AccountView;
    use std::time::Duration;
    use uuid::Uuid;

    use crate::model::participant_for;

    fn settings(capacity: usize, grace_ms: u64) -> RoomSettings {
        RoomSettings {
            capacity,
            grace_period: Duration::from_millis(grace_ms),
            ..RoomSettings::default()
        }
    }

    fn account(name: &str) -> AccountView {
        AccountView {
            id: Uuid::new_v4(),
            username: name.into(),
            email: format!("{name}@example.com"),
            avatar: None,
            online: true,
            created_at: 0,
        }
    }

    fn participant(name: &str) -> Participant {
        participant_for(Uuid::new_v4(), &account(name))
    }

    #[tokio::test]
    async fn create_conflicts_and_get_or_create_is_idempotent() {
        let rooms = Arc::new(RoomRegistry::new(RoomSettings::default()));
        let owner = Uuid::new_v4();
        rooms.create("general", owner, false).unwrap();
        assert!(matches!(
            rooms.create("general", owner, false),
            Err(BellError::Conflict(_))
        ));
        let a = rooms.get_or_create("lobby", owner);
        let b = rooms.get_or_create("lobby", Uuid::new_v4());
        assert_eq!(a, b);
        assert_eq!(rooms.list_active().len(), 2);
    }

    #[test]
    fn join_reports_others_and_history() {
        let rooms = RoomRegistry::new(RoomSettings::default());
        let alice = participant("alice");
        let bob = participant("bob");
        let first = rooms.join("demo", alice.clone()).unwrap();
        assert_eq!(first.participants.len(), 1);
        assert!(first.others.is_empty());
        rooms
            .post_message("demo", &alice.account_id, &alice.session_id, "hi")
            .unwrap();

        let second = rooms.join("demo", bob.clone()).unwrap();
        assert_eq!(second.room.participant_count, 2);
        assert_eq!(second.others, vec![alice.session_id]);
        assert_eq!(second.messages.len(), 1);
        assert_eq!(second.messages[0].author.username, "alice");
    }

    #[test]
    fn capacity_is_enforced() {
        let rooms = RoomRegistry::new(settings(2, 1000));
        rooms.join("r", participant("a")).unwrap();
        let b = participant("b");
        rooms.join("r", b.clone()).unwrap();
        let err = rooms.join("r", participant("c")).unwrap_err();
        assert!(matches!(err, BellError::Capacity { capacity: 2, .. }));
        // same account from a new session replaces its entry
        let again = Participant {
            session_id: Uuid::new_v4(),
            ..b
        };
        assert_eq!(rooms.join("r", again).unwrap().room.participant_count, 2);
    }

    #[test]
    fn concurrent_joins_respect_capacity() {
        let rooms = Arc::new(RoomRegistry::new(settings(5, 1000)));
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let rooms = rooms.clone();
                std::thread::spawn(move || rooms.join("busy", participant(&format!("u{i}"))).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 5);
        assert_eq!(rooms.get("busy").unwrap().participants.len(), 5);
    }

    #[test]
    fn history_is_bounded() {
        let rooms = RoomRegistry::new(RoomSettings::default());
        let a = participant("a");
        rooms.join("r", a.clone()).unwrap();
        for i in 0..150 {
            rooms
                .post_message("r", &a.account_id, &a.session_id, &format!("{i}"))
                .unwrap();
        }
        let history = rooms.history("r");
        assert_eq!(history.len(), 100);
        assert_eq!(history.first().unwrap().text, "50");
        assert_eq!(history.last().unwrap().text, "149");
        let joined = rooms.join("r", participant("b")).unwrap();
        assert_eq!(joined.messages.len(), 50);
        assert_eq!(joined.messages[0].text, "100");
    }

    #[test]
    fn replaced_session_cannot_post() {
        let rooms = RoomRegistry::new(RoomSettings::default());
        let first = participant("a");
        rooms.join("r", first.clone()).unwrap();
        let second = Participant {
            session_id: Uuid::new_v4(),
            ..first.clone()
        };
        rooms.join("r", second.clone()).unwrap();
        assert!(matches!(
            rooms.post_message("r", &first.account_id, &first.session_id, "stale"),
            Err(BellError::Validation(_))
        ));
        assert!(rooms.history("r").is_empty());
        let posted = rooms
            .post_message("r", &second.account_id, &second.session_id, "fresh")
            .unwrap();
        assert_eq!(posted.recipients, vec![second.session_id]);
    }

    #[test]
    fn leave_ignores_stale_sessions() {
        let rooms = RoomRegistry::new(RoomSettings::default());
        let a = participant("a");
        rooms.join("r", a.clone()).unwrap();
        assert!(rooms
            .leave("r", &a.account_id, &Uuid::new_v4())
            .is_none());
        let gone = rooms.leave("r", &a.account_id, &a.session_id).unwrap();
        assert_eq!(gone.remaining, 0);
        assert!(gone.recipients.is_empty());
    }

    #[test]
    fn media_flags_notify_others() {
        let rooms = RoomRegistry::new(RoomSettings::default());
        let a = participant("a");
        let b = participant("b");
        rooms.join("r", a.clone()).unwrap();
        rooms.join("r", b.clone()).unwrap();
        let notify = rooms
            .set_media("r", &a.account_id, &a.session_id, MediaKind::Video, false)
            .unwrap();
        assert_eq!(notify, vec![b.session_id]);
        let details = rooms.get("r").unwrap();
        let a_view = details
            .participants
            .iter()
            .find(|p| p.account_id == a.account_id)
            .unwrap();
        assert!(!a_view.video_enabled);
        assert!(a_view.audio_enabled);
        assert!(rooms
            .set_media("r", &Uuid::new_v4(), &a.session_id, MediaKind::Audio, false)
            .is_none());
        assert!(rooms
            .set_media("r", &a.account_id, &b.session_id, MediaKind::Audio, false)
            .is_none());
    }

    #[tokio::test]
    async fn empty_room_is_evicted_after_grace() {
        let rooms = Arc::new(RoomRegistry::new(settings(50, 50)));
        let a = participant("a");
        rooms.join("r", a.clone()).unwrap();
        rooms.leave("r", &a.account_id, &a.session_id).unwrap();
        rooms.schedule_eviction("r");
        assert!(rooms.list_active().is_empty());
        assert!(rooms.contains("r"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!rooms.contains("r"));
    }

    #[tokio::test]
    async fn created_rooms_nobody_joins_are_evicted() {
        let rooms = Arc::new(RoomRegistry::new(settings(50, 30)));
        let owner = Uuid::new_v4();
        for i in 0..20 {
            rooms.create(&format!("r{i}"), owner, false).unwrap();
        }
        rooms.get_or_create("lazy", owner);
        assert_eq!(rooms.active_count(), 21);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rooms.active_count(), 0);
        assert!(!rooms.contains("r0"));
        assert!(!rooms.contains("lazy"));
    }

    #[tokio::test]
    async fn joining_a_created_room_keeps_it() {
        let rooms = Arc::new(RoomRegistry::new(settings(50, 40)));
        rooms.create("kept", Uuid::new_v4(), true).unwrap();
        rooms.join("kept", participant("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let details = rooms.get("kept").unwrap();
        assert!(details.room.is_private);
        assert_eq!(details.participants.len(), 1);
    }

    #[tokio::test]
    async fn rejoin_within_grace_keeps_room() {
        let rooms = Arc::new(RoomRegistry::new(settings(50, 80)));
        let a = participant("a");
        rooms.join("r", a.clone()).unwrap();
        rooms.leave("r", &a.account_id, &a.session_id).unwrap();
        rooms.schedule_eviction("r");
        tokio::time::sleep(Duration::from_millis(20)).await;
        rooms.join("r", participant("b")).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rooms.contains("r"));
        assert_eq!(rooms.list_active().len(), 1);
    }

    #[tokio::test]
    async fn stale_timer_does_not_cut_a_new_grace_period_short() {
        let rooms = Arc::new(RoomRegistry::new(settings(50, 100)));
        let a = participant("a");
        rooms.join("r", a.clone()).unwrap();
        rooms.leave("r", &a.account_id, &a.session_id).unwrap();
        rooms.schedule_eviction("r");
        tokio::time::sleep(Duration::from_millis(60)).await;
        // second occupancy ends shortly before the first timer fires
        let b = participant("b");
        rooms.join("r", b.clone()).unwrap();
        rooms.leave("r", &b.account_id, &b.session_id).unwrap();
        rooms.schedule_eviction("r");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rooms.contains("r"));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!rooms.contains("r"));
    }
}
