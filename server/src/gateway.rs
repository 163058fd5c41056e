//! Per-connection session state machine.
//!
//! `Unauthenticated -> Authenticated -> InRoom`, back to `Authenticated` on
//! leave, and `Closed` from anywhere on disconnect. Every client event goes
//! through [`Gateway::dispatch`], which rejects events that do not fit the
//! current state and turns handler errors into an `error` event for the
//! originating session only.

use std::sync::Arc;

use bell_protocol::{
    AccountId, ClientEvent, MediaKind, MediaToggle, RelayedSignal, RoomId, ServerEvent,
    SessionId, SignalRequest, SignalSender,
};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{BellError, BellResult},
    hub::SessionHub,
    model::participant_for,
    presence::Presence,
    rooms::RoomRegistry,
    users::UserRegistry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { account: AccountId },
    InRoom { account: AccountId, room: RoomId },
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated { .. } => "authenticated",
            Self::InRoom { .. } => "in a room",
            Self::Closed => "closed",
        }
    }
}

/// Identifiers bound to one live connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: SessionState,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn account(&self) -> Option<AccountId> {
        match &self.state {
            SessionState::Authenticated { account } | SessionState::InRoom { account, .. } => {
                Some(*account)
            }
            _ => None,
        }
    }

    pub fn room(&self) -> Option<&str> {
        match &self.state {
            SessionState::InRoom { room, .. } => Some(room),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

pub struct Gateway {
    users: Arc<UserRegistry>,
    rooms: Arc<RoomRegistry>,
    presence: Presence,
    hub: SessionHub,
}

impl Gateway {
    pub fn new(users: Arc<UserRegistry>, rooms: Arc<RoomRegistry>) -> Self {
        Self {
            users,
            rooms,
            presence: Presence::new(),
            hub: SessionHub::new(),
        }
    }

    pub fn users(&self) -> &Arc<UserRegistry> {
        &self.users
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub fn connections(&self) -> usize {
        self.hub.count()
    }

    /// Start a session for a new connection; events for it go to `tx`.
    pub fn connect(&self, tx: Sender<ServerEvent>) -> Session {
        let id = Uuid::new_v4();
        self.hub.register(id, tx);
        debug!(session = %id, "session opened");
        Session {
            id,
            state: SessionState::Unauthenticated,
        }
    }

    /// Handle one client event.
    pub fn dispatch(&self, session: &mut Session, event: ClientEvent) {
        let name = event.name();
        if let Err(err) = self.handle(session, event) {
            debug!(session = %session.id, event = name, error = %err, "event rejected");
            self.reject(session, &err);
        }
    }

    /// Report an error to the session that caused it.
    pub fn reject(&self, session: &Session, err: &BellError) {
        self.hub.send(&session.id, ServerEvent::Error(err.payload()));
    }

    fn handle(&self, session: &mut Session, event: ClientEvent) -> BellResult<()> {
        use SessionState::*;

        match (session.state.clone(), event) {
            (Unauthenticated, ClientEvent::Authenticate { token }) => {
                self.authenticate(session, &token);
                Ok(())
            }
            (Authenticated { account }, ClientEvent::JoinRoom { room_id }) => {
                self.join_room(session, account, None, &room_id)
            }
            (InRoom { account, room }, ClientEvent::JoinRoom { room_id }) => {
                self.join_room(session, account, Some(room), &room_id)
            }
            (InRoom { account, room }, ClientEvent::LeaveRoom) => {
                self.depart(session.id, account, &room);
                session.state = Authenticated { account };
                Ok(())
            }
            (_, ClientEvent::LeaveRoom) => Ok(()),
            (InRoom { account, room }, event) if !self.holds_seat(session.id, &room) => {
                // another session of this account joined the room and took the seat
                debug!(session = %session.id, room = %room, "seat taken over; back to authenticated");
                session.state = Authenticated { account };
                match event {
                    ClientEvent::ToggleVideo { .. } | ClientEvent::ToggleAudio { .. } => Ok(()),
                    event => Err(BellError::InvalidState {
                        event: event.name(),
                        state: session.state.name(),
                    }),
                }
            }
            (InRoom { account, room }, ClientEvent::ChatMessage { text }) => {
                self.send_message(session.id, account, &room, &text)
            }
            (InRoom { account, room }, ClientEvent::ToggleVideo { enabled }) => {
                self.toggle_media(session.id, account, &room, MediaKind::Video, enabled);
                Ok(())
            }
            (InRoom { account, room }, ClientEvent::ToggleAudio { enabled }) => {
                self.toggle_media(session.id, account, &room, MediaKind::Audio, enabled);
                Ok(())
            }
            (InRoom { account, room }, ClientEvent::WebrtcOffer(req)) => {
                self.relay(session.id, account, &room, SignalKind::Offer, req)
            }
            (InRoom { account, room }, ClientEvent::WebrtcAnswer(req)) => {
                self.relay(session.id, account, &room, SignalKind::Answer, req)
            }
            (InRoom { account, room }, ClientEvent::WebrtcIceCandidate(req)) => {
                self.relay(session.id, account, &room, SignalKind::IceCandidate, req)
            }
            (state, event) => Err(BellError::InvalidState {
                event: event.name(),
                state: state.name(),
            }),
        }
    }

    fn authenticate(&self, session: &mut Session, token: &str) {
        let user = self
            .users
            .validate_session_token(token)
            .and_then(|claims| self.users.get(&claims.sub));
        let Some(user) = user else {
            warn!(session = %session.id, "authentication failed");
            self.hub.send(
                &session.id,
                ServerEvent::AuthError {
                    message: "invalid or expired token".into(),
                },
            );
            return;
        };

        session.state = SessionState::Authenticated { account: user.id };
        self.presence
            .connect(user.id, || self.users.set_online(&user.id, true));
        info!(session = %session.id, account = %user.id, username = %user.username, "session authenticated");
        let user = self.users.get(&user.id).unwrap_or(user);
        self.hub
            .send(&session.id, ServerEvent::Authenticated { user });
    }

    fn join_room(
        &self,
        session: &mut Session,
        account: AccountId,
        current: Option<RoomId>,
        room_id: &str,
    ) -> BellResult<()> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(BellError::validation("roomId is required"));
        }

        if current.as_deref() == Some(room_id) && self.holds_seat(session.id, room_id) {
            // already here; just resend the snapshot
            let details = self
                .rooms
                .get(room_id)
                .ok_or_else(|| BellError::NotFound(format!("room {room_id}")))?;
            let history = self.rooms.history(room_id);
            let skip = history
                .len()
                .saturating_sub(self.rooms.settings().join_history);
            self.hub.send(
                &session.id,
                ServerEvent::RoomJoined {
                    room: details.room,
                    participants: details.participants,
                    messages: history.into_iter().skip(skip).collect(),
                },
            );
            return Ok(());
        }

        let user = self
            .users
            .get(&account)
            .ok_or_else(|| BellError::Auth("account no longer exists".into()))?;
        let participant = participant_for(session.id, &user);
        let joined = self.rooms.join(room_id, participant.clone())?;

        if let Some(old) = current.filter(|old| old != room_id) {
            self.depart(session.id, account, &old);
        }
        session.state = SessionState::InRoom {
            account,
            room: room_id.to_string(),
        };
        info!(
            session = %session.id,
            room = %room_id,
            participants = joined.room.participant_count,
            "joined room"
        );

        let count = joined.room.participant_count;
        self.hub.send(
            &session.id,
            ServerEvent::RoomJoined {
                room: joined.room,
                participants: joined.participants,
                messages: joined.messages,
            },
        );
        self.hub.broadcast(
            &joined.others,
            &ServerEvent::UserJoined {
                participant,
                participant_count: count,
            },
        );
        Ok(())
    }

    fn holds_seat(&self, session_id: SessionId, room_id: &str) -> bool {
        self.rooms
            .participant_by_session(room_id, &session_id)
            .is_some()
    }

    /// Leave side effects: drop the participant, tell the rest, arm eviction when empty.
    fn depart(&self, session_id: SessionId, account: AccountId, room_id: &str) {
        let Some(departure) = self.rooms.leave(room_id, &account, &session_id) else {
            return;
        };
        info!(session = %session_id, room = %room_id, remaining = departure.remaining, "left room");
        self.hub.broadcast(
            &departure.recipients,
            &ServerEvent::UserLeft {
                account_id: departure.participant.account_id,
                session_id: departure.participant.session_id,
                username: departure.participant.username,
                participant_count: departure.remaining,
            },
        );
        if departure.remaining == 0 {
            self.rooms.schedule_eviction(room_id);
        }
    }

    fn send_message(
        &self,
        session_id: SessionId,
        account: AccountId,
        room_id: &str,
        text: &str,
    ) -> BellResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let max = self.rooms.settings().max_message_len;
        if text.chars().count() > max {
            return Err(BellError::validation(format!(
                "message is longer than {max} characters"
            )));
        }
        let posted = self
            .rooms
            .post_message(room_id, &account, &session_id, text)?;
        self.hub.broadcast(
            &posted.recipients,
            &ServerEvent::ChatMessage(posted.message),
        );
        Ok(())
    }

    fn toggle_media(
        &self,
        session_id: SessionId,
        account: AccountId,
        room_id: &str,
        kind: MediaKind,
        enabled: bool,
    ) {
        let Some(recipients) = self
            .rooms
            .set_media(room_id, &account, &session_id, kind, enabled)
        else {
            return;
        };
        let toggle = MediaToggle {
            account_id: account,
            session_id,
            enabled,
        };
        let event = match kind {
            MediaKind::Video => ServerEvent::UserVideoToggle(toggle),
            MediaKind::Audio => ServerEvent::UserAudioToggle(toggle),
        };
        self.hub.broadcast(&recipients, &event);
    }

    fn relay(
        &self,
        session_id: SessionId,
        account: AccountId,
        room_id: &str,
        kind: SignalKind,
        req: SignalRequest,
    ) -> BellResult<()> {
        let target = self
            .rooms
            .participant_by_session(room_id, &req.target)
            .ok_or_else(|| BellError::validation("target session is not in this room"))?;
        let sender = match kind {
            SignalKind::Offer => self.users.get(&account).map(|u| SignalSender {
                account_id: u.id,
                username: u.username,
            }),
            SignalKind::Answer | SignalKind::IceCandidate => None,
        };
        let signal = RelayedSignal {
            from: session_id,
            sender,
            payload: req.payload,
        };
        let event = match kind {
            SignalKind::Offer => ServerEvent::WebrtcOffer(signal),
            SignalKind::Answer => ServerEvent::WebrtcAnswer(signal),
            SignalKind::IceCandidate => ServerEvent::WebrtcIceCandidate(signal),
        };
        if !self.hub.send(&target.session_id, event) {
            debug!(from = %session_id, to = %target.session_id, "relay target gone");
        }
        Ok(())
    }

    /// Tear the session down. Terminal; emits nothing to the closed session.
    pub fn disconnect(&self, session: &mut Session) {
        let state = std::mem::replace(&mut session.state, SessionState::Closed);
        let account = match state {
            SessionState::InRoom { account, room } => {
                self.depart(session.id, account, &room);
                Some(account)
            }
            SessionState::Authenticated { account } => Some(account),
            SessionState::Unauthenticated | SessionState::Closed => None,
        };
        if let Some(account) = account {
            self.presence
                .disconnect(account, || self.users.set_online(&account, false));
        }
        self.hub.remove(&session.id);
        debug!(session = %session.id, "session closed");
    }
}
