use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type AccountId = Uuid;
pub type SessionId = Uuid;
pub type MessageId = Uuid;
pub type RoomId = String;

/// Public projection of an account. Never carries the password hash.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: AccountId,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub online: bool,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub participant_count: usize,
    pub capacity: usize,
    pub created_at: i64,
    #[serde(default)]
    pub is_private: bool,
}

/// A room-scoped projection of an account.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub account_id: AccountId,
    pub session_id: SessionId,
    pub username: String,
    pub avatar: Option<String>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub joined_at: i64,
}

/// Author fields copied into a message when it is sent.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: AccountId,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub text: String,
    pub author: Author,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// WebRTC signal sent by a client towards another session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SignalRequest {
    pub target: SessionId,
    #[serde(default)]
    pub payload: Value,
}

/// Events sent from a client to the server over the real-time channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    Authenticate { token: String },
    JoinRoom { room_id: String },
    LeaveRoom,
    ChatMessage { text: String },
    ToggleVideo { enabled: bool },
    ToggleAudio { enabled: bool },
    WebrtcOffer(SignalRequest),
    WebrtcAnswer(SignalRequest),
    WebrtcIceCandidate(SignalRequest),
}

impl ClientEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::ChatMessage { .. } => "chat_message",
            Self::ToggleVideo { .. } => "toggle_video",
            Self::ToggleAudio { .. } => "toggle_audio",
            Self::WebrtcOffer(_) => "webrtc_offer",
            Self::WebrtcAnswer(_) => "webrtc_answer",
            Self::WebrtcIceCandidate(_) => "webrtc_ice_candidate",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaToggle {
    pub account_id: AccountId,
    pub session_id: SessionId,
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalSender {
    pub account_id: AccountId,
    pub username: String,
}

/// A WebRTC signal as delivered to its target session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RelayedSignal {
    pub from: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SignalSender>,
    pub payload: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    Conflict,
    Capacity,
    Configuration,
    NotFound,
    InvalidState,
    Internal,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

/// Events sent from the server to a client over the real-time channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Authenticated {
        user: AccountView,
    },
    AuthError {
        message: String,
    },
    RoomJoined {
        room: RoomSummary,
        participants: Vec<ParticipantView>,
        messages: Vec<ChatMessage>,
    },
    UserJoined {
        participant: ParticipantView,
        participant_count: usize,
    },
    UserLeft {
        account_id: AccountId,
        session_id: SessionId,
        username: String,
        participant_count: usize,
    },
    ChatMessage(ChatMessage),
    UserVideoToggle(MediaToggle),
    UserAudioToggle(MediaToggle),
    WebrtcOffer(RelayedSignal),
    WebrtcAnswer(RelayedSignal),
    WebrtcIceCandidate(RelayedSignal),
    Error(ErrorPayload),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_event_wire_shape() {
        let ev: ClientEvent =
            serde_json::from_value(json!({"event":"join_room","data":{"roomId":"demo"}})).unwrap();
        assert_eq!(
            ev,
            ClientEvent::JoinRoom {
                room_id: "demo".into()
            }
        );
        assert_eq!(ev.name(), "join_room");

        let ev: ClientEvent = serde_json::from_value(json!({"event":"leave_room"})).unwrap();
        assert_eq!(ev, ClientEvent::LeaveRoom);
    }

    #[test]
    fn signal_payload_is_opaque() {
        let target = Uuid::new_v4();
        let ev: ClientEvent = serde_json::from_value(json!({
            "event": "webrtc_ice_candidate",
            "data": {"target": target, "payload": {"candidate": "a=1", "sdpMLineIndex": 0}}
        }))
        .unwrap();
        let ClientEvent::WebrtcIceCandidate(req) = ev else {
            panic!("wrong variant");
        };
        assert_eq!(req.target, target);
        assert_eq!(req.payload["candidate"], "a=1");
    }

    #[test]
    fn server_event_uses_camel_case_fields() {
        let ev = ServerEvent::UserLeft {
            account_id: Uuid::nil(),
            session_id: Uuid::nil(),
            username: "bob".into(),
            participant_count: 1,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "user_left");
        assert_eq!(v["data"]["participantCount"], 1);
        assert_eq!(v["data"]["username"], "bob");
    }

    #[test]
    fn offer_without_sender_omits_field() {
        let ev = ServerEvent::WebrtcAnswer(RelayedSignal {
            from: Uuid::nil(),
            sender: None,
            payload: json!({"sdp": "x"}),
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert!(v["data"].get("sender").is_none());
        assert_eq!(v["data"]["payload"]["sdp"], "x");
    }

    #[test]
    fn error_kind_is_snake_case() {
        let ev = ServerEvent::Error(ErrorPayload {
            kind: ErrorKind::InvalidState,
            message: "nope".into(),
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["data"]["kind"], "invalid_state");
    }
}
