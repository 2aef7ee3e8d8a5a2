//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol. Every frame is an envelope
//! tagged by an `action` field; server→client traffic adds three list
//! envelopes (room list, roster, room member list) that share the same tag
//! space. Multiword field names travel in camelCase.

use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::types::{ClientId, RoomId};

/// Wire action tag
///
/// Client→server frames use the routing actions; the rest only ever appear
/// in server→client envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Chat message targeted at a room
    SendMessage,
    /// Chat message with an attached audio payload
    SendAudioMessage,
    /// Join (or create) a room by name
    JoinRoom,
    /// Leave a room by id
    LeaveRoom,
    /// Open a private room with another client by id
    JoinRoomPrivate,
    /// Roster broadcast after a registration
    UserJoin,
    /// Roster broadcast after an unregistration
    UserLeft,
    /// Login confirmation to the connecting client
    UserLoggedIn,
    /// Join confirmation to the requesting client
    RoomJoined,
    /// Typing indicator ("true"/"false" in the body)
    TypingAction,
    /// Delete a room by id
    DeleteRoom,
    /// Visible-room list push
    RoomList,
    /// Member list push for one room
    RoomClientsList,
}

/// Client reference as it appears in envelopes and rosters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: ClientId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_color: String,
}

/// Room reference as it appears in envelope targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub private: bool,
}

impl RoomInfo {
    /// Allocate a reference for a brand-new room
    pub fn new(name: &str, private: bool) -> Self {
        Self {
            id: RoomId::new(),
            name: name.to_string(),
            private,
        }
    }
}

/// Room-list entry: a room reference plus its current member count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub private: bool,
    pub member_count: usize,
}

/// The message envelope
///
/// Inbound frames usually carry only `action` plus whichever of
/// `message`/`target`/`audioData` the action needs; `sender` and
/// `timestamp` are stamped server-side before the frame is forwarded
/// anywhere. Immutable once sent into a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub action: Action,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RoomInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ClientInfo>,
    #[serde(default)]
    pub timestamp: String,
    /// Opaque client-encoded audio payload; relayed, never decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
}

impl ChatMessage {
    /// Login confirmation sent to a client right after its room list
    pub fn logged_in(sender: ClientInfo) -> Self {
        Self {
            action: Action::UserLoggedIn,
            message: String::new(),
            target: None,
            sender: Some(sender),
            timestamp: String::new(),
            audio_data: None,
        }
    }

    /// Join confirmation; `sender` is the counterpart that caused the join
    /// (the client itself for plain joins, the peer for private ones)
    pub fn room_joined(target: RoomInfo, sender: ClientInfo) -> Self {
        Self {
            action: Action::RoomJoined,
            message: String::new(),
            target: Some(target),
            sender: Some(sender),
            timestamp: String::new(),
            audio_data: None,
        }
    }
}

impl Default for ChatMessage {
    fn default() -> Self {
        Self {
            action: Action::SendMessage,
            message: String::new(),
            target: None,
            sender: None,
            timestamp: String::new(),
            audio_data: None,
        }
    }
}

/// Visible-room list envelope (`room-list`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomListMessage {
    pub action: Action,
    pub rooms: Vec<RoomSummary>,
}

impl RoomListMessage {
    pub fn new(rooms: Vec<RoomSummary>) -> Self {
        Self {
            action: Action::RoomList,
            rooms,
        }
    }
}

/// Roster envelope (`user-join` / `user-left` with the full client list)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientsListMessage {
    pub action: Action,
    pub clients: Vec<ClientInfo>,
}

impl ClientsListMessage {
    pub fn new(action: Action, clients: Vec<ClientInfo>) -> Self {
        Self { action, clients }
    }
}

/// Member list envelope for one room (`room-clients-list`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomClientsListMessage {
    pub action: Action,
    pub clients: Vec<ClientInfo>,
}

impl RoomClientsListMessage {
    pub fn new(clients: Vec<ClientInfo>) -> Self {
        Self {
            action: Action::RoomClientsList,
            clients,
        }
    }
}

/// Anything a client mailbox can carry
///
/// Untagged: each variant already carries its own `action` field, so the
/// envelopes serialize exactly as they would standalone.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Chat(ChatMessage),
    RoomList(RoomListMessage),
    Clients(ClientsListMessage),
    RoomClients(RoomClientsListMessage),
}

/// Current wall-clock time as the wire timestamp
pub fn clock_stamp() -> String {
    let now = Local::now();
    format_clock(now.hour(), now.minute())
}

/// Wire timestamp format: unpadded hour, zero-padded minute
pub fn format_clock(hour: u32, minute: u32) -> String {
    format!("{}:{:02}", hour, minute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_frame_deserialize_with_defaults() {
        let json = r#"{"action": "join-room", "message": "general"}"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.action, Action::JoinRoom);
        assert_eq!(msg.message, "general");
        assert!(msg.target.is_none());
        assert!(msg.sender.is_none());
        assert_eq!(msg.timestamp, "");
    }

    #[test]
    fn test_unknown_action_rejected() {
        let json = r#"{"action": "self-destruct", "message": "now"}"#;
        assert!(serde_json::from_str::<ChatMessage>(json).is_err());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let sender = ClientInfo {
            id: ClientId::new(),
            name: "alice".to_string(),
            avatar_color: "teal-9".to_string(),
        };
        let target = RoomInfo::new("general", false);
        let msg = ChatMessage {
            action: Action::SendMessage,
            message: "hello there".to_string(),
            target: Some(target.clone()),
            sender: Some(sender.clone()),
            timestamp: "9:05".to_string(),
            audio_data: None,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: ChatMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.action, Action::SendMessage);
        assert_eq!(decoded.message, "hello there");
        assert_eq!(decoded.sender.as_ref().unwrap().id, sender.id);
        assert_eq!(decoded.sender.as_ref().unwrap().name, "alice");
        assert_eq!(decoded.target.as_ref().unwrap().id, target.id);
        assert_eq!(decoded.target.as_ref().unwrap().name, "general");
        assert_eq!(decoded.timestamp, "9:05");
    }

    #[test]
    fn test_audio_payload_relayed() {
        let msg = ChatMessage {
            action: Action::SendAudioMessage,
            message: String::new(),
            target: Some(RoomInfo::new("general", false)),
            sender: None,
            timestamp: String::new(),
            audio_data: Some("data:audio/webm;base64,AAAA".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"audioData\":\"data:audio/webm;base64,AAAA\""));
        let decoded: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.audio_data.as_deref(), Some("data:audio/webm;base64,AAAA"));
    }

    #[test]
    fn test_optional_fields_omitted_when_absent() {
        let msg = ChatMessage::logged_in(ClientInfo {
            id: ClientId::new(),
            name: "bob".to_string(),
            avatar_color: "red-10".to_string(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"action\":\"user-logged-in\""));
        assert!(json.contains("\"avatarColor\":\"red-10\""));
        assert!(!json.contains("\"target\""));
        assert!(!json.contains("\"audioData\""));
    }

    #[test]
    fn test_room_list_serializes_flat() {
        let payload = Payload::RoomList(RoomListMessage::new(vec![RoomSummary {
            id: RoomId::new(),
            name: "general".to_string(),
            private: false,
            member_count: 2,
        }]));
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"action\":\"room-list\""));
        assert!(json.contains("\"memberCount\":2"));
        assert!(!json.contains("RoomList"));
    }

    #[test]
    fn test_roster_uses_user_join_tag() {
        let msg = ClientsListMessage::new(Action::UserJoin, vec![]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"action\":\"user-join\""));
        assert!(json.contains("\"clients\":[]"));
    }

    #[test]
    fn test_clock_format() {
        assert_eq!(format_clock(9, 5), "9:05");
        assert_eq!(format_clock(23, 59), "23:59");
        assert_eq!(format_clock(0, 0), "0:00");
    }
}
