//! Room actor
//!
//! One task per room owning that room's member list and message history.
//! Membership changes and broadcasts arrive on a single event channel and
//! are applied serially, which is what gives per-room message ordering.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::directory::Directory;
use crate::message::{
    clock_stamp, Action, ChatMessage, ClientInfo, Payload, RoomClientsListMessage, RoomInfo,
};
use crate::types::{ClientId, RoomId};

/// Events a room actor consumes
#[derive(Debug)]
pub enum RoomEvent {
    /// Add a member (idempotent)
    Register(ClientInfo),
    /// Remove a member (idempotent)
    Unregister(ClientId),
    /// Fan a message out to the current members
    Broadcast(ChatMessage),
    /// Stop the actor; sent when the room is deleted
    Shutdown,
}

/// The room actor: exclusive owner of one room's member set and history
pub struct RoomActor {
    info: RoomInfo,
    directory: Arc<Directory>,
    members: Vec<ClientInfo>,
    history: Vec<ChatMessage>,
    events: mpsc::UnboundedReceiver<RoomEvent>,
}

impl RoomActor {
    /// Create the actor and its handle. The actor does nothing until
    /// [`RoomActor::run`] is spawned.
    pub fn new(info: RoomInfo, directory: Arc<Directory>) -> (Self, RoomHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RoomHandle {
            info: info.clone(),
            events: tx,
        };
        let actor = Self {
            info,
            directory,
            members: Vec::new(),
            history: Vec::new(),
            events: rx,
        };
        (actor, handle)
    }

    /// Serial event loop. Runs until the room is deleted or every handle
    /// has been dropped.
    pub async fn run(mut self) {
        info!(room = %self.info.name, id = %self.info.id, "room actor started");

        while let Some(event) = self.events.recv().await {
            match event {
                RoomEvent::Register(client) => self.register_client(client),
                RoomEvent::Unregister(id) => self.unregister_client(&id),
                RoomEvent::Broadcast(message) => self.broadcast(message),
                RoomEvent::Shutdown => break,
            }
        }

        info!(room = %self.info.name, id = %self.info.id, "room actor stopped");
    }

    fn register_client(&mut self, client: ClientInfo) {
        if self.members.iter().any(|m| m.id == client.id) {
            return;
        }
        // Welcome goes out before the add, so the joiner never sees a
        // notice about themselves. Private rooms stay quiet.
        if !self.info.private {
            self.notify_client_joined(&client);
        }
        self.members.push(client);
        self.export_members();
        self.push_member_list();
    }

    fn unregister_client(&mut self, id: &ClientId) {
        let before = self.members.len();
        self.members.retain(|m| m.id != *id);
        if self.members.len() != before {
            self.export_members();
            self.push_member_list();
        }
    }

    fn broadcast(&mut self, message: ChatMessage) {
        if matches!(
            message.action,
            Action::SendMessage | Action::SendAudioMessage
        ) {
            self.history.push(message.clone());
        }
        self.deliver_to_members(&Payload::Chat(message));
    }

    fn notify_client_joined(&mut self, client: &ClientInfo) {
        let notice = ChatMessage {
            action: Action::SendMessage,
            message: format!("{} joined the room", client.name),
            target: Some(self.info.clone()),
            sender: Some(client.clone()),
            timestamp: clock_stamp(),
            ..ChatMessage::default()
        };
        self.broadcast(notice);
    }

    /// Deliver to the member set as it is right now. Mailboxes are
    /// resolved through the directory at delivery time, so a member
    /// whose connection is gone is simply skipped.
    fn deliver_to_members(&self, payload: &Payload) {
        for member in &self.members {
            if let Some(client) = self.directory.find_client(&member.id) {
                client.deliver(payload);
            }
        }
    }

    fn export_members(&self) {
        self.directory
            .update_room_members(&self.info.id, self.members.clone());
    }

    fn push_member_list(&self) {
        let payload = Payload::RoomClients(RoomClientsListMessage::new(self.members.clone()));
        self.deliver_to_members(&payload);
    }
}

/// Cloneable handle to a running room actor
#[derive(Debug, Clone)]
pub struct RoomHandle {
    info: RoomInfo,
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl RoomHandle {
    pub fn id(&self) -> RoomId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_private(&self) -> bool {
        self.info.private
    }

    pub fn info(&self) -> &RoomInfo {
        &self.info
    }

    pub fn register(&self, client: ClientInfo) {
        self.send(RoomEvent::Register(client));
    }

    pub fn unregister(&self, id: ClientId) {
        self.send(RoomEvent::Unregister(id));
    }

    pub fn broadcast(&self, message: ChatMessage) {
        self.send(RoomEvent::Broadcast(message));
    }

    pub fn shutdown(&self) {
        self.send(RoomEvent::Shutdown);
    }

    fn send(&self, event: RoomEvent) {
        if self.events.send(event).is_err() {
            debug!(room = %self.info.name, "room actor is gone, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientHandle, MAILBOX_CAPACITY};
    use std::time::Duration;
    use tokio::time::sleep;

    fn join_directory(
        directory: &Arc<Directory>,
        name: &str,
    ) -> (ClientInfo, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = ClientHandle::new(name, tx);
        directory.attach_client(handle.clone());
        (handle.info().clone(), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Payload>) -> Vec<Payload> {
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            out.push(payload);
        }
        out
    }

    fn chat_texts(payloads: &[Payload]) -> Vec<String> {
        payloads
            .iter()
            .filter_map(|p| match p {
                Payload::Chat(msg) => Some(msg.message.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_welcome_reaches_existing_members_only() {
        let directory = Arc::new(Directory::new());
        let (alice, mut alice_rx) = join_directory(&directory, "alice");
        let (mut actor, _handle) =
            RoomActor::new(RoomInfo::new("general", false), directory.clone());

        actor.register_client(alice);
        // Sole member joined an empty room: no welcome, just the list.
        let first = drain(&mut alice_rx);
        assert!(chat_texts(&first).is_empty());
        assert_eq!(first.len(), 1);

        let (bob, mut bob_rx) = join_directory(&directory, "bob");
        actor.register_client(bob);

        let to_alice = drain(&mut alice_rx);
        assert_eq!(chat_texts(&to_alice), vec!["bob joined the room"]);
        let to_bob = drain(&mut bob_rx);
        assert!(chat_texts(&to_bob).is_empty(), "joiner saw own welcome");
        assert_eq!(to_bob.len(), 1);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let directory = Arc::new(Directory::new());
        let (alice, mut alice_rx) = join_directory(&directory, "alice");
        let (bob, mut bob_rx) = join_directory(&directory, "bob");
        let (mut actor, _handle) =
            RoomActor::new(RoomInfo::new("general", false), directory.clone());

        actor.register_client(alice.clone());
        actor.register_client(bob.clone());
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        actor.register_client(bob);

        assert_eq!(actor.members.len(), 2);
        assert!(drain(&mut alice_rx).is_empty(), "re-join reached others");
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_private_room_skips_welcome() {
        let directory = Arc::new(Directory::new());
        let (alice, mut alice_rx) = join_directory(&directory, "alice");
        let (bob, _bob_rx) = join_directory(&directory, "bob");
        let (mut actor, _handle) =
            RoomActor::new(RoomInfo::new("alice-bob", true), directory.clone());

        actor.register_client(alice);
        drain(&mut alice_rx);
        actor.register_client(bob);

        assert!(chat_texts(&drain(&mut alice_rx)).is_empty());
        assert_eq!(actor.members.len(), 2);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let directory = Arc::new(Directory::new());
        let (alice, mut alice_rx) = join_directory(&directory, "alice");
        let (bob, _bob_rx) = join_directory(&directory, "bob");
        let (mut actor, _handle) =
            RoomActor::new(RoomInfo::new("general", false), directory.clone());
        actor.register_client(alice.clone());
        actor.register_client(bob.clone());
        drain(&mut alice_rx);

        actor.unregister_client(&bob.id);
        assert_eq!(actor.members.len(), 1);
        assert_eq!(drain(&mut alice_rx).len(), 1, "expected one list push");

        actor.unregister_client(&bob.id);
        assert_eq!(actor.members.len(), 1);
        assert!(drain(&mut alice_rx).is_empty(), "repeat remove pushed again");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_current_members_only() {
        let directory = Arc::new(Directory::new());
        let (alice, mut alice_rx) = join_directory(&directory, "alice");
        let (mut actor, _handle) =
            RoomActor::new(RoomInfo::new("general", false), directory.clone());
        actor.register_client(alice.clone());
        drain(&mut alice_rx);

        actor.broadcast(ChatMessage {
            action: Action::SendMessage,
            message: "hello".to_string(),
            sender: Some(alice),
            ..ChatMessage::default()
        });

        let (bob, mut bob_rx) = join_directory(&directory, "bob");
        actor.register_client(bob);

        assert_eq!(chat_texts(&drain(&mut alice_rx)), vec!["hello", "bob joined the room"]);
        assert!(chat_texts(&drain(&mut bob_rx)).is_empty());
    }

    #[tokio::test]
    async fn test_history_keeps_chat_but_not_typing() {
        let directory = Arc::new(Directory::new());
        let (alice, _alice_rx) = join_directory(&directory, "alice");
        let (mut actor, _handle) =
            RoomActor::new(RoomInfo::new("general", false), directory.clone());
        actor.register_client(alice.clone());

        actor.broadcast(ChatMessage {
            action: Action::SendMessage,
            message: "hello".to_string(),
            ..ChatMessage::default()
        });
        actor.broadcast(ChatMessage {
            action: Action::SendAudioMessage,
            audio_data: Some("data:audio/webm;base64,AAAA".to_string()),
            ..ChatMessage::default()
        });
        actor.broadcast(ChatMessage {
            action: Action::TypingAction,
            message: "true".to_string(),
            ..ChatMessage::default()
        });

        assert_eq!(actor.history.len(), 2);
    }

    #[tokio::test]
    async fn test_member_count_exported_to_directory() {
        let directory = Arc::new(Directory::new());
        let (alice, _alice_rx) = join_directory(&directory, "alice");
        let (mut actor, handle) =
            RoomActor::new(RoomInfo::new("general", false), directory.clone());
        directory.insert_room(handle.clone());

        actor.register_client(alice.clone());

        let rooms = directory.visible_rooms(&alice.id);
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].member_count, 1);
    }

    #[tokio::test]
    async fn test_run_loop_and_shutdown() {
        let directory = Arc::new(Directory::new());
        let (alice, mut alice_rx) = join_directory(&directory, "alice");
        let (actor, handle) = RoomActor::new(RoomInfo::new("general", false), directory.clone());
        let task = tokio::spawn(actor.run());

        handle.register(alice.clone());
        handle.broadcast(ChatMessage {
            action: Action::SendMessage,
            message: "hello".to_string(),
            ..ChatMessage::default()
        });
        sleep(Duration::from_millis(50)).await;

        assert_eq!(chat_texts(&drain(&mut alice_rx)), vec!["hello"]);

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop after shutdown")
            .expect("actor task should not panic");
    }
}
