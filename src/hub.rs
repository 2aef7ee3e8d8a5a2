//! Server hub
//!
//! One per process. The hub's serial event loop owns the lifecycle of
//! client records (admission, eviction, roster announcements, global
//! fan-out); room creation, deletion and the lookup queries are
//! synchronous methods on the handle backed by the shared directory.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::client::ClientHandle;
use crate::directory::Directory;
use crate::error::AppError;
use crate::message::{
    Action, ClientsListMessage, Payload, RoomInfo, RoomListMessage, RoomSummary,
};
use crate::room::{RoomActor, RoomHandle};
use crate::types::{ClientId, RoomId};

/// Reply to a successful registration
#[derive(Debug)]
pub struct Registration {
    /// Attachment generation for this connection; cleanup must present
    /// it back, so a replaced connection cannot evict its successor.
    pub generation: u64,
}

/// Events the hub loop consumes
#[derive(Debug)]
pub enum HubEvent {
    /// Admit a connection into the global registry
    Register {
        client: ClientHandle,
        reply: oneshot::Sender<Registration>,
    },
    /// Tear down a disconnected client; ignored when `generation` is stale
    Unregister { client: ClientId, generation: u64 },
    /// Fan a payload out to every registered client
    Broadcast(Payload),
}

/// The hub actor
pub struct Hub {
    directory: Arc<Directory>,
    events: mpsc::UnboundedReceiver<HubEvent>,
}

impl Hub {
    /// Create the hub and its handle. Spawn [`Hub::run`] to start it.
    pub fn new() -> (Self, HubHandle) {
        let directory = Arc::new(Directory::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            directory: directory.clone(),
            events: rx,
        };
        let handle = HubHandle {
            directory,
            events: tx,
        };
        (hub, handle)
    }

    /// Serial event loop for the process lifetime.
    pub async fn run(mut self) {
        info!("hub started");

        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }

        info!("hub stopped");
    }

    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register { client, reply } => {
                let registration = self.register_client(client);
                if reply.send(registration).is_err() {
                    debug!("registering connection went away before the reply");
                }
            }
            HubEvent::Unregister { client, generation } => {
                self.unregister_client(&client, generation)
            }
            HubEvent::Broadcast(payload) => self.broadcast(&payload),
        }
    }

    fn register_client(&mut self, client: ClientHandle) -> Registration {
        let info = client.info().clone();
        let (generation, rejoin) = self.directory.attach_client(client);

        // Memberships that survived a previous attachment go straight
        // back into their rooms; none of the join ceremony re-runs.
        for room_id in rejoin {
            match self.directory.find_room(&room_id) {
                Some(room) => room.register(info.clone()),
                None => self.directory.forget_membership(&info.id, &room_id),
            }
        }

        info!(
            client = %info.id,
            name = %info.name,
            total = self.directory.client_count(),
            "client registered"
        );
        self.announce_roster(Action::UserJoin);
        Registration { generation }
    }

    /// Full teardown for one attachment. Register and unregister share
    /// the loop, so the staleness check cannot race a reconnect: by the
    /// time a replaced connection's event is handled, the generation
    /// has already moved on and the whole teardown is skipped.
    fn unregister_client(&mut self, id: &ClientId, generation: u64) {
        if !self.directory.is_attached(id, generation) {
            debug!(client = %id, "unregister from a replaced connection ignored");
            return;
        }

        for room_id in self.directory.membership_of(id) {
            match self.directory.find_room(&room_id) {
                Some(room) => room.unregister(*id),
                None => self.directory.forget_membership(id, &room_id),
            }
        }

        // A private-room membership keeps the record, and with it the
        // identity, alive for reconnect-by-id.
        if self.directory.retains_private_membership(id) {
            debug!(client = %id, "identity retained for reconnect");
            return;
        }

        if self.directory.remove_client(id, generation) {
            info!(
                client = %id,
                total = self.directory.client_count(),
                "client unregistered"
            );
            self.announce_roster(Action::UserLeft);
        }
    }

    /// Fan out to every registered client. Deliveries are queue pushes;
    /// a full mailbox drops for that client without stalling the rest.
    fn broadcast(&self, payload: &Payload) {
        for client in self.directory.client_handles() {
            client.deliver(payload);
        }
    }

    fn announce_roster(&self, action: Action) {
        let roster = ClientsListMessage::new(action, self.directory.client_infos());
        self.broadcast(&Payload::Clients(roster));
    }
}

/// Cloneable handle to the hub: loop events plus the synchronous
/// directory queries connection actors are allowed to make.
#[derive(Debug, Clone)]
pub struct HubHandle {
    directory: Arc<Directory>,
    events: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    /// Admit a client and wait for its attachment generation.
    pub async fn register(&self, client: ClientHandle) -> Result<Registration, AppError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(HubEvent::Register { client, reply })
            .map_err(|_| AppError::ChannelSend)?;
        rx.await.map_err(|_| AppError::ChannelSend)
    }

    /// Queue the teardown for a disconnecting client. The loop ignores
    /// it when `generation` is stale, i.e. the peer already reconnected.
    pub fn unregister(&self, client: ClientId, generation: u64) {
        self.send(HubEvent::Unregister { client, generation });
    }

    pub fn broadcast(&self, payload: Payload) {
        self.send(HubEvent::Broadcast(payload));
    }

    /// Create a room and start its actor. Name collisions are not
    /// checked here; callers treat creation as "create if absent".
    pub fn create_room(&self, name: &str, private: bool) -> RoomHandle {
        let (actor, handle) = RoomActor::new(RoomInfo::new(name, private), self.directory.clone());
        self.directory.insert_room(handle.clone());
        tokio::spawn(actor.run());
        info!(
            room = %handle.name(),
            id = %handle.id(),
            private,
            total = self.directory.room_count(),
            "room created"
        );
        handle
    }

    /// Remove a room from the directory, scrub memberships and stop its
    /// actor. Returns whether the room existed.
    pub fn delete_room(&self, id: &RoomId) -> bool {
        match self.directory.remove_room(id) {
            Some(room) => {
                room.shutdown();
                info!(
                    room = %room.name(),
                    id = %room.id(),
                    total = self.directory.room_count(),
                    "room deleted"
                );
                true
            }
            None => false,
        }
    }

    pub fn find_room_by_name(&self, name: &str) -> Option<RoomHandle> {
        self.directory.find_room_by_name(name)
    }

    pub fn find_room(&self, id: &RoomId) -> Option<RoomHandle> {
        self.directory.find_room(id)
    }

    pub fn find_client(&self, id: &ClientId) -> Option<ClientHandle> {
        self.directory.find_client(id)
    }

    /// Every public room plus the private rooms the viewer belongs to,
    /// name-ordered.
    pub fn visible_rooms(&self, viewer: &ClientId) -> Vec<RoomSummary> {
        self.directory.visible_rooms(viewer)
    }

    /// Push every connected client its own view of the room list.
    pub fn broadcast_room_lists(&self) {
        for (client, rooms) in self.directory.room_list_snapshots() {
            client.deliver(&Payload::RoomList(RoomListMessage::new(rooms)));
        }
    }

    pub fn record_membership(&self, client: &ClientId, room: &RoomId) {
        self.directory.record_membership(client, room);
    }

    pub fn forget_membership(&self, client: &ClientId, room: &RoomId) {
        self.directory.forget_membership(client, room);
    }

    pub fn is_member(&self, client: &ClientId, room: &RoomId) -> bool {
        self.directory.is_member(client, room)
    }

    pub fn membership_of(&self, client: &ClientId) -> Vec<RoomId> {
        self.directory.membership_of(client)
    }

    fn send(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            debug!("hub is gone, event dropped");
        }
    }
}
