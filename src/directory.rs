//! Shared connection directory
//!
//! The one place in the crate guarded by a lock. All routing state lives
//! inside actor tasks; the directory only answers "who is online, which
//! rooms exist, who belongs where" so hub, rooms and connection tasks can
//! read that synchronously instead of through a channel round-trip.
//!
//! Lock discipline: the mutex is held for the duration of a single method
//! call and nothing awaits or calls back out while holding it.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::client::ClientHandle;
use crate::message::{ClientInfo, RoomSummary};
use crate::room::RoomHandle;
use crate::types::{ClientId, RoomId};

#[derive(Debug)]
struct ClientRecord {
    handle: ClientHandle,
    /// Rooms the client belongs to. Survives a disconnect as long as the
    /// record itself does, so a reconnect can re-register them.
    rooms: HashSet<RoomId>,
    /// Bumped every time a connection attaches under this id. Cleanup
    /// paths compare against it so a replaced connection cannot evict
    /// its successor.
    generation: u64,
}

#[derive(Debug)]
struct RoomEntry {
    handle: RoomHandle,
    /// Member list as last exported by the room actor.
    members: Vec<ClientInfo>,
}

impl RoomEntry {
    fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.handle.id(),
            name: self.handle.name().to_string(),
            private: self.handle.is_private(),
            member_count: self.members.len(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<ClientId, ClientRecord>,
    rooms: HashMap<RoomId, RoomEntry>,
}

/// Registry of connected clients and running rooms
#[derive(Debug, Default)]
pub struct Directory {
    inner: Mutex<Inner>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panic elsewhere; the data is
        // still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a client attachment, replacing any previous attachment of
    /// the same id. Returns the new attachment generation together with
    /// the memberships that survived from the previous attachment.
    pub fn attach_client(&self, handle: ClientHandle) -> (u64, Vec<RoomId>) {
        let mut inner = self.lock();
        let id = handle.id();
        match inner.clients.get_mut(&id) {
            Some(record) => {
                record.handle = handle;
                record.generation += 1;
                let mut rooms: Vec<RoomId> = record.rooms.iter().copied().collect();
                rooms.sort();
                (record.generation, rooms)
            }
            None => {
                inner.clients.insert(
                    id,
                    ClientRecord {
                        handle,
                        rooms: HashSet::new(),
                        generation: 1,
                    },
                );
                (1, Vec::new())
            }
        }
    }

    /// Drop a client record, but only while `generation` is still the
    /// current attachment. Returns whether anything was removed.
    pub fn remove_client(&self, id: &ClientId, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.clients.get(id).map(|r| r.generation) == Some(generation) {
            inner.clients.remove(id);
            true
        } else {
            false
        }
    }

    /// Whether `generation` is still the live attachment for this id.
    pub fn is_attached(&self, id: &ClientId, generation: u64) -> bool {
        let inner = self.lock();
        inner.clients.get(id).map(|r| r.generation) == Some(generation)
    }

    pub fn find_client(&self, id: &ClientId) -> Option<ClientHandle> {
        self.lock().clients.get(id).map(|r| r.handle.clone())
    }

    /// Roster snapshot, name-ordered
    pub fn client_infos(&self) -> Vec<ClientInfo> {
        let inner = self.lock();
        let mut infos: Vec<ClientInfo> = inner
            .clients
            .values()
            .map(|r| r.handle.info().clone())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        infos
    }

    pub fn client_handles(&self) -> Vec<ClientHandle> {
        self.lock()
            .clients
            .values()
            .map(|r| r.handle.clone())
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn record_membership(&self, client: &ClientId, room: &RoomId) {
        let mut inner = self.lock();
        if let Some(record) = inner.clients.get_mut(client) {
            record.rooms.insert(*room);
        }
    }

    pub fn forget_membership(&self, client: &ClientId, room: &RoomId) {
        let mut inner = self.lock();
        if let Some(record) = inner.clients.get_mut(client) {
            record.rooms.remove(room);
        }
    }

    pub fn membership_of(&self, client: &ClientId) -> Vec<RoomId> {
        let inner = self.lock();
        let mut rooms: Vec<RoomId> = inner
            .clients
            .get(client)
            .map(|r| r.rooms.iter().copied().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn is_member(&self, client: &ClientId, room: &RoomId) -> bool {
        self.lock()
            .clients
            .get(client)
            .map(|r| r.rooms.contains(room))
            .unwrap_or(false)
    }

    /// Whether any of the client's memberships is a private room. This
    /// decides if a disconnecting client's identity is kept around for a
    /// later reconnect.
    pub fn retains_private_membership(&self, client: &ClientId) -> bool {
        let inner = self.lock();
        inner
            .clients
            .get(client)
            .map(|record| {
                record.rooms.iter().any(|room_id| {
                    inner
                        .rooms
                        .get(room_id)
                        .map(|entry| entry.handle.is_private())
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    pub fn insert_room(&self, handle: RoomHandle) {
        let mut inner = self.lock();
        inner.rooms.insert(
            handle.id(),
            RoomEntry {
                handle,
                members: Vec::new(),
            },
        );
    }

    /// Remove a room and scrub it from every membership set.
    pub fn remove_room(&self, id: &RoomId) -> Option<RoomHandle> {
        let mut inner = self.lock();
        let entry = inner.rooms.remove(id)?;
        for record in inner.clients.values_mut() {
            record.rooms.remove(id);
        }
        Some(entry.handle)
    }

    pub fn find_room(&self, id: &RoomId) -> Option<RoomHandle> {
        self.lock().rooms.get(id).map(|e| e.handle.clone())
    }

    pub fn find_room_by_name(&self, name: &str) -> Option<RoomHandle> {
        self.lock()
            .rooms
            .values()
            .find(|e| e.handle.name() == name)
            .map(|e| e.handle.clone())
    }

    /// Refresh the member list a room actor exports after each
    /// register/unregister.
    pub fn update_room_members(&self, id: &RoomId, members: Vec<ClientInfo>) {
        let mut inner = self.lock();
        if let Some(entry) = inner.rooms.get_mut(id) {
            entry.members = members;
        }
    }

    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }

    /// Rooms the given client may see: every public room plus the
    /// private rooms it belongs to, name-ordered.
    pub fn visible_rooms(&self, viewer: &ClientId) -> Vec<RoomSummary> {
        let inner = self.lock();
        Self::visible_rooms_locked(&inner, viewer)
    }

    /// Per-client room-list snapshots, all taken under one lock hold so
    /// every recipient sees the same directory state.
    pub fn room_list_snapshots(&self) -> Vec<(ClientHandle, Vec<RoomSummary>)> {
        let inner = self.lock();
        inner
            .clients
            .values()
            .map(|record| {
                let handle = record.handle.clone();
                let rooms = Self::visible_rooms_locked(&inner, &handle.id());
                (handle, rooms)
            })
            .collect()
    }

    fn visible_rooms_locked(inner: &Inner, viewer: &ClientId) -> Vec<RoomSummary> {
        let membership = inner.clients.get(viewer).map(|r| &r.rooms);
        let mut rooms: Vec<RoomSummary> = inner
            .rooms
            .values()
            .filter(|entry| {
                !entry.handle.is_private()
                    || membership
                        .map(|set| set.contains(&entry.handle.id()))
                        .unwrap_or(false)
            })
            .map(|entry| entry.summary())
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }
}
