//! Connection actor
//!
//! One per transport connection. The accept path upgrades the socket,
//! resolves the client identity from the query parameters (including
//! reconnect-by-id), then runs two pumps: the inbound pump decodes and
//! dispatches wire frames, the outbound pump drains the client mailbox
//! and keeps the peer alive with pings. Either pump dying tears the
//! whole connection down.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::client::{ClientHandle, MAILBOX_CAPACITY};
use crate::error::AppError;
use crate::hub::HubHandle;
use crate::message::{clock_stamp, Action, ChatMessage, ClientInfo, Payload, RoomListMessage};
use crate::room::RoomHandle;
use crate::types::{ClientId, RoomId};

/// Time allowed for a single transport write
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between inbound frames; pongs count
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping interval, kept well inside the read deadline
const PING_PERIOD: Duration = Duration::from_secs(PONG_WAIT.as_secs() * 9 / 10);

/// Largest inbound frame accepted, in bytes
const MAX_MESSAGE_SIZE: usize = 10_000;

/// Identity parameters carried on the upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub name: String,
    pub client_id: Option<ClientId>,
}

impl ConnectParams {
    /// Parse `name` (required) and `id` (optional) from the request
    /// query string. An `id` that is not a UUID is treated as absent
    /// rather than rejecting the connection.
    pub fn from_query(query: &str) -> Result<Self, AppError> {
        let mut name = None;
        let mut client_id = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "name" => name = Some(value.into_owned()),
                "id" => client_id = value.parse().ok(),
                _ => {}
            }
        }
        let name = name
            .filter(|n| !n.trim().is_empty())
            .ok_or(AppError::MissingName)?;
        Ok(Self { name, client_id })
    }
}

/// Canonical name for the private room a pair of clients shares. The
/// same pair yields the same name no matter who initiates.
fn private_room_name(a: &ClientId, b: &ClientId) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}", first, second)
}

fn socket_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config
}

fn bad_request(err: &AppError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(err.to_string()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// Accept loop: one connection actor per inbound socket. A failed
/// accept is logged and the loop keeps serving.
pub async fn serve(listener: TcpListener, hub: HubHandle) -> Result<(), AppError> {
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, hub).await {
                        warn!(peer = %addr, error = %err, "connection ended with error");
                    }
                });
            }
            Err(err) => warn!(error = %err, "accept failed"),
        }
    }
}

async fn serve_connection(stream: TcpStream, hub: HubHandle) -> Result<(), AppError> {
    let mut params = None;
    let callback = |request: &Request, response: Response| {
        match ConnectParams::from_query(request.uri().query().unwrap_or("")) {
            Ok(parsed) => {
                params = Some(parsed);
                Ok(response)
            }
            Err(err) => Err(bad_request(&err)),
        }
    };
    let ws_stream = accept_hdr_async_with_config(stream, callback, Some(socket_config())).await?;
    let params = params.ok_or(AppError::MissingName)?;

    let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
    // A previously-issued id re-attaches the existing identity to this
    // transport; anything else starts a fresh client.
    let client = match params.client_id.and_then(|id| hub.find_client(&id)) {
        Some(existing) => existing.with_mailbox(mailbox_tx),
        None => ClientHandle::new(&params.name, mailbox_tx),
    };

    info!(client = %client.id(), name = %client.name(), "client connected");

    // Connect sequence: room list, then the login confirmation, then
    // registration (which announces the roster to everyone).
    client.deliver(&Payload::RoomList(RoomListMessage::new(
        hub.visible_rooms(&client.id()),
    )));
    client.deliver(&Payload::Chat(ChatMessage::logged_in(client.info().clone())));

    let registration = hub.register(client.clone()).await?;

    let (ws_sender, ws_receiver) = ws_stream.split();
    let mut write_task = tokio::spawn(write_pump(ws_sender, mailbox_rx));

    let mut connection = Connection {
        hub,
        client,
        generation: registration.generation,
        is_typing: false,
    };

    tokio::select! {
        _ = connection.read_pump(ws_receiver) => {}
        result = &mut write_task => {
            if let Ok(Err(err)) = result {
                debug!(client = %connection.client.id(), error = %err, "write pump failed");
            }
        }
    }

    write_task.abort();
    connection.cleanup();
    Ok(())
}

/// Outbound pump: drains the mailbox into transport writes, coalescing
/// whatever is already queued into one frame, and pings on idle. Every
/// write carries a deadline; missing it is fatal.
async fn write_pump(
    mut sink: SplitSink<WebSocketStream<TcpStream>, WsMessage>,
    mut mailbox: mpsc::Receiver<Payload>,
) -> Result<(), AppError> {
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        tokio::select! {
            maybe_payload = mailbox.recv() => {
                match maybe_payload {
                    Some(payload) => {
                        let mut frame = serde_json::to_string(&payload)?;
                        while let Ok(next) = mailbox.try_recv() {
                            frame.push('\n');
                            frame.push_str(&serde_json::to_string(&next)?);
                        }
                        timeout(WRITE_WAIT, sink.send(WsMessage::Text(frame)))
                            .await
                            .map_err(|_| AppError::WriteDeadline)??;
                    }
                    None => {
                        // Mailbox closed: connection is going away.
                        let _ = timeout(WRITE_WAIT, sink.send(WsMessage::Close(None))).await;
                        return Ok(());
                    }
                }
            }
            _ = ping.tick() => {
                timeout(WRITE_WAIT, sink.send(WsMessage::Ping(Vec::new())))
                    .await
                    .map_err(|_| AppError::WriteDeadline)??;
            }
        }
    }
}

/// Read-side state of one connection
#[derive(Debug)]
struct Connection {
    hub: HubHandle,
    client: ClientHandle,
    generation: u64,
    is_typing: bool,
}

impl Connection {
    /// Inbound pump: one frame at a time, decoded, stamped and
    /// dispatched. Ends when the peer goes quiet past the read
    /// deadline, closes, or the transport fails.
    async fn read_pump(&mut self, mut source: SplitStream<WebSocketStream<TcpStream>>) {
        loop {
            match timeout(PONG_WAIT, source.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    if let Err(err) = self.handle_frame(&text) {
                        warn!(
                            client = %self.client.id(),
                            error = %err,
                            "inbound frame dropped"
                        );
                    }
                }
                Ok(Some(Ok(WsMessage::Close(_)))) => break,
                // Pongs (and anything else) just refresh the deadline.
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(err))) => {
                    debug!(client = %self.client.id(), error = %err, "transport read failed");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(client = %self.client.id(), "read deadline exceeded");
                    break;
                }
            }
        }
    }

    fn handle_frame(&mut self, text: &str) -> Result<(), AppError> {
        let mut message: ChatMessage = serde_json::from_str(text)?;
        message.sender = Some(self.client.info().clone());
        message.timestamp = clock_stamp();
        self.dispatch(message)
    }

    /// Route one stamped inbound message. Errors here are logged by the
    /// read pump and never surface on the wire.
    fn dispatch(&mut self, message: ChatMessage) -> Result<(), AppError> {
        match message.action {
            Action::SendMessage | Action::SendAudioMessage => self.forward_to_room(message),
            Action::JoinRoom => self.handle_join_room(&message),
            Action::LeaveRoom => self.handle_leave_room(&message),
            Action::JoinRoomPrivate => self.handle_join_room_private(&message),
            Action::TypingAction => self.handle_typing(message),
            Action::DeleteRoom => self.handle_delete_room(&message),
            // Server-to-client tags arriving inbound are ignored.
            _ => Ok(()),
        }
    }

    /// send-message / send-audio-message: hand the stamped message to
    /// the target room's actor.
    fn forward_to_room(&self, message: ChatMessage) -> Result<(), AppError> {
        let target = message.target.as_ref().ok_or(AppError::MissingTarget)?;
        let room = self
            .hub
            .find_room(&target.id)
            .ok_or(AppError::RoomNotFound(target.id))?;
        room.broadcast(message);
        Ok(())
    }

    /// join-room: the body carries the room name.
    fn handle_join_room(&mut self, message: &ChatMessage) -> Result<(), AppError> {
        let (_, created) = self.join_room(&message.message, false, self.client.info().clone())?;
        if created {
            self.hub.broadcast_room_lists();
        }
        Ok(())
    }

    /// leave-room: the body carries the room id.
    fn handle_leave_room(&mut self, message: &ChatMessage) -> Result<(), AppError> {
        let room_id: RoomId = message
            .message
            .parse()
            .map_err(|_| AppError::InvalidIdentifier(message.message.clone()))?;
        self.hub.forget_membership(&self.client.id(), &room_id);
        if let Some(room) = self.hub.find_room(&room_id) {
            room.unregister(self.client.id());
        }
        Ok(())
    }

    /// join-room-private: the body carries the peer's client id. Both
    /// sides end up in one deterministically named private room.
    fn handle_join_room_private(&mut self, message: &ChatMessage) -> Result<(), AppError> {
        let target_id: ClientId = message
            .message
            .parse()
            .map_err(|_| AppError::InvalidIdentifier(message.message.clone()))?;
        let target = self
            .hub
            .find_client(&target_id)
            .ok_or(AppError::ClientNotFound(target_id))?;

        let name = private_room_name(&self.client.id(), &target.id());
        let (room, created) = self.join_room(&name, true, target.info().clone())?;
        self.register_member(&room, target.info(), self.client.info());
        if created {
            self.hub.broadcast_room_lists();
        }
        Ok(())
    }

    /// typing-action: mark the local flag, then fan the indicator out
    /// to every room this client belongs to.
    fn handle_typing(&mut self, message: ChatMessage) -> Result<(), AppError> {
        self.is_typing = message.message.trim() == "true";
        for room_id in self.hub.membership_of(&self.client.id()) {
            if let Some(room) = self.hub.find_room(&room_id) {
                room.broadcast(message.clone());
            }
        }
        Ok(())
    }

    /// delete-room: the target carries the room reference.
    fn handle_delete_room(&mut self, message: &ChatMessage) -> Result<(), AppError> {
        let target = message.target.as_ref().ok_or(AppError::MissingTarget)?;
        if self.hub.delete_room(&target.id) {
            self.hub.broadcast_room_lists();
        }
        Ok(())
    }

    /// Create-if-absent join for this connection's client. Returns the
    /// room and whether it was newly created. `counterpart` shows up as
    /// the sender of the join confirmation.
    fn join_room(
        &self,
        name: &str,
        private: bool,
        counterpart: ClientInfo,
    ) -> Result<(RoomHandle, bool), AppError> {
        let (room, created) = match self.hub.find_room_by_name(name) {
            Some(room) => (room, false),
            None => (self.hub.create_room(name, private), true),
        };
        // A plain join must not walk into somebody's private room.
        if room.is_private() && !private {
            return Err(AppError::PrivateRoom(name.to_string()));
        }
        self.register_member(&room, self.client.info(), &counterpart);
        Ok((room, created))
    }

    /// Put a client into a room: the membership record and the actor
    /// registration happen once, but the confirmation goes back to the
    /// member on every join request, repeats included.
    fn register_member(&self, room: &RoomHandle, member: &ClientInfo, counterpart: &ClientInfo) {
        if !self.hub.is_member(&member.id, &room.id()) {
            self.hub.record_membership(&member.id, &room.id());
            room.register(member.clone());
        }
        if let Some(handle) = self.hub.find_client(&member.id) {
            handle.deliver(&Payload::Chat(ChatMessage::room_joined(
                room.info().clone(),
                counterpart.clone(),
            )));
        }
    }

    /// Tear this connection's presence down: one generation-stamped
    /// unregister event. The hub loop serializes it with registrations
    /// and drops it outright when the peer has already reconnected, so
    /// a dead connection can never strip its successor's rooms.
    fn cleanup(self) {
        self.hub.unregister(self.client.id(), self.generation);
        info!(client = %self.client.id(), name = %self.client.name(), "client disconnected");
    }
}
