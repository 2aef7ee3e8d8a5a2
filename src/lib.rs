//! Multi-Room WebSocket Chat Routing Library
//!
//! A message-routing core for a multi-room chat service built with
//! tokio-tungstenite using the Actor pattern for state management.
//!
//! # Features
//! - WebSocket connection handling with reconnect-by-id
//! - Public rooms, created on first join by name
//! - Private two-party rooms with a canonical shared name
//! - Real-time chat and audio-message fan-out
//! - Per-client room lists and rosters
//! - Typing indicators
//! - Keep-alive pings with read/write deadlines
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the process-wide actor owning client lifecycle
//! - Each room runs its own `RoomActor` owning its member set
//! - Each connection runs an inbound and an outbound pump
//! - One shared `Directory` behind the single lock answers the
//!   synchronous "who is where" queries; everything else is message
//!   passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use roomcast::{serve, Hub};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8085").await.unwrap();
//!     let (hub, handle) = Hub::new();
//!     tokio::spawn(hub.run());
//!     serve(listener, handle).await.unwrap();
//! }
//! ```

pub mod client;
pub mod connection;
pub mod directory;
pub mod error;
pub mod hub;
pub mod message;
pub mod room;
pub mod types;

// Re-export main types for convenience
pub use client::ClientHandle;
pub use connection::{serve, ConnectParams};
pub use directory::Directory;
pub use error::AppError;
pub use hub::{Hub, HubEvent, HubHandle, Registration};
pub use message::{Action, ChatMessage, ClientInfo, Payload, RoomInfo, RoomSummary};
pub use room::{RoomActor, RoomEvent, RoomHandle};
pub use types::{ClientId, RoomId};
