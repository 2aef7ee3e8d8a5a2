//! Client handle definition
//!
//! A connected client's identity plus the bounded mailbox its write
//! pump drains. Handles are cheap to clone and safe to hold from any
//! task.

use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::message::{ClientInfo, Payload};
use crate::types::ClientId;

/// Outbound mailbox depth per client. A client that cannot drain this
/// many payloads is considered too slow and loses the newest ones.
pub const MAILBOX_CAPACITY: usize = 256;

const AVATAR_PREFIXES: &[&str] = &[
    "red",
    "cyan",
    "teal",
    "green",
    "orange",
    "deep-orange",
    "light-blue",
    "light-green",
    "lime",
    "amber",
    "deep-purple",
];

const AVATAR_SHADES: &[&str] = &["9", "10"];

fn random_avatar_color() -> String {
    let mut rng = rand::thread_rng();
    let prefix = AVATAR_PREFIXES.choose(&mut rng).copied().unwrap_or("teal");
    let shade = AVATAR_SHADES.choose(&mut rng).copied().unwrap_or("9");
    format!("{}-{}", prefix, shade)
}

/// Handle to a connected client: wire identity plus the sending half
/// of its outbound mailbox.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    info: ClientInfo,
    mailbox: mpsc::Sender<Payload>,
}

impl ClientHandle {
    /// Create a handle for a brand-new client with a fresh id and a
    /// randomly picked avatar color.
    pub fn new(name: &str, mailbox: mpsc::Sender<Payload>) -> Self {
        Self {
            info: ClientInfo {
                id: ClientId::new(),
                name: name.to_string(),
                avatar_color: random_avatar_color(),
            },
            mailbox,
        }
    }

    /// Rebind an existing identity to a fresh mailbox. Used when a
    /// client reconnects under its previous id: name, id and avatar
    /// color survive, only the transport changes.
    pub fn with_mailbox(&self, mailbox: mpsc::Sender<Payload>) -> Self {
        Self {
            info: self.info.clone(),
            mailbox,
        }
    }

    pub fn id(&self) -> ClientId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    /// Queue a payload for the client's write pump without blocking.
    ///
    /// When the mailbox is full the payload is dropped and `false` is
    /// returned; a slow reader costs itself messages, never the sender.
    /// A closed mailbox (write pump gone) also returns `false`.
    pub fn deliver(&self, payload: &Payload) -> bool {
        match self.mailbox.try_send(payload.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    client = %self.info.id,
                    name = %self.info.name,
                    "mailbox full, dropping payload"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Action, ChatMessage};

    fn text_payload(text: &str) -> Payload {
        Payload::Chat(ChatMessage {
            action: Action::SendMessage,
            message: text.to_string(),
            ..ChatMessage::default()
        })
    }

    #[test]
    fn test_new_handle_has_identity() {
        let (tx, _rx) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = ClientHandle::new("alice", tx);

        assert_eq!(handle.name(), "alice");
        assert_eq!(handle.info().name, "alice");
        assert_eq!(handle.id(), handle.info().id);
    }

    #[test]
    fn test_avatar_color_is_prefix_dash_shade() {
        let (tx, _rx) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = ClientHandle::new("alice", tx);

        let color = &handle.info().avatar_color;
        let (prefix, shade) = color
            .rsplit_once('-')
            .expect("color should contain a dash");
        assert!(AVATAR_PREFIXES.contains(&prefix), "bad prefix in {}", color);
        assert!(AVATAR_SHADES.contains(&shade), "bad shade in {}", color);
    }

    #[test]
    fn test_with_mailbox_keeps_identity() {
        let (tx1, _rx1) = mpsc::channel(MAILBOX_CAPACITY);
        let (tx2, _rx2) = mpsc::channel(MAILBOX_CAPACITY);
        let original = ClientHandle::new("bob", tx1);
        let rebound = original.with_mailbox(tx2);

        assert_eq!(rebound.id(), original.id());
        assert_eq!(rebound.name(), original.name());
        assert_eq!(rebound.info().avatar_color, original.info().avatar_color);
    }

    #[tokio::test]
    async fn test_deliver_queues_payload() {
        let (tx, mut rx) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = ClientHandle::new("alice", tx);

        assert!(handle.deliver(&text_payload("hello")));

        let queued = rx.recv().await.expect("payload should be queued");
        match queued {
            Payload::Chat(msg) => assert_eq!(msg.message, "hello"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_newest_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ClientHandle::new("slow", tx);

        assert!(handle.deliver(&text_payload("first")));
        assert!(!handle.deliver(&text_payload("second")));

        // The surviving message is the older one.
        match rx.recv().await.expect("first payload should survive") {
            Payload::Chat(msg) => assert_eq!(msg.message, "first"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_closed_mailbox_reports_failure() {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = ClientHandle::new("gone", tx);
        drop(rx);

        assert!(!handle.deliver(&text_payload("anyone home")));
    }
}
