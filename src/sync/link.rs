//! Peer links as seen by ban propagation.
//!
//! Each directly connected server gets a [`LinkState`] holding its
//! negotiated capabilities and a bounded send queue. Relayed commands are
//! [`PeerMessage`]s; a full queue drops the message with a warning rather
//! than blocking the core.

use super::capab::{BanCommand, CapabilitySet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// A ban command as relayed between servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    /// Issuer, as `nick!user@host{server}` or a server name.
    pub source: String,
    pub command: BanCommand,
    /// Wire arguments, target first.
    pub params: Vec<String>,
}

impl PeerMessage {
    pub fn new(source: &str, command: BanCommand, params: Vec<String>) -> Self {
        Self {
            source: source.to_string(),
            command,
            params,
        }
    }

    /// Target server mask.
    pub fn target(&self) -> &str {
        self.params.first().map(String::as_str).unwrap_or_default()
    }

    /// Copy of this message re-addressed to another target.
    pub fn retarget(&self, target: &str) -> Self {
        let mut params = self.params.clone();
        match params.first_mut() {
            Some(first) => *first = target.to_string(),
            None => params.push(target.to_string()),
        }
        Self {
            params,
            ..self.clone()
        }
    }
}

impl fmt::Display for PeerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{} {}", self.source, self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// State of a directly connected peer.
#[derive(Debug, Clone)]
pub struct LinkState {
    /// The name of the peer server.
    pub name: String,
    /// Capabilities the peer negotiated.
    pub capabilities: CapabilitySet,
    /// The channel to send messages to this peer.
    pub tx: mpsc::Sender<Arc<PeerMessage>>,
}

impl LinkState {
    pub fn new(
        name: &str,
        capabilities: CapabilitySet,
        tx: mpsc::Sender<Arc<PeerMessage>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            capabilities,
            tx,
        }
    }

    /// Queue a message for the peer without waiting.
    pub fn send(&self, msg: Arc<PeerMessage>) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(link = %self.name, "Link send queue full, dropping ban command");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(link = %self.name, "Link closed, dropping ban command");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_trailing_parameter() {
        let msg = PeerMessage::new(
            "alice!a@h{irc.example.net}",
            BanCommand::Kline,
            vec![
                "*".into(),
                "600".into(),
                "*".into(),
                "bad*host".into(),
                "no spam please".into(),
            ],
        );
        assert_eq!(
            msg.to_string(),
            ":alice!a@h{irc.example.net} KLINE * 600 * bad*host :no spam please"
        );
    }

    #[test]
    fn retarget_replaces_first_param() {
        let msg = PeerMessage::new("s", BanCommand::Unresv, vec!["*".into(), "#warez".into()]);
        let copy = msg.retarget("hub.*");
        assert_eq!(copy.target(), "hub.*");
        assert_eq!(copy.params[1], "#warez");
    }

    #[tokio::test]
    async fn send_is_fire_and_forget() {
        let (tx, mut rx) = mpsc::channel(1);
        let link = LinkState::new("hub", CapabilitySet::default(), tx);
        let msg = Arc::new(PeerMessage::new("s", BanCommand::Unxline, vec!["*".into(), "x".into()]));

        assert!(link.send(msg.clone()));
        // Queue is full now
        assert!(!link.send(msg.clone()));
        assert_eq!(*rx.recv().await.unwrap(), *msg);

        drop(rx);
        assert!(!link.send(msg));
    }
}
