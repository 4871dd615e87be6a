//! Best-effort fan-out to paired peers.
//!
//! The short-range transport is an external collaborator behind
//! [`PeerTransport`]. [`PeerRelay`] only enumerates reachable peers and sends
//! to each one independently; it never retries.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::RelayError;

// ---

/// Message paths shared by the wearable and the companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerPath {
    FallEvent,
    Location,
    Sensors,
}

impl PeerPath {
    // ---
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FallEvent => "/fallwatch/fall_event",
            Self::Location => "/fallwatch/location",
            Self::Sensors => "/fallwatch/sensors",
        }
    }
}

impl FromStr for PeerPath {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "/fallwatch/fall_event" => Ok(Self::FallEvent),
            "/fallwatch/location" => Ok(Self::Location),
            "/fallwatch/sensors" => Ok(Self::Sensors),
            other => Err(RelayError::Validation(format!("unknown peer path '{other}'"))),
        }
    }
}

impl std::fmt::Display for PeerPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short-range transport between the wearable and its companion.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Peers reachable right now. May be empty.
    async fn connected_peers(&self) -> anyhow::Result<Vec<String>>;

    async fn send(&self, peer: &str, path: PeerPath, bytes: &[u8]) -> anyhow::Result<()>;
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerDelivery {
    // ---
    pub peer: String,
    pub result: Result<(), RelayError>,
}

#[derive(Clone)]
pub struct PeerRelay {
    transport: Arc<dyn PeerTransport>,
}

impl PeerRelay {
    // ---
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self { transport }
    }

    /// Send to every reachable peer. One peer failing never affects the others.
    pub async fn send_to_all_peers(&self, path: PeerPath, bytes: &[u8]) -> Vec<PeerDelivery> {
        // ---
        let peers = match self.transport.connected_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(%path, error = %e, "Could not enumerate connected peers");
                return Vec::new();
            }
        };

        if peers.is_empty() {
            warn!(%path, "No connected peers");
            return Vec::new();
        }

        let sends = peers.into_iter().map(|peer| async move {
            let result = self
                .transport
                .send(&peer, path, bytes)
                .await
                .map_err(|e| RelayError::PeerUnreachable {
                    peer: peer.clone(),
                    reason: e.to_string(),
                });

            match &result {
                Ok(()) => debug!(%peer, %path, "Delivered to peer"),
                Err(e) => warn!(%peer, %path, error = %e, "Peer delivery failed"),
            }
            PeerDelivery { peer, result }
        });

        join_all(sends).await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePeers {
        peers: Vec<String>,
        failing: Vec<String>,
        enumerate_fails: bool,
        sent: Mutex<Vec<(String, PeerPath, Vec<u8>)>>,
    }

    #[async_trait]
    impl PeerTransport for FakePeers {
        async fn connected_peers(&self) -> anyhow::Result<Vec<String>> {
            if self.enumerate_fails {
                anyhow::bail!("node client unavailable");
            }
            Ok(self.peers.clone())
        }

        async fn send(&self, peer: &str, path: PeerPath, bytes: &[u8]) -> anyhow::Result<()> {
            if self.failing.iter().any(|p| p == peer) {
                anyhow::bail!("link lost");
            }
            self.sent
                .lock()
                .unwrap()
                .push((peer.to_string(), path, bytes.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_isolated_per_peer() {
        // ---
        let transport = Arc::new(FakePeers {
            peers: vec!["phone-a".into(), "phone-b".into(), "tablet".into()],
            failing: vec!["phone-b".into()],
            ..Default::default()
        });
        let relay = PeerRelay::new(transport.clone());

        let results = relay.send_to_all_peers(PeerPath::Location, b"{}").await;

        assert_eq!(results.len(), 3);
        assert!(results[0].result.is_ok());
        assert!(matches!(
            &results[1].result,
            Err(RelayError::PeerUnreachable { peer, .. }) if peer == "phone-b"
        ));
        assert!(results[2].result.is_ok());
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_peers_is_empty_result() {
        // ---
        let relay = PeerRelay::new(Arc::new(FakePeers::default()));
        assert!(relay.send_to_all_peers(PeerPath::FallEvent, b"{}").await.is_empty());

        let relay = PeerRelay::new(Arc::new(FakePeers {
            peers: vec!["phone".into()],
            enumerate_fails: true,
            ..Default::default()
        }));
        assert!(relay.send_to_all_peers(PeerPath::FallEvent, b"{}").await.is_empty());
    }

    #[test]
    fn test_path_parsing() {
        // ---
        for path in [PeerPath::FallEvent, PeerPath::Location, PeerPath::Sensors] {
            assert_eq!(path.as_str().parse::<PeerPath>().unwrap(), path);
        }
        assert!("/fallwatch/contacts".parse::<PeerPath>().is_err());
    }
}
