pub mod config;
pub mod cooldown;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod listener;
pub mod pattern;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::info;

use config::DetectorConfig;
use coordinator::DetectionCoordinator;
use event::DetectionEvent;
use listener::NetworkListener;

/// One running detector: its listener and coordinator.
pub struct DetectorHandle {
    listener: NetworkListener,
    coordinator: Arc<DetectionCoordinator>,
}

impl DetectorHandle {
    /// Whether the detection signal is currently on.
    pub fn is_active(&self) -> bool {
        self.coordinator.is_active()
    }

    /// Timestamp of the most recent accepted detection.
    pub fn last_detection(&self) -> Option<DateTime<Utc>> {
        self.coordinator.last_detection()
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_running()
    }

    /// Address the listener actually bound.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

/// Owns every running detector, keyed by entry id. An explicit registry
/// passed to whoever needs to look up a running instance, not global state.
///
/// All detectors share one bounded detection event channel; the receiving
/// end is handed out once at construction.
pub struct Supervisor {
    detectors: HashMap<String, DetectorHandle>,
    events_tx: mpsc::Sender<DetectionEvent>,
}

impl Supervisor {
    /// Creates a supervisor and the receiving end of its detection event
    /// channel.
    pub fn new(event_buffer: usize) -> (Self, mpsc::Receiver<DetectionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(event_buffer);
        (
            Self {
                detectors: HashMap::new(),
                events_tx,
            },
            events_rx,
        )
    }

    /// Validates, builds and starts a detector under `entry_id`. Fails
    /// without side effects when the id is taken, the configuration is
    /// invalid, or the port cannot be bound.
    pub async fn spawn(&mut self, entry_id: &str, config: DetectorConfig) -> Result<()> {
        if self.detectors.contains_key(entry_id) {
            bail!("detector '{}' already exists", entry_id);
        }
        config
            .validate(entry_id)
            .with_context(|| format!("invalid configuration for detector '{}'", entry_id))?;

        let coordinator = DetectionCoordinator::new(
            entry_id.to_string(),
            config.sensor_duration(),
            self.events_tx.clone(),
        );
        let listener =
            NetworkListener::new(entry_id.to_string(), config, Arc::clone(&coordinator))?;
        listener
            .start()
            .await
            .with_context(|| format!("failed to start detector '{}'", entry_id))?;

        self.detectors.insert(
            entry_id.to_string(),
            DetectorHandle {
                listener,
                coordinator,
            },
        );
        Ok(())
    }

    /// Stops and removes a detector. Returns false when no such entry
    /// exists.
    pub async fn remove(&mut self, entry_id: &str) -> bool {
        match self.detectors.remove(entry_id) {
            Some(handle) => {
                handle.listener.stop().await;
                handle.coordinator.shutdown();
                info!("detector '{}' removed", entry_id);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, entry_id: &str) -> Option<&DetectorHandle> {
        self.detectors.get(entry_id)
    }

    /// Whether the named detector's signal is currently on.
    pub fn is_active(&self, entry_id: &str) -> Option<bool> {
        self.detectors.get(entry_id).map(|h| h.is_active())
    }

    /// Most recent accepted detection for the named detector.
    pub fn last_detection(&self, entry_id: &str) -> Option<DateTime<Utc>> {
        self.detectors
            .get(entry_id)
            .and_then(|h| h.last_detection())
    }

    pub fn entry_ids(&self) -> impl Iterator<Item = &str> {
        self.detectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Stops every detector. Best-effort; never fails.
    pub async fn shutdown_all(&mut self) {
        for (entry_id, handle) in self.detectors.drain() {
            handle.listener.stop().await;
            handle.coordinator.shutdown();
            info!("detector '{}' stopped", entry_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use crate::pattern::PatternKind;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    fn udp_detector(pattern: &str) -> DetectorConfig {
        DetectorConfig {
            enabled: true,
            protocol: Protocol::Udp,
            // Placeholder; tests that spawn() pick a free port first, since
            // validation rejects port 0.
            port: 0,
            multicast: false,
            multicast_group: Ipv4Addr::new(224, 0, 0, 251),
            pattern_type: PatternKind::String,
            pattern_value: pattern.to_string(),
            cooldown_seconds: 0.0,
            sensor_duration_seconds: 2.0,
            source_ip: None,
        }
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let (mut supervisor, _events) = Supervisor::new(16);
        let mut config = udp_detector("ALERT");
        config.cooldown_seconds = -1.0;
        config.port = 9999;
        assert!(supervisor.spawn("bad", config).await.is_err());
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_rejects_duplicate_entry_id() {
        let (mut supervisor, _events) = Supervisor::new(16);
        let mut config = udp_detector("ALERT");
        config.port = pick_udp_port().await;
        supervisor.spawn("dup", config.clone()).await.unwrap();
        assert!(supervisor.spawn("dup", config).await.is_err());
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_detection_flows_to_supervisor_surface() {
        let (mut supervisor, mut events) = Supervisor::new(16);
        let mut config = udp_detector("ALERT");
        config.port = pick_udp_port().await;
        supervisor.spawn("porch", config).await.unwrap();

        assert_eq!(supervisor.is_active("porch"), Some(false));
        assert!(supervisor.last_detection("porch").is_none());

        let port = supervisor.get("porch").unwrap().local_addr().unwrap().port();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"xxALERTxx", ("127.0.0.1", port))
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(event.entry_id, "porch");

        assert_eq!(supervisor.is_active("porch"), Some(true));
        assert!(supervisor.last_detection("porch").is_some());

        assert!(supervisor.remove("porch").await);
        assert!(!supervisor.remove("porch").await);
    }

    /// Bind an ephemeral UDP port and release it so a validated config can
    /// name a concrete port.
    async fn pick_udp_port() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap().port()
    }
}
