use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::detector::{ActivityDetector, ActivitySignal};
use super::reporter::{heartbeat_loop, HeartbeatTransport, ReporterConfig};
use crate::config::PresenceConfig;
use crate::models::AttentionState;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub idle_threshold: Duration,
    pub detector_tick: Duration,
    pub reporter: ReporterConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&PresenceConfig::default())
    }
}

impl From<&PresenceConfig> for MonitorConfig {
    fn from(presence: &PresenceConfig) -> Self {
        Self {
            idle_threshold: presence.idle_threshold(),
            detector_tick: Duration::from_secs(1),
            reporter: ReporterConfig {
                keepalive_interval: presence.heartbeat_interval(),
                ..ReporterConfig::default()
            },
        }
    }
}

/// Detector and reporter for one joined session.
///
/// Both run as tasks that live exactly as long as the monitor: `stop` (or
/// dropping the monitor) cancels them and their timers.
pub struct AttentionMonitor {
    signals: mpsc::UnboundedSender<ActivitySignal>,
    state: watch::Receiver<AttentionState>,
    cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl AttentionMonitor {
    pub fn start(
        session_id: String,
        transport: Arc<dyn HeartbeatTransport>,
        config: MonitorConfig,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let detector = ActivityDetector::new(config.idle_threshold, Instant::now());
        let state = detector.subscribe();
        let (signals, signal_rx) = mpsc::unbounded_channel();

        let detector_handle = tokio::spawn(detector_loop(
            detector,
            signal_rx,
            config.detector_tick,
            cancel_token.clone(),
        ));
        let reporter_handle = tokio::spawn(heartbeat_loop(
            session_id,
            transport,
            state.clone(),
            config.reporter,
            cancel_token.clone(),
        ));

        Self {
            signals,
            state,
            cancel_token,
            handles: vec![detector_handle, reporter_handle],
        }
    }

    pub fn signal(&self, signal: ActivitySignal) {
        if self.signals.send(signal).is_err() {
            tracing::debug!("monitor stopped; dropping {:?}", signal);
        }
    }

    pub fn state(&self) -> AttentionState {
        *self.state.borrow()
    }

    pub async fn stop(mut self) -> Result<()> {
        self.cancel_token.cancel();
        for handle in std::mem::take(&mut self.handles) {
            handle.await.context("attention monitor task failed to join")?;
        }
        Ok(())
    }
}

impl Drop for AttentionMonitor {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn detector_loop(
    mut detector: ActivityDetector,
    mut signals: mpsc::UnboundedReceiver<ActivitySignal>,
    tick: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                detector.tick(Instant::now());
            }
            Some(signal) = signals.recv() => {
                detector.apply(signal, Instant::now());
            }
        }
    }
}
