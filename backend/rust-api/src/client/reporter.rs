use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::AttentionState;

/// Network side of the reporter.
#[async_trait]
pub trait HeartbeatTransport: Send + Sync {
    async fn send_heartbeat(&self, session_id: &str, state: AttentionState) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub keepalive_interval: Duration,
    pub push_timeout: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            push_timeout: Duration::from_secs(10),
        }
    }
}

/// Pushes the detector's state: ACTIVE at once, then on every change and on
/// every keep-alive tick, until cancelled.
///
/// Pushes go out one at a time so the server sees transitions in order. A
/// slow push holds back the next one by at most `push_timeout`; changes made
/// meanwhile collapse into the latest state, which is sent right after.
/// Cancellation interrupts a push in flight.
///
/// Failed pushes are logged and dropped; the next one resynchronizes.
pub async fn heartbeat_loop(
    session_id: String,
    transport: Arc<dyn HeartbeatTransport>,
    mut states: watch::Receiver<AttentionState>,
    config: ReporterConfig,
    cancel_token: CancellationToken,
) {
    let send = |state| {
        let transport = transport.clone();
        let session_id = session_id.clone();
        let config = config.clone();
        let cancel_token = cancel_token.clone();
        async move {
            tokio::select! {
                _ = cancel_token.cancelled() => false,
                _ = push(&*transport, &session_id, state, &config) => true,
            }
        }
    };

    if !send(AttentionState::Active).await {
        return;
    }
    let current = *states.borrow_and_update();
    if current != AttentionState::Active && !send(current).await {
        return;
    }

    let mut ticker = tokio::time::interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let state = tokio::select! {
            _ = cancel_token.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    tracing::debug!("activity detector gone; stopping heartbeats");
                    return;
                }
                *states.borrow_and_update()
            }
            _ = ticker.tick() => *states.borrow(),
        };
        if !send(state).await {
            break;
        }
    }
    tracing::debug!("heartbeat loop for session {} shutting down", session_id);
}

async fn push(
    transport: &dyn HeartbeatTransport,
    session_id: &str,
    state: AttentionState,
    config: &ReporterConfig,
) {
    match tokio::time::timeout(
        config.push_timeout,
        transport.send_heartbeat(session_id, state),
    )
    .await
    {
        Ok(Ok(())) => tracing::trace!("heartbeat {} sent", state.as_str()),
        Ok(Err(err)) => tracing::warn!("heartbeat {} failed: {err:#}", state.as_str()),
        Err(_) => tracing::warn!(
            "heartbeat {} timed out after {:?}",
            state.as_str(),
            config.push_timeout
        ),
    }
}
