//! Headless student client.
//!
//! Joins a live session, reports attention from stdin signals (one per line:
//! `input`, `focus`, `blur`, `hide`, `show`, `hand`, `lower`, `quit`) and
//! exits when the teacher ends the session.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classroom_presence_api::client::{
    ActivitySignal, AttentionMonitor, ContentPoll, MonitorConfig, PresenceApiClient,
};
use classroom_presence_api::config::{Config, PresenceConfig};

const CONTENT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classroom_presence_api=info,attention_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let username = std::env::var("USERNAME").context("USERNAME must be set")?;
    let password = std::env::var("SESSION_PASSWORD").context("SESSION_PASSWORD must be set")?;
    let api_url =
        std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:8081".to_string());

    let presence = match Config::load() {
        Ok(config) => config.presence,
        Err(e) => {
            tracing::warn!("Using default presence timings: {}", e);
            PresenceConfig::default()
        }
    };

    let api = Arc::new(PresenceApiClient::new(api_url)?);
    let joined = api.join(&username, &password).await?;
    tracing::info!(
        "Joined session {} as {} {}",
        joined.session_id,
        joined.student.first_name,
        joined.student.last_name
    );

    let monitor = AttentionMonitor::start(
        joined.session_id.clone(),
        api.clone(),
        MonitorConfig::from(&presence),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut poll = tokio::time::interval(CONTENT_POLL_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "" => {}
                    "quit" | "exit" => break,
                    "hand" | "lower" => {
                        let raised = line.trim() == "hand";
                        if let Err(e) = api.set_hand_raised(raised).await {
                            tracing::warn!("Hand raise failed: {e:#}");
                        }
                    }
                    other => match ActivitySignal::parse(other) {
                        Some(signal) => monitor.signal(signal),
                        None => tracing::warn!("Unknown signal: {}", other),
                    },
                }
            }
            _ = poll.tick() => {
                match api.fetch_content().await {
                    Ok(ContentPoll::Live(content)) => tracing::debug!(
                        "Lesson '{}' with {} resources",
                        content.lesson.title,
                        content.resources.len()
                    ),
                    Ok(ContentPoll::SessionEnded) => {
                        tracing::info!("Session ended by the teacher; logging out");
                        break;
                    }
                    Ok(ContentPoll::Unauthorized) => {
                        tracing::warn!("Session token rejected; please join again");
                        break;
                    }
                    Err(e) => tracing::warn!("Content poll failed: {e:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    monitor.stop().await?;
    tracing::info!("Attention client stopped");
    Ok(())
}
