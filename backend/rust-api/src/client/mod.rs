//! Headless student client: attention detection and heartbeat reporting.

pub mod api;
pub mod detector;
pub mod monitor;
pub mod reporter;

pub use api::{ContentPoll, PresenceApiClient};
pub use detector::{ActivityDetector, ActivitySignal};
pub use monitor::{AttentionMonitor, MonitorConfig};
pub use reporter::{HeartbeatTransport, ReporterConfig};
