//! # framechat-server
//!
//! TCP server for framechat.
//!
//! This crate provides:
//! - An accept loop that assigns each peer an identity
//! - A peer registry guarded by a single lock
//! - Unicast and best-effort broadcast routing
//! - Parked attachment offers resolved by the operator
//! - Configuration loading and optional Prometheus metrics

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod registry;
pub mod routing;
pub mod server;

pub use config::{AttachmentsConfig, Config, LimitsConfig, MetricsConfig, NetworkConfig};
pub use error::ServerError;
pub use event::{EventReceiver, ServerEvent};
pub use metrics::Metrics;
pub use registry::{PeerInfo, PeerRegistry};
pub use routing::{Destination, RouteFailure, RouteReport, Router};
pub use server::{Server, ServerConfig, ServerStats};
