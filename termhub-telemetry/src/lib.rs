//! Transport de télémétrie temps réel pour le dashboard termhub.
//!
//! Une connexion de monitoring par serveur, multiplexée vers N abonnés :
//! décodage des trames binaires ([`codec`]), estimation RTT / offset
//! ([`latency`]), cycle de vie et reconnexion ([`lifecycle`]), fan-out
//! ([`hub`]).

pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod hub;
pub mod latency;
pub mod lifecycle;
pub mod models;
pub mod protocol;
pub mod retry;
pub mod transport;

pub use auth::{CredentialProvider, EnvToken, StaticToken};
pub use config::{load_config, load_config_from, validate_server_id, TelemetryConfig};
pub use error::{ConfigError, DecodeError, HandshakeError, Result, TelemetryError, TransportError};
pub use hub::{Listener, Subscription, SubscriptionHub};
pub use latency::{EchoExchange, HeartbeatCadence, LatencyEstimator, Visibility};
pub use models::{
    ConnectionSnapshot, ConnectionStatus, CpuStats, DiskUsage, LatencySample, MemoryStats,
    MetricsSample, NetworkStats, StatusDetail, StatusEvent, SystemInfo,
};
pub use protocol::{ControlMessage, Echo};
pub use retry::{ReconnectPolicy, RetrySchedule};
pub use transport::{Channel, ConnectRequest, Connector, Frame, WsConnector};
