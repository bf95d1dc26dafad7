/// Coinwatch Stream - Market Tick Ingestion and Alerting
///
/// Connects to an upstream aggregated crypto tick feed over WebSocket and
/// keeps a bounded in-memory view of every monitored pair, running three
/// alert detectors on each tick:
/// - high-of-day: price breaks the rolling 24h high-water mark
/// - running-up: price climbs over a short persisted lookback window
/// - top-gainer: 24h movers screened on volume and volume/marketcap ratio
///
/// The library includes:
/// - Connection management: auth, heartbeat, staleness watchdog, and
///   exponential backoff reconnects with a re-bootstrap fallback
/// - Rate-limited batched subscription scheduling
/// - A persistence gateway boundary (PostgREST/Supabase or in-memory)
///   consumed by a worker off the ingestion path
pub mod alert;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod persist;
pub mod protocol;
pub mod store;
pub mod subscription;
pub mod universe;

// Re-export the types a typical embedding needs
pub use config::EngineConfig;
pub use connection::ConnectionState;
pub use engine::{Engine, EngineHandle};
pub use error::{BootstrapError, PersistError, StreamError};
pub use persist::{MemoryGateway, PersistenceGateway, SupabaseGateway};
pub use store::{Analytics, MarketSnapshot};
