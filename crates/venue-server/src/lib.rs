//! Coordination server for a live venue: scene fan-out, media signaling
//! relay and audience uploads over one WebSocket endpoint.

pub mod client;
pub mod dispatch;
pub mod ingest;
pub mod relay;
pub mod scene;
pub mod server;

pub use client::ConnectionRegistry;
pub use dispatch::VenueState;
pub use ingest::{IngestError, UploadIngestor};
pub use relay::{RelayError, SignalingRelay};
pub use scene::SceneCoordinator;
pub use server::{start, ServerConfig, ServerHandle};
