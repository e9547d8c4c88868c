pub mod errors;
pub mod events;
pub mod ids;
pub mod scene;

pub use errors::ProtocolError;
pub use ids::ConnectionId;
pub use scene::SceneIndex;
