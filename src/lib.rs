pub mod config;
pub mod decoder;
pub mod events;
pub mod frame;
pub mod gateway;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod store;
pub mod types;

pub use config::{ConfigError, ServerConfig};
pub use decoder::{decode_cycle, decode_samples, rssi_bucket, CycleReading};
pub use events::{EventBus, PushEvent};
pub use frame::CodecError;
pub use gateway::{CommandGateway, GatewayError};
pub use scheduler::SnapshotScheduler;
pub use server::Server;
pub use session::{DeviceSession, SessionError};
pub use store::LiveStore;
pub use types::*;
