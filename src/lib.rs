//! Rust library for controlling WeBack cloud-connected robot vacuums
//!
//! This library provides an async API for robots that talk to the WeBack
//! cloud. It supports:
//!
//! - Login with an on-disk token cache shared between accounts
//! - Robot listing via the WeBack HTTP API
//! - A self-healing WebSocket link with a dead-link watchdog
//! - Cleaning commands, fan/mop speed, voice and volume settings
//! - Adaptive status polling (fast while cleaning, slow while docked)
//! - Floor plan decoding with rooms, cleaning path and coordinate transforms
//! - Real-time status and map update subscriptions
//!
//! # Quick Start
//!
//! ```no_run
//! use weback_vacuum::{SessionConfig, SessionUpdate, WebackClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::from_file("weback.toml")?;
//!     let client = WebackClient::new(config).await?;
//!
//!     let devices = client.devices().await?;
//!     if let Some(robot) = devices.first() {
//!         // Keep the link and status fresh in the background
//!         let refresh = robot.start_refresh();
//!
//!         robot.start().await?;
//!
//!         let mut updates = robot.subscribe();
//!         while let Ok(update) = updates.recv().await {
//!             if let SessionUpdate::Status(status) = update {
//!                 println!("{:?} at {:?}%", status.working_state(), status.battery_level());
//!                 break;
//!             }
//!         }
//!
//!         refresh.shutdown().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: Login and robot listing
//! - **Device**: Commands and confirmation polling for one robot
//! - **Scheduler**: Background keep-alive and adaptive polling
//! - **Connection**: WebSocket lifecycle, watchdog and inbound frame dispatch
//! - **Auth**: HTTP API with bounded retries
//! - **Credentials**: Token cache file
//! - **Map**: Map payload decoding and coordinate transforms
//! - **Protocol**: JSON message structures
//! - **Types**: Domain types and data structures

mod auth;
mod bitmap;
mod client;
mod config;
mod connection;
mod credentials;
mod device;
mod error;
mod map;
mod protocol;
mod scheduler;
mod status;
mod subscription;
mod types;

// Public exports
pub use auth::{AuthClient, HTTP_RETRIES};
pub use bitmap::MapImage;
pub use client::WebackClient;
pub use config::{AccountConfig, SessionConfig, DEFAULT_AUTH_URL};
pub use connection::{SocketSession, PUBLISH_ATTEMPTS, WATCHDOG_LIMIT};
pub use credentials::{Credential, CredentialStore};
pub use device::VacuumDevice;
pub use error::{AuthFailure, Result, WebackError};
pub use map::{
    CalibrationPoint, MapDocument, PathKind, PathPoint, PixelPoint, Room, RoomSelection,
    VirtualPoint, DISPLAY_SCALE,
};
pub use protocol::{Envelope, InboundFrame, OutboundEnvelope};
pub use scheduler::{
    refresh_interval_for, RefreshScheduler, ACTIVE_REFRESH_INTERVAL, IDLE_REFRESH_INTERVAL,
};
pub use status::StatusStore;
pub use subscription::{SessionUpdate, UpdateReceiver};
pub use types::{
    CleaningMode, DeviceDescriptor, FanSpeed, LinkState, MopLevel, RobotStatus, RoomId, Switch,
    ThingName, WorkingState,
};
