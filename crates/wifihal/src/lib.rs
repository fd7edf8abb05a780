//! Async netlink control-plane core for a wifi HAL.
//!
//! This crate is the multiplexing core that sits between a userspace
//! wifi management framework and the kernel wifi driver (nl80211 plus
//! vendor extensions). Feature subsystems register callbacks against
//! driver commands, issue correlated commands, and read the bounded
//! diagnostic stores; a single dispatch loop per session drains the
//! sockets and routes every message.
//!
//! # Features
//!
//! - `serde` - Serialize diagnostic records and ring status
//! - `lab` - In-process loopback transport for tests
//! - `full` - All features enabled
//!
//! # Example
//!
//! ```ignore
//! use wifihal::WifiHal;
//!
//! #[tokio::main]
//! async fn main() -> wifihal::Result<()> {
//!     let hal = WifiHal::new().await?;
//!     hal.start();
//!
//!     // Route a vendor event to a subsystem callback
//!     hal.register_vendor_handler(0x001374, 11, |msg| {
//!         println!("vendor event, {} payload bytes", msg.payload().len());
//!     });
//!
//!     // Issue a correlated command
//!     let id = hal.allocate_request_id()?;
//!     let mut cmd = wifihal::MessageBuilder::vendor(hal.family_id(), 0x001374, 61);
//!     cmd.set_seq(id);
//!     hal.send(&cmd.finish()).await?;
//!
//!     hal.cleanup().await;
//!     Ok(())
//! }
//! ```

pub mod attr;
pub mod builder;
pub mod command;
pub mod diagnostics;
mod dispatch;
pub mod error;
pub mod event;
pub mod genl;
pub mod handler;
pub mod interface;
pub mod message;
pub mod ring;
pub mod socket;
pub mod transport;
pub mod util;

mod hal;

#[cfg(any(test, feature = "lab"))]
pub mod lab;

// Re-export common types at crate root for convenience
pub use builder::MessageBuilder;
pub use command::Command;
pub use dispatch::LoopState;
pub use error::{Error, Result};
pub use event::EventMessage;
pub use hal::WifiHal;
pub use transport::{NetlinkTransport, SocketKind, Transport};
