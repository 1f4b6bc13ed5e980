//! Client side of the XDG desktop portal request lifecycle.
//!
//! Privileged operations (camera access, screenshots, file selection, screen
//! cast sessions) are asynchronous round trips through the portal broker:
//! the method call only returns a request object, and the actual answer
//! arrives later as a `Response` signal on it. [`Portal`] drives that
//! lifecycle and exposes each operation as a start/finish pair.

pub mod bus;
pub mod config;
pub mod desktop;
mod error;
pub mod parent;
mod portal;
pub mod request;

pub use bus::{PortalBus, ZbusBus};
pub use config::PortalConfig;
pub use error::{Error, Result};
pub use parent::{Parent, WindowExporter};
pub use portal::Portal;
pub use request::{Operation, OperationTag, Outcome, RequestHandle, RequestResult};
pub use tokio_util::sync::CancellationToken;
