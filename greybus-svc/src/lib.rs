//! greybus-svc - Greybus SVC protocol engine.
//!
//! Speaks the SVC (supervisory controller) protocol from the AP side of a
//! Greybus fabric: negotiates the version, takes the hello, and then tracks
//! module interfaces as the SVC reports them coming and going.
//!
//! ## Architecture
//!
//! - **Dispatcher**: gates each inbound request on the handshake state and
//!   answers the cheap ones inline
//! - **Deferred worker**: one task per SVC that provisions and removes
//!   interfaces off the dispatch path
//! - **Route manager**: outbound route, connection, DME and device id calls
//!
//! The transport ([`operation::Operations`]) and the interface object model
//! ([`host::HostDevice`]) are supplied by the embedding host driver.
//! [`sim::LoopbackFabric`] implements both in memory.

pub mod config;
pub mod error;
pub mod host;
pub mod operation;
pub mod protocol;
pub mod sim;
pub mod svc;

pub use config::Config;
pub use error::{Result, SvcError};
pub use svc::{Interface, Svc, SvcAttributes, SvcEvent, SvcState};
