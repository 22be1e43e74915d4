//! Host device boundary: SVC device publication and the interface object
//! model.

use crate::error::HostError;
use crate::svc::Interface;
use async_trait::async_trait;

/// Services the SVC engine consumes from the host device that owns it.
///
/// Interface objects are created, initialized and removed here; the engine
/// only keeps the bookkeeping record for each interface id.
#[async_trait]
pub trait HostDevice: Send + Sync {
    /// Make the SVC device visible once the hello handshake completed.
    async fn register_svc(&self, endo_id: u16, ap_intf_id: u8) -> Result<(), HostError>;

    /// Withdraw the SVC device on teardown.
    async fn unregister_svc(&self);

    /// Allocate the interface object for `intf_id`.
    async fn interface_create(&self, intf_id: u8) -> Result<(), HostError>;

    /// Bring up an interface that has a device id and a route.
    async fn interface_init(&self, intf: &Interface, device_id: u8) -> Result<(), HostError>;

    /// Release the interface object. `intf.disconnected` tells whether the
    /// module is already gone, in which case no peer should be notified.
    async fn interface_remove(&self, intf: &Interface);
}
