//! Interface lifecycle: hotplug provisioning, hot-unplug and removal.
//!
//! Runs on the deferred worker only, which makes it the single writer of
//! the interface table.

use super::deferred::{DeferredHandler, DeferredRequest};
use super::{Interface, SvcEvent, SvcShared};
use crate::error::{Result, SvcError};
use crate::protocol::{
    DEVICE_ID_AP, DME_ATTR_SELECTOR_INDEX, DME_ATTR_T_TST_SRC_INCREMENT,
    DME_TSI_FALLBACK_UNIPRO_BOOT_STARTED, DME_TSI_UNIPRO_BOOT_STARTED, HotUnplugRequest,
    HotplugRequest,
};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

#[async_trait]
impl DeferredHandler for SvcShared {
    async fn process(&self, request: DeferredRequest) {
        match request {
            DeferredRequest::IntfHotplug(req) => {
                if let Err(error) = self.process_intf_hotplug(&req).await {
                    self.emit(SvcEvent::HotplugFailed {
                        intf_id: req.intf_id,
                        error,
                    });
                }
            }
            DeferredRequest::IntfHotUnplug(req) => self.process_intf_hot_unplug(&req).await,
        }
    }
}

impl SvcShared {
    /// Read the module boot status and clear it.
    ///
    /// Returns whether the module boots over UniPro. A zero status means the
    /// module has not finished booting.
    async fn read_and_clear_module_boot_status(&self, intf_id: u8) -> Result<bool> {
        let value = self
            .dme_peer_get(intf_id, DME_ATTR_T_TST_SRC_INCREMENT, DME_ATTR_SELECTOR_INDEX)
            .await?;

        if value == 0 {
            error!(svc = %self.name, intf_id, "module not ready yet");
            return Err(SvcError::NotReady(intf_id));
        }

        let boot_over_unipro =
            value == DME_TSI_UNIPRO_BOOT_STARTED || value == DME_TSI_FALLBACK_UNIPRO_BOOT_STARTED;

        self.dme_peer_set(
            intf_id,
            DME_ATTR_T_TST_SRC_INCREMENT,
            DME_ATTR_SELECTOR_INDEX,
            0,
        )
        .await?;

        Ok(boot_over_unipro)
    }

    /// Provision a newly reported interface.
    ///
    /// Every failure unwinds what was acquired so far, in reverse order. The
    /// one exception is a module that has not finished booting, which leaves
    /// the bare interface record behind for the next hotplug to replace.
    pub(super) async fn process_intf_hotplug(&self, req: &HotplugRequest) -> Result<u8> {
        let intf_id = req.intf_id;
        debug!(svc = %self.name, intf_id, "processing interface hotplug");

        if let Some(existing) = self.interfaces.get(intf_id) {
            // Bootrom handing over to firmware, or a module that crashed and
            // re-announced itself: neither sends a hot-unplug first.
            info!(svc = %self.name, intf_id, "removing interface to add it again");
            self.intf_remove(existing, false).await;
        }

        self.host
            .interface_create(intf_id)
            .await
            .map_err(|source| {
                error!(svc = %self.name, intf_id, "failed to create interface: {source}");
                SvcError::InterfaceCreate { intf_id, source }
            })?;
        let inserted = self.interfaces.insert(Interface::new(intf_id));
        debug_assert!(inserted, "interface {intf_id} already present");

        let boot_over_unipro = match self.read_and_clear_module_boot_status(intf_id).await {
            Ok(boot_over_unipro) => boot_over_unipro,
            // Not booted yet: keep the bare record for the next hotplug.
            Err(e @ SvcError::NotReady(_)) => return Err(e),
            Err(e) => {
                error!(svc = %self.name, intf_id, "failed to clear boot status: {e}");
                self.abort_hotplug(intf_id, None, false).await;
                return Err(e);
            }
        };

        self.interfaces.update(intf_id, |intf| {
            intf.boot_over_unipro = boot_over_unipro;
            intf.set_ids(&req.data);
        });

        let device_id = match self.device_ids.allocate() {
            Ok(device_id) => device_id,
            Err(e) => {
                error!(svc = %self.name, intf_id, "failed to allocate device id: {e}");
                self.abort_hotplug(intf_id, None, false).await;
                return Err(e);
            }
        };

        if let Err(e) = self.intf_device_id(intf_id, device_id).await {
            error!(svc = %self.name, intf_id, device_id, "failed to set device id: {e}");
            self.abort_hotplug(intf_id, Some(device_id), false).await;
            return Err(e);
        }
        self.interfaces
            .update(intf_id, |intf| intf.device_id = Some(device_id));

        let ap_intf_id = self.ap_intf_id();
        if let Err(e) = self
            .route_create(ap_intf_id, DEVICE_ID_AP, intf_id, device_id)
            .await
        {
            error!(svc = %self.name, intf_id, device_id, "failed to create route: {e}");
            self.abort_hotplug(intf_id, Some(device_id), false).await;
            return Err(e);
        }

        let intf = self
            .interfaces
            .get(intf_id)
            .unwrap_or_else(|| Interface::new(intf_id));
        if let Err(source) = self.host.interface_init(&intf, device_id).await {
            error!(svc = %self.name, intf_id, device_id, "failed to initialize interface: {source}");
            self.abort_hotplug(intf_id, Some(device_id), true).await;
            return Err(SvcError::InterfaceInit { intf_id, source });
        }

        self.interfaces.update(intf_id, |intf| intf.initialized = true);
        info!(svc = %self.name, intf_id, device_id, boot_over_unipro, "interface added");
        self.emit(SvcEvent::InterfaceAdded { intf_id, device_id });
        Ok(device_id)
    }

    /// Undo a partial hotplug: route, then device id, then the interface.
    async fn abort_hotplug(&self, intf_id: u8, device_id: Option<u8>, route_created: bool) {
        if route_created {
            self.route_destroy(self.ap_intf_id(), intf_id).await;
        }
        if let Some(device_id) = device_id {
            self.release_device_id(device_id);
        }
        if let Some(intf) = self.interfaces.remove(intf_id) {
            self.host.interface_remove(&intf).await;
        }
    }

    pub(super) async fn process_intf_hot_unplug(&self, req: &HotUnplugRequest) {
        let intf_id = req.intf_id;
        debug!(svc = %self.name, intf_id, attach_state = req.attach_state, "processing interface hot-unplug");

        let Some(intf) = self.interfaces.get(intf_id) else {
            warn!(svc = %self.name, intf_id, "could not find hot-unplug interface");
            return;
        };

        self.intf_remove(intf, req.attached()).await;
    }

    /// Remove an interface: release the object, destroy its route, free its
    /// device id.
    pub(super) async fn intf_remove(&self, intf: Interface, attached: bool) {
        let intf_id = intf.interface_id;
        let mut intf = self.interfaces.remove(intf_id).unwrap_or(intf);
        intf.disconnected = !attached;

        self.host.interface_remove(&intf).await;

        // Interfaces that never got a device id have no route either.
        if let Some(device_id) = intf.device_id {
            self.route_destroy(self.ap_intf_id(), intf_id).await;
            self.release_device_id(device_id);
        }

        info!(svc = %self.name, intf_id, disconnected = intf.disconnected, "interface removed");
        self.emit(SvcEvent::InterfaceRemoved {
            intf_id,
            device_id: intf.device_id,
        });
    }
}
