//! Inbound request dispatch.

use super::deferred::DeferredRequest;
use super::{Svc, SvcAttributes, SvcState, check_request};
use crate::error::{Result, SvcError};
use crate::protocol::{
    HelloRequest, IntfResetRequest, Request, RequestType, VersionRequest, VersionResponse,
};
use std::sync::atomic::Ordering;
use tracing::{debug, error, warn};

impl Svc {
    /// Handle one request sent by the SVC and return the response payload.
    ///
    /// The caller must not deliver the next request for this instance before
    /// this one returned. A hot-unplug returns only after the interface has
    /// been torn down. Errors never change the handshake state. Once the SVC
    /// was shut down every request fails with [`SvcError::QueueClosed`].
    pub async fn handle_request(&self, op_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
        if self.released.load(Ordering::Acquire) {
            debug!(svc = %self.shared.name, op_type, "request after shutdown");
            return Err(SvcError::QueueClosed);
        }

        let state = self.shared.state();
        check_request(state, RequestType::from_u8(op_type)).inspect_err(|e| {
            warn!(svc = %self.shared.name, "{e}");
        })?;

        let request = Request::decode(op_type, payload).inspect_err(|e| {
            warn!(svc = %self.shared.name, "{e}");
        })?;

        match request {
            Request::ProtocolVersion(req) => self.version_request(req),
            Request::Hello(req) => self.hello(req).await,
            Request::IntfHotplug(req) => {
                debug!(svc = %self.shared.name, intf_id = req.intf_id, "hotplug request received");
                self.queue
                    .submit(DeferredRequest::IntfHotplug(req), false)
                    .await?;
                Ok(Vec::new())
            }
            Request::IntfHotUnplug(req) => {
                debug!(svc = %self.shared.name, intf_id = req.intf_id, "hot-unplug request received");
                self.queue
                    .submit(DeferredRequest::IntfHotUnplug(req), true)
                    .await?;
                Ok(Vec::new())
            }
            Request::IntfReset(req) => self.intf_reset_recv(req),
        }
    }

    fn version_request(&self, req: VersionRequest) -> Result<Vec<u8>> {
        let config = &self.shared.config;
        if req.major > config.version_major {
            let err = SvcError::UnsupportedVersion {
                requested: req.major,
                supported: config.version_major,
            };
            warn!(svc = %self.shared.name, "{err}");
            return Err(err);
        }

        self.shared.handshake().version = Some(req);
        self.shared
            .advance(SvcState::Reset, SvcState::VersionNegotiated);

        let response = VersionResponse {
            major: config.version_major,
            minor: config.version_minor,
        };
        Ok(response.encode())
    }

    async fn hello(&self, req: HelloRequest) -> Result<Vec<u8>> {
        self.shared
            .host
            .register_svc(req.endo_id, req.interface_id)
            .await
            .map_err(|e| {
                error!(svc = %self.shared.name, "failed to register svc device: {e}");
                SvcError::DeviceRegistration(e)
            })?;

        self.shared
            .advance(SvcState::VersionNegotiated, SvcState::HelloReceived);
        self.shared.handshake().attributes = Some(SvcAttributes {
            endo_id: req.endo_id,
            ap_intf_id: req.interface_id,
        });
        self.shared
            .advance(SvcState::HelloReceived, SvcState::Operational);

        Ok(Vec::new())
    }

    /// Interface reset is part of the protocol but nothing is reset here.
    fn intf_reset_recv(&self, req: IntfResetRequest) -> Result<Vec<u8>> {
        debug!(svc = %self.shared.name, intf_id = req.intf_id, "interface reset request ignored");
        Ok(Vec::new())
    }
}
