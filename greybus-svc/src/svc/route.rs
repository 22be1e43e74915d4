//! Outbound SVC operations: routes, connections, DME attributes and
//! interface device ids.
//!
//! Create-style calls surface failures to the caller. Destroy-style calls
//! are best effort: failures are logged and teardown continues.

use super::{Svc, SvcShared};
use crate::error::{OperationError, Result, SvcError};
use crate::protocol::{
    CPORT_FLAGS_CSD_N, CPORT_FLAGS_CSV_N, CPORT_FLAGS_E2EFC, ConnCreateRequest,
    ConnDestroyRequest, DmePeerGetRequest, DmePeerGetResponse, DmePeerSetRequest,
    DmePeerSetResponse, IntfDeviceIdRequest, IntfResetRequest, RouteCreateRequest,
    RouteDestroyRequest, op,
};
use tracing::error;

/// CPort flags for a new connection.
///
/// Interfaces that boot over UniPro must not see end-to-end flow control
/// before their firmware is up.
pub fn connection_flags(boot_over_unipro: bool) -> u8 {
    if boot_over_unipro {
        CPORT_FLAGS_CSV_N | CPORT_FLAGS_CSD_N
    } else {
        CPORT_FLAGS_CSV_N | CPORT_FLAGS_E2EFC
    }
}

impl SvcShared {
    async fn sync_call(
        &self,
        op_type: u8,
        intf_id: u8,
        request: Vec<u8>,
        response_size: usize,
    ) -> Result<Vec<u8>> {
        let response = self
            .connection
            .call(op_type, request, response_size)
            .await
            .map_err(|source| SvcError::Remote {
                op_type,
                intf_id,
                source,
            })?;

        if response.len() < response_size {
            return Err(SvcError::Remote {
                op_type,
                intf_id,
                source: OperationError::ShortResponse {
                    expected: response_size,
                    actual: response.len(),
                },
            });
        }
        Ok(response)
    }

    pub(super) async fn intf_device_id(&self, intf_id: u8, device_id: u8) -> Result<()> {
        let request = IntfDeviceIdRequest { intf_id, device_id };
        self.sync_call(op::INTF_DEVICE_ID, intf_id, request.encode(), 0)
            .await
            .map(|_| ())
    }

    pub(super) async fn intf_reset(&self, intf_id: u8) -> Result<()> {
        let request = IntfResetRequest { intf_id };
        self.sync_call(op::INTF_RESET, intf_id, request.encode(), 0)
            .await
            .map(|_| ())
    }

    pub(super) async fn dme_peer_get(&self, intf_id: u8, attr: u16, selector: u16) -> Result<u32> {
        let request = DmePeerGetRequest {
            intf_id,
            attr,
            selector,
        };
        let payload = self
            .sync_call(
                op::DME_PEER_GET,
                intf_id,
                request.encode(),
                DmePeerGetResponse::SIZE,
            )
            .await
            .inspect_err(|e| {
                error!(svc = %self.name, "failed to get DME attribute ({intf_id} 0x{attr:04x} {selector}): {e}");
            })?;

        let response = DmePeerGetResponse::decode(&payload);
        if response.result_code != 0 {
            let err = SvcError::RemoteResult {
                intf_id,
                attr,
                selector,
                result: response.result_code,
            };
            error!(svc = %self.name, "{err}");
            return Err(err);
        }
        Ok(response.attr_value)
    }

    pub(super) async fn dme_peer_set(
        &self,
        intf_id: u8,
        attr: u16,
        selector: u16,
        value: u32,
    ) -> Result<()> {
        let request = DmePeerSetRequest {
            intf_id,
            attr,
            selector,
            value,
        };
        let payload = self
            .sync_call(
                op::DME_PEER_SET,
                intf_id,
                request.encode(),
                DmePeerSetResponse::SIZE,
            )
            .await
            .inspect_err(|e| {
                error!(svc = %self.name, "failed to set DME attribute ({intf_id} 0x{attr:04x} {selector} {value}): {e}");
            })?;

        let response = DmePeerSetResponse::decode(&payload);
        if response.result_code != 0 {
            let err = SvcError::RemoteResult {
                intf_id,
                attr,
                selector,
                result: response.result_code,
            };
            error!(svc = %self.name, "{err}");
            return Err(err);
        }
        Ok(())
    }

    pub(super) async fn connection_create(
        &self,
        intf1_id: u8,
        cport1_id: u16,
        intf2_id: u8,
        cport2_id: u16,
        boot_over_unipro: bool,
    ) -> Result<()> {
        let request = ConnCreateRequest {
            intf1_id,
            cport1_id,
            intf2_id,
            cport2_id,
            tc: 0,
            flags: connection_flags(boot_over_unipro),
        };
        self.sync_call(op::CONN_CREATE, intf2_id, request.encode(), 0)
            .await
            .map(|_| ())
    }

    pub(super) async fn connection_destroy(
        &self,
        intf1_id: u8,
        cport1_id: u16,
        intf2_id: u8,
        cport2_id: u16,
    ) {
        let request = ConnDestroyRequest {
            intf1_id,
            cport1_id,
            intf2_id,
            cport2_id,
        };
        if let Err(e) = self
            .sync_call(op::CONN_DESTROY, intf2_id, request.encode(), 0)
            .await
        {
            error!(
                svc = %self.name,
                "failed to destroy connection ({intf1_id}:{cport1_id} {intf2_id}:{cport2_id}): {e}"
            );
        }
    }

    /// Create the two-way route between two (interface, device id) pairs.
    pub(super) async fn route_create(
        &self,
        intf1_id: u8,
        dev1_id: u8,
        intf2_id: u8,
        dev2_id: u8,
    ) -> Result<()> {
        let request = RouteCreateRequest {
            intf1_id,
            dev1_id,
            intf2_id,
            dev2_id,
        };
        self.sync_call(op::ROUTE_CREATE, intf2_id, request.encode(), 0)
            .await
            .map(|_| ())
    }

    /// Destroy the two-way route between two interfaces.
    pub(super) async fn route_destroy(&self, intf1_id: u8, intf2_id: u8) {
        let request = RouteDestroyRequest { intf1_id, intf2_id };
        if let Err(e) = self
            .sync_call(op::ROUTE_DESTROY, intf2_id, request.encode(), 0)
            .await
        {
            error!(svc = %self.name, "failed to destroy route ({intf1_id} {intf2_id}): {e}");
        }
    }
}

/// Outbound operations available to higher layers once the SVC is up.
impl Svc {
    /// Set up a logical connection between two CPorts.
    pub async fn connection_create(
        &self,
        intf1_id: u8,
        cport1_id: u16,
        intf2_id: u8,
        cport2_id: u16,
        boot_over_unipro: bool,
    ) -> Result<()> {
        self.shared
            .connection_create(intf1_id, cport1_id, intf2_id, cport2_id, boot_over_unipro)
            .await
    }

    /// Tear a connection down. Never fails; peer errors are logged.
    pub async fn connection_destroy(
        &self,
        intf1_id: u8,
        cport1_id: u16,
        intf2_id: u8,
        cport2_id: u16,
    ) {
        self.shared
            .connection_destroy(intf1_id, cport1_id, intf2_id, cport2_id)
            .await
    }

    pub async fn dme_peer_get(&self, intf_id: u8, attr: u16, selector: u16) -> Result<u32> {
        self.shared.dme_peer_get(intf_id, attr, selector).await
    }

    pub async fn dme_peer_set(&self, intf_id: u8, attr: u16, selector: u16, value: u32) -> Result<()> {
        self.shared.dme_peer_set(intf_id, attr, selector, value).await
    }

    /// Ask the SVC to reset an interface.
    pub async fn intf_reset(&self, intf_id: u8) -> Result<()> {
        self.shared.intf_reset(intf_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_flags() {
        assert_eq!(connection_flags(false), CPORT_FLAGS_CSV_N | CPORT_FLAGS_E2EFC);
        assert_eq!(connection_flags(true), CPORT_FLAGS_CSV_N | CPORT_FLAGS_CSD_N);
        assert_eq!(connection_flags(true) & CPORT_FLAGS_E2EFC, 0);
    }
}
