//! In-memory loopback fabric.
//!
//! Plays the SVC side of the connection and the host's interface object
//! model, keeps the routing and connection tables the SVC would keep, and
//! can be told to fail any outbound operation or host callback.

use crate::error::{HostError, OperationError};
use crate::host::HostDevice;
use crate::operation::Operations;
use crate::protocol::{
    ConnCreateRequest, ConnDestroyRequest, DME_ATTR_T_TST_SRC_INCREMENT, DmePeerGetRequest,
    DmePeerGetResponse, DmePeerSetRequest, DmePeerSetResponse, HelloRequest, HotUnplugRequest,
    HotplugData, HotplugRequest, IntfDeviceIdRequest, IntfResetRequest, Request,
    RouteCreateRequest, RouteDestroyRequest, VersionRequest, op,
};
use crate::svc::{Interface, Svc};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Operation status returned for injected failures.
const GB_OP_INTERFACE_FAILURE: u8 = 0x04;
/// UniPro result code returned for injected DME failures.
const UNIPRO_RESULT_FAILURE: u16 = 0x01;

/// Host callbacks that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFailure {
    Register,
    InterfaceCreate,
    InterfaceInit,
}

/// A two-way route as seen by the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Route {
    pub intf1_id: u8,
    pub dev1_id: u8,
    pub intf2_id: u8,
    pub dev2_id: u8,
}

#[derive(Debug, Default)]
struct FabricState {
    /// Boot status attribute per plugged-in module.
    boot_status: HashMap<u8, u32>,
    dme_attrs: HashMap<(u8, u16, u16), u32>,
    device_ids: BTreeMap<u8, u8>,
    /// Keyed by the unordered interface pair.
    routes: BTreeMap<(u8, u8), Route>,
    connections: BTreeMap<(u8, u16, u8, u16), u8>,
    resets: Vec<u8>,
    failing_ops: HashSet<u8>,
    dme_result: u16,
    host_failures: HashSet<HostFailure>,
    registered: Option<(u16, u8)>,
    live_interfaces: BTreeSet<u8>,
    removed: Vec<Interface>,
    calls: Vec<u8>,
}

/// Loopback fabric implementing both sides the SVC engine talks to.
#[derive(Debug, Default)]
pub struct LoopbackFabric {
    state: Mutex<FabricState>,
}

fn route_key(a: u8, b: u8) -> (u8, u8) {
    (a.min(b), a.max(b))
}

impl LoopbackFabric {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FabricState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plug a module into a slot with the given boot status.
    pub fn insert_module(&self, intf_id: u8, boot_status: u32) {
        self.lock().boot_status.insert(intf_id, boot_status);
    }

    pub fn boot_status(&self, intf_id: u8) -> Option<u32> {
        self.lock().boot_status.get(&intf_id).copied()
    }

    /// Make every call of `op_type` fail until cleared.
    pub fn fail_op(&self, op_type: u8) {
        self.lock().failing_ops.insert(op_type);
    }

    /// Make DME accesses complete with a non-zero UniPro result.
    pub fn fail_dme_result(&self) {
        self.lock().dme_result = UNIPRO_RESULT_FAILURE;
    }

    pub fn fail_host(&self, failure: HostFailure) {
        self.lock().host_failures.insert(failure);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_ops.clear();
        state.host_failures.clear();
        state.dme_result = 0;
    }

    pub fn route(&self, intf1_id: u8, intf2_id: u8) -> Option<Route> {
        self.lock()
            .routes
            .get(&route_key(intf1_id, intf2_id))
            .copied()
    }

    pub fn has_route(&self, intf1_id: u8, intf2_id: u8) -> bool {
        self.route(intf1_id, intf2_id).is_some()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.lock().routes.values().copied().collect()
    }

    /// Flags of the connection between two CPorts, if it exists.
    pub fn connection_flags(&self, intf1_id: u8, cport1_id: u16, intf2_id: u8, cport2_id: u16) -> Option<u8> {
        self.lock()
            .connections
            .get(&(intf1_id, cport1_id, intf2_id, cport2_id))
            .copied()
    }

    pub fn assigned_device_id(&self, intf_id: u8) -> Option<u8> {
        self.lock().device_ids.get(&intf_id).copied()
    }

    pub fn resets(&self) -> Vec<u8> {
        self.lock().resets.clone()
    }

    pub fn registered(&self) -> Option<(u16, u8)> {
        self.lock().registered
    }

    /// Interface objects currently alive on the host side.
    pub fn live_interfaces(&self) -> Vec<u8> {
        self.lock().live_interfaces.iter().copied().collect()
    }

    /// Interface records handed back through `interface_remove`, in order.
    pub fn removed_interfaces(&self) -> Vec<Interface> {
        self.lock().removed.clone()
    }

    /// Outbound operation types, in call order.
    pub fn calls(&self) -> Vec<u8> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op_type: u8) -> usize {
        self.lock().calls.iter().filter(|t| **t == op_type).count()
    }

    fn handle(&self, op_type: u8, request: &[u8]) -> Result<Vec<u8>, OperationError> {
        let mut state = self.lock();
        state.calls.push(op_type);

        if state.failing_ops.contains(&op_type) {
            debug!(op_type, "loopback: injected failure");
            return Err(OperationError::Rejected(GB_OP_INTERFACE_FAILURE));
        }

        let invalid = |_| OperationError::Rejected(GB_OP_INTERFACE_FAILURE);

        match op_type {
            op::INTF_DEVICE_ID => {
                let req = IntfDeviceIdRequest::decode(request).map_err(invalid)?;
                state.device_ids.insert(req.intf_id, req.device_id);
                Ok(Vec::new())
            }
            op::INTF_RESET => {
                let req = IntfResetRequest::decode(request).map_err(invalid)?;
                state.resets.push(req.intf_id);
                Ok(Vec::new())
            }
            op::DME_PEER_GET => {
                let req = DmePeerGetRequest::decode(request).map_err(invalid)?;
                let attr_value = if req.attr == DME_ATTR_T_TST_SRC_INCREMENT {
                    state.boot_status.get(&req.intf_id).copied().unwrap_or(0)
                } else {
                    state
                        .dme_attrs
                        .get(&(req.intf_id, req.attr, req.selector))
                        .copied()
                        .unwrap_or(0)
                };
                Ok(DmePeerGetResponse {
                    result_code: state.dme_result,
                    attr_value,
                }
                .encode())
            }
            op::DME_PEER_SET => {
                let req = DmePeerSetRequest::decode(request).map_err(invalid)?;
                if state.dme_result == 0 {
                    if req.attr == DME_ATTR_T_TST_SRC_INCREMENT {
                        state.boot_status.insert(req.intf_id, req.value);
                    } else {
                        state
                            .dme_attrs
                            .insert((req.intf_id, req.attr, req.selector), req.value);
                    }
                }
                Ok(DmePeerSetResponse {
                    result_code: state.dme_result,
                }
                .encode())
            }
            op::ROUTE_CREATE => {
                let req = RouteCreateRequest::decode(request).map_err(invalid)?;
                let route = Route {
                    intf1_id: req.intf1_id,
                    dev1_id: req.dev1_id,
                    intf2_id: req.intf2_id,
                    dev2_id: req.dev2_id,
                };
                state
                    .routes
                    .insert(route_key(req.intf1_id, req.intf2_id), route);
                Ok(Vec::new())
            }
            op::ROUTE_DESTROY => {
                let req = RouteDestroyRequest::decode(request).map_err(invalid)?;
                state
                    .routes
                    .remove(&route_key(req.intf1_id, req.intf2_id))
                    .map(|_| Vec::new())
                    .ok_or(OperationError::Rejected(GB_OP_INTERFACE_FAILURE))
            }
            op::CONN_CREATE => {
                let req = ConnCreateRequest::decode(request).map_err(invalid)?;
                state.connections.insert(
                    (req.intf1_id, req.cport1_id, req.intf2_id, req.cport2_id),
                    req.flags,
                );
                Ok(Vec::new())
            }
            op::CONN_DESTROY => {
                let req = ConnDestroyRequest::decode(request).map_err(invalid)?;
                state
                    .connections
                    .remove(&(req.intf1_id, req.cport1_id, req.intf2_id, req.cport2_id))
                    .map(|_| Vec::new())
                    .ok_or(OperationError::Rejected(GB_OP_INTERFACE_FAILURE))
            }
            _ => Err(OperationError::Rejected(GB_OP_INTERFACE_FAILURE)),
        }
    }

    fn host_fails(&self, failure: HostFailure) -> Result<(), HostError> {
        if self.lock().host_failures.contains(&failure) {
            return Err(HostError(format!("injected {failure:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl Operations for LoopbackFabric {
    async fn call(
        &self,
        op_type: u8,
        request: Vec<u8>,
        response_size: usize,
    ) -> Result<Vec<u8>, OperationError> {
        let response = self.handle(op_type, &request)?;
        if response.len() < response_size {
            return Err(OperationError::ShortResponse {
                expected: response_size,
                actual: response.len(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HostDevice for LoopbackFabric {
    async fn register_svc(&self, endo_id: u16, ap_intf_id: u8) -> Result<(), HostError> {
        self.host_fails(HostFailure::Register)?;
        self.lock().registered = Some((endo_id, ap_intf_id));
        Ok(())
    }

    async fn unregister_svc(&self) {
        self.lock().registered = None;
    }

    async fn interface_create(&self, intf_id: u8) -> Result<(), HostError> {
        self.host_fails(HostFailure::InterfaceCreate)?;
        let mut state = self.lock();
        if !state.live_interfaces.insert(intf_id) {
            return Err(HostError(format!("interface {intf_id} already exists")));
        }
        Ok(())
    }

    async fn interface_init(&self, intf: &Interface, _device_id: u8) -> Result<(), HostError> {
        self.host_fails(HostFailure::InterfaceInit)?;
        if !self.lock().live_interfaces.contains(&intf.interface_id) {
            return Err(HostError(format!(
                "interface {} was never created",
                intf.interface_id
            )));
        }
        Ok(())
    }

    async fn interface_remove(&self, intf: &Interface) {
        let mut state = self.lock();
        state.live_interfaces.remove(&intf.interface_id);
        state.removed.push(intf.clone());
    }
}

/// One step of a scripted session, as the SVC would send it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Version {
        major: u8,
        minor: u8,
    },
    Hello {
        endo_id: u16,
        interface_id: u8,
    },
    Hotplug {
        intf_id: u8,
        #[serde(default)]
        unipro_mfg_id: u32,
        #[serde(default)]
        unipro_prod_id: u32,
        #[serde(default)]
        vendor_id: u32,
        #[serde(default)]
        product_id: u32,
    },
    HotUnplug {
        intf_id: u8,
        #[serde(default)]
        attach_state: u8,
    },
    Reset {
        intf_id: u8,
    },
    /// Plug a module into the loopback fabric; not sent to the engine.
    Module {
        intf_id: u8,
        boot_status: u32,
    },
}

impl Step {
    /// The request this step delivers, if it is one.
    pub fn request(&self) -> Option<Request> {
        let request = match self {
            Step::Version { major, minor } => Request::ProtocolVersion(VersionRequest {
                major: *major,
                minor: *minor,
            }),
            Step::Hello {
                endo_id,
                interface_id,
            } => Request::Hello(HelloRequest {
                endo_id: *endo_id,
                interface_id: *interface_id,
            }),
            Step::Hotplug {
                intf_id,
                unipro_mfg_id,
                unipro_prod_id,
                vendor_id,
                product_id,
            } => Request::IntfHotplug(HotplugRequest {
                intf_id: *intf_id,
                data: HotplugData {
                    unipro_mfg_id: *unipro_mfg_id,
                    unipro_prod_id: *unipro_prod_id,
                    ara_vend_id: *vendor_id,
                    ara_prod_id: *product_id,
                },
            }),
            Step::HotUnplug {
                intf_id,
                attach_state,
            } => Request::IntfHotUnplug(HotUnplugRequest {
                intf_id: *intf_id,
                attach_state: *attach_state,
            }),
            Step::Reset { intf_id } => Request::IntfReset(IntfResetRequest { intf_id: *intf_id }),
            Step::Module { .. } => return None,
        };
        Some(request)
    }
}

/// A scripted session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// What happened to one delivered request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub op_type: u8,
    pub response: Vec<u8>,
    pub error: Option<String>,
}

/// Deliver every step to `svc` in order, then wait for deferred work.
pub async fn run_scenario(svc: &Svc, fabric: &LoopbackFabric, scenario: &Scenario) -> Vec<StepOutcome> {
    let mut outcomes = Vec::new();

    for step in &scenario.steps {
        if let Step::Module {
            intf_id,
            boot_status,
        } = step
        {
            fabric.insert_module(*intf_id, *boot_status);
            continue;
        }

        let Some(request) = step.request() else {
            continue;
        };
        let op_type = request.request_type().as_u8();
        let outcome = match svc.handle_request(op_type, &request.encode()).await {
            Ok(response) => StepOutcome {
                op_type,
                response,
                error: None,
            },
            Err(e) => StepOutcome {
                op_type,
                response: Vec::new(),
                error: Some(e.to_string()),
            },
        };
        outcomes.push(outcome);
    }

    // Surface the results of trailing hotplugs.
    let _ = svc.flush().await;
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_route_table_is_unordered() {
        let fabric = LoopbackFabric::new();
        let req = RouteCreateRequest {
            intf1_id: 2,
            dev1_id: 1,
            intf2_id: 5,
            dev2_id: 2,
        };
        fabric.call(op::ROUTE_CREATE, req.encode(), 0).await.unwrap();
        assert!(fabric.has_route(5, 2));

        let destroy = RouteDestroyRequest {
            intf1_id: 2,
            intf2_id: 5,
        };
        fabric.call(op::ROUTE_DESTROY, destroy.encode(), 0).await.unwrap();
        assert!(!fabric.has_route(2, 5));
        assert!(fabric.call(op::ROUTE_DESTROY, destroy.encode(), 0).await.is_err());
    }

    #[tokio::test]
    async fn test_boot_status_read_and_clear() {
        let fabric = LoopbackFabric::new();
        fabric.insert_module(5, 0x06);

        let get = DmePeerGetRequest {
            intf_id: 5,
            attr: DME_ATTR_T_TST_SRC_INCREMENT,
            selector: 0,
        };
        let resp = fabric.call(op::DME_PEER_GET, get.encode(), 6).await.unwrap();
        assert_eq!(DmePeerGetResponse::decode(&resp).attr_value, 0x06);

        let set = DmePeerSetRequest {
            intf_id: 5,
            attr: DME_ATTR_T_TST_SRC_INCREMENT,
            selector: 0,
            value: 0,
        };
        fabric.call(op::DME_PEER_SET, set.encode(), 2).await.unwrap();
        assert_eq!(fabric.boot_status(5), Some(0));
    }

    #[test]
    fn test_scenario_parsing() {
        let json = r#"{
            "steps": [
                { "op": "version", "major": 1, "minor": 0 },
                { "op": "hello", "endo_id": 66, "interface_id": 2 },
                { "op": "module", "intf_id": 5, "boot_status": 1 },
                { "op": "hotplug", "intf_id": 5, "vendor_id": 18 },
                { "op": "hot_unplug", "intf_id": 5 }
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(
            scenario.steps[4],
            Step::HotUnplug {
                intf_id: 5,
                attach_state: 0
            }
        );
        assert!(scenario.steps[2].request().is_none());
        assert_eq!(
            scenario.steps[3].request().unwrap().request_type().as_u8(),
            op::INTF_HOTPLUG
        );
    }
}
