//! SVC context: handshake state, interface bookkeeping and the deferred
//! worker that provisions interfaces.
//!
//! Inbound requests are handed to [`Svc::handle_request`] one at a time by
//! the operation substrate. Version and hello are answered inline; hotplug
//! and hot-unplug are queued for the deferred worker so that a slow module
//! bring-up never blocks the control connection.
//!
//! Inline requests are ordered among themselves and deferred requests are
//! ordered among themselves, but an inline request may complete before a
//! deferred one that arrived earlier. That reordering is accepted.

mod deferred;
mod dispatcher;
mod ida;
mod interface;
mod route;
mod worker;

pub use deferred::{DeferredHandler, DeferredQueue, DeferredRequest};
pub use ida::DeviceIdAllocator;
pub use interface::{Interface, InterfaceTable};

use crate::config::{Config, ConfigError};
use crate::error::{Result, SvcError};
use crate::host::HostDevice;
use crate::operation::Operations;
use crate::protocol::{RequestType, VersionRequest};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Handshake progress. Transitions only move forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SvcState {
    Reset,
    VersionNegotiated,
    HelloReceived,
    Operational,
}

impl SvcState {
    pub fn next(self) -> Option<SvcState> {
        match self {
            SvcState::Reset => Some(SvcState::VersionNegotiated),
            SvcState::VersionNegotiated => Some(SvcState::HelloReceived),
            SvcState::HelloReceived => Some(SvcState::Operational),
            SvcState::Operational => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SvcState::Reset => "reset",
            SvcState::VersionNegotiated => "version_negotiated",
            SvcState::HelloReceived => "hello_received",
            SvcState::Operational => "operational",
        }
    }
}

impl fmt::Display for SvcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide whether a request of `request` type may be handled in `state`.
///
/// Version negotiation is only accepted in `Reset`, hello only right after
/// it, and everything else only once operational.
pub fn check_request(state: SvcState, request: RequestType) -> Result<()> {
    let expected = match request {
        RequestType::ProtocolVersion => SvcState::Reset,
        RequestType::Hello => SvcState::VersionNegotiated,
        _ => SvcState::Operational,
    };

    if state != expected {
        return Err(SvcError::ProtocolViolation {
            op_type: request.as_u8(),
            state,
        });
    }
    Ok(())
}

/// Read-only diagnostic attributes, available once hello was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SvcAttributes {
    pub endo_id: u16,
    pub ap_intf_id: u8,
}

impl fmt::Display for SvcAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "endo_id=0x{:04x} ap_intf_id={}",
            self.endo_id, self.ap_intf_id
        )
    }
}

/// Notifications about interface lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SvcEvent {
    InterfaceAdded { intf_id: u8, device_id: u8 },
    InterfaceRemoved { intf_id: u8, device_id: Option<u8> },
    HotplugFailed { intf_id: u8, error: SvcError },
}

#[derive(Debug)]
struct Handshake {
    state: SvcState,
    version: Option<VersionRequest>,
    attributes: Option<SvcAttributes>,
}

/// State shared between the dispatch path and the deferred worker.
pub struct SvcShared {
    name: String,
    config: Config,
    handshake: Mutex<Handshake>,
    device_ids: DeviceIdAllocator,
    interfaces: InterfaceTable,
    connection: Arc<dyn Operations>,
    host: Arc<dyn HostDevice>,
    event_tx: broadcast::Sender<SvcEvent>,
}

impl SvcShared {
    fn handshake(&self) -> std::sync::MutexGuard<'_, Handshake> {
        self.handshake
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SvcState {
        self.handshake().state
    }

    /// Move to `to`, which must be the direct successor of `from`.
    fn advance(&self, from: SvcState, to: SvcState) {
        let mut handshake = self.handshake();
        debug_assert_eq!(handshake.state, from);
        debug_assert_eq!(from.next(), Some(to));
        handshake.state = to;
        info!(svc = %self.name, "state {} -> {}", from, to);
    }

    /// The AP's interface id as announced in hello.
    fn ap_intf_id(&self) -> u8 {
        self.handshake()
            .attributes
            .map(|attrs| attrs.ap_intf_id)
            .unwrap_or_default()
    }

    fn emit(&self, event: SvcEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Return a device id to the pool; freeing an unowned id is a bug.
    fn release_device_id(&self, device_id: u8) {
        let result = self.device_ids.free(device_id);
        if let Err(err) = &result {
            error!(svc = %self.name, device_id, "{err}");
        }
        debug_assert!(result.is_ok(), "device id {device_id} double free");
    }
}

/// One SVC instance, owned by the host device driver.
pub struct Svc {
    shared: Arc<SvcShared>,
    queue: DeferredQueue,
    released: AtomicBool,
}

impl Svc {
    /// Create the SVC and start its deferred worker.
    ///
    /// Fails if `config` does not validate. Must be called from within a
    /// tokio runtime.
    pub fn new(
        config: Config,
        connection: Arc<dyn Operations>,
        host: Arc<dyn HostDevice>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let name = format!("{}-svc", config.bus_id);
        let (event_tx, _) = broadcast::channel(64);

        let shared = Arc::new(SvcShared {
            device_ids: DeviceIdAllocator::new(config.device_id_start, config.device_id_bad),
            name: name.clone(),
            config,
            handshake: Mutex::new(Handshake {
                state: SvcState::Reset,
                version: None,
                attributes: None,
            }),
            interfaces: InterfaceTable::new(),
            connection,
            host,
            event_tx,
        });

        let queue = DeferredQueue::spawn(format!("{name}:wq"), shared.clone());
        info!(svc = %name, "SVC created");

        Ok(Self {
            shared,
            queue,
            released: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> SvcState {
        self.shared.state()
    }

    /// Version numbers the SVC asked for, once negotiated.
    pub fn negotiated_version(&self) -> Option<VersionRequest> {
        self.shared.handshake().version
    }

    /// Fabric id and AP interface id; `None` before hello.
    pub fn attributes(&self) -> Option<SvcAttributes> {
        self.shared.handshake().attributes
    }

    pub fn interface(&self, intf_id: u8) -> Option<Interface> {
        self.shared.interfaces.get(intf_id)
    }

    pub fn interfaces(&self) -> Vec<Interface> {
        self.shared.interfaces.snapshot()
    }

    pub fn device_ids(&self) -> &DeviceIdAllocator {
        &self.shared.device_ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SvcEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Wait until every request queued before this call was processed.
    pub async fn flush(&self) -> Result<()> {
        self.queue.flush().await
    }

    /// Tear the SVC down.
    ///
    /// Withdraws the SVC device, processes every queued request to
    /// completion, removes the interfaces that are still present and
    /// invalidates the device id space. Requests are rejected from the
    /// moment this is called. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.shared.state() >= SvcState::HelloReceived {
            self.shared.host.unregister_svc().await;
        }

        self.queue.shutdown().await;

        for intf in self.shared.interfaces.snapshot() {
            self.shared.intf_remove(intf, false).await;
        }

        let leaked = self.shared.device_ids.drain();
        if !leaked.is_empty() {
            warn!(svc = %self.shared.name, ?leaked, "device ids still allocated at teardown");
        }
        info!(svc = %self.shared.name, "SVC released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [SvcState; 4] = [
        SvcState::Reset,
        SvcState::VersionNegotiated,
        SvcState::HelloReceived,
        SvcState::Operational,
    ];

    #[test]
    fn test_only_version_accepted_in_reset() {
        let types = [
            RequestType::Hello,
            RequestType::IntfHotplug,
            RequestType::IntfHotUnplug,
            RequestType::IntfReset,
            RequestType::Other(0x42),
        ];
        for ty in types {
            assert_eq!(
                check_request(SvcState::Reset, ty),
                Err(SvcError::ProtocolViolation {
                    op_type: ty.as_u8(),
                    state: SvcState::Reset,
                })
            );
        }
        assert!(check_request(SvcState::Reset, RequestType::ProtocolVersion).is_ok());
    }

    #[test]
    fn test_each_type_has_exactly_one_state() {
        let types = [
            RequestType::ProtocolVersion,
            RequestType::Hello,
            RequestType::IntfHotplug,
            RequestType::IntfReset,
        ];
        for ty in types {
            let accepted = ALL_STATES
                .iter()
                .filter(|state| check_request(**state, ty).is_ok())
                .count();
            assert_eq!(accepted, 1, "{ty:?}");
        }
    }

    #[test]
    fn test_version_and_hello_rejected_once_operational() {
        assert!(check_request(SvcState::Operational, RequestType::ProtocolVersion).is_err());
        assert!(check_request(SvcState::Operational, RequestType::Hello).is_err());
        assert!(check_request(SvcState::Operational, RequestType::IntfHotUnplug).is_ok());
        // Hello received but not yet operational: nothing is accepted.
        for ty in [RequestType::ProtocolVersion, RequestType::Hello, RequestType::IntfHotplug] {
            assert!(check_request(SvcState::HelloReceived, ty).is_err());
        }
    }

    #[test]
    fn test_states_only_move_forward() {
        let mut state = SvcState::Reset;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state);
            state = next;
            seen.push(state);
        }
        assert_eq!(seen, ALL_STATES.to_vec());
    }

    #[test]
    fn test_attributes_format() {
        let attrs = SvcAttributes {
            endo_id: 0x42,
            ap_intf_id: 2,
        };
        assert_eq!(attrs.to_string(), "endo_id=0x0042 ap_intf_id=2");
    }
}
