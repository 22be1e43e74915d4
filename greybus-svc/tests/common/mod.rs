//! Test helpers for greybus-svc integration tests.

#![allow(dead_code)]

use greybus_svc::protocol::{
    HelloRequest, HotUnplugRequest, HotplugData, HotplugRequest, VersionRequest, op,
};
use greybus_svc::sim::LoopbackFabric;
use greybus_svc::{Config, Result, Svc, SvcEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const ENDO_ID: u16 = 0x0042;
pub const AP_INTF_ID: u8 = 2;

/// Boot status of a module that finished booting normally.
pub const BOOT_STATUS_READY: u32 = 0x01;

/// An SVC wired to a loopback fabric.
pub struct TestSvc {
    pub svc: Svc,
    pub fabric: Arc<LoopbackFabric>,
}

impl TestSvc {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let fabric = Arc::new(LoopbackFabric::new());
        let svc = Svc::new(config, fabric.clone(), fabric.clone()).expect("valid config");
        Self { svc, fabric }
    }

    /// A test SVC that already completed version and hello.
    pub async fn operational() -> Self {
        let test = Self::new();
        test.handshake().await;
        test
    }

    pub async fn handshake(&self) {
        self.version(1, 0).await.expect("version accepted");
        self.hello(ENDO_ID, AP_INTF_ID).await.expect("hello accepted");
    }

    pub async fn version(&self, major: u8, minor: u8) -> Result<Vec<u8>> {
        let req = VersionRequest { major, minor };
        self.svc
            .handle_request(op::PROTOCOL_VERSION, &req.encode())
            .await
    }

    pub async fn hello(&self, endo_id: u16, interface_id: u8) -> Result<Vec<u8>> {
        let req = HelloRequest {
            endo_id,
            interface_id,
        };
        self.svc.handle_request(op::SVC_HELLO, &req.encode()).await
    }

    /// Deliver a hotplug without waiting for the deferred worker.
    pub async fn hotplug(&self, intf_id: u8) -> Result<Vec<u8>> {
        let req = HotplugRequest {
            intf_id,
            data: HotplugData {
                unipro_mfg_id: 0x126,
                unipro_prod_id: 0x1000,
                ara_vend_id: 0xfeed,
                ara_prod_id: u32::from(intf_id),
            },
        };
        self.svc
            .handle_request(op::INTF_HOTPLUG, &req.encode())
            .await
    }

    /// Deliver a hotplug and wait until the worker processed it.
    pub async fn hotplug_and_wait(&self, intf_id: u8) {
        self.hotplug(intf_id).await.expect("hotplug queued");
        self.svc.flush().await.expect("queue open");
    }

    /// Plug a ready module and hotplug it.
    pub async fn add_module(&self, intf_id: u8) {
        self.fabric.insert_module(intf_id, BOOT_STATUS_READY);
        self.hotplug_and_wait(intf_id).await;
    }

    pub async fn hot_unplug(&self, intf_id: u8, attach_state: u8) -> Result<Vec<u8>> {
        let req = HotUnplugRequest {
            intf_id,
            attach_state,
        };
        self.svc
            .handle_request(op::INTF_HOT_UNPLUG, &req.encode())
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SvcEvent> {
        self.svc.subscribe()
    }

    /// Assert no device id is held and the AP has no route to `intf_id`.
    pub fn assert_no_leaks(&self, intf_id: u8) {
        assert_eq!(self.svc.device_ids().allocated_count(), 0);
        assert!(!self.fabric.has_route(AP_INTF_ID, intf_id));
    }
}

/// Drain the events received so far.
pub fn drain_events(rx: &mut broadcast::Receiver<SvcEvent>) -> Vec<SvcEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// The error of the first failed hotplug among the received events.
pub fn hotplug_error(rx: &mut broadcast::Receiver<SvcEvent>) -> Option<greybus_svc::SvcError> {
    drain_events(rx).into_iter().find_map(|event| match event {
        SvcEvent::HotplugFailed { error, .. } => Some(error),
        _ => None,
    })
}
