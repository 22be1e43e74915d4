//! SVC protocol wire definitions.
//!
//! Every message body is a packed little-endian struct. Decoders check the
//! payload length against the struct size and ignore trailing bytes.

use crate::error::{Result, SvcError};

/// Major protocol version implemented by this engine.
pub const SVC_VERSION_MAJOR: u8 = 1;
/// Minor protocol version implemented by this engine.
pub const SVC_VERSION_MINOR: u8 = 1;

/// Device id owned by the SVC itself.
pub const DEVICE_ID_SVC: u8 = 0;
/// Device id owned by the AP host.
pub const DEVICE_ID_AP: u8 = 1;
/// First device id handed out to modules.
pub const DEVICE_ID_MODULES_START: u8 = 2;
/// First device id that may never be assigned.
pub const DEVICE_ID_BAD: u8 = 0xff;

/// Module boot status, written by the module bootrom.
pub const DME_ATTR_T_TST_SRC_INCREMENT: u16 = 0x4083;
pub const DME_ATTR_SELECTOR_INDEX: u16 = 0;
pub const DME_TSI_UNIPRO_BOOT_STARTED: u32 = 0x06;
pub const DME_TSI_FALLBACK_UNIPRO_BOOT_STARTED: u32 = 0x09;

pub const CPORT_FLAGS_E2EFC: u8 = 1 << 0;
pub const CPORT_FLAGS_CSD_N: u8 = 1 << 1;
pub const CPORT_FLAGS_CSV_N: u8 = 1 << 2;

/// `attach_state` value of a hot-unplug for a module that is still attached.
pub const INTF_ATTACHED: u8 = 1;

/// SVC operation type ids.
pub mod op {
    pub const PROTOCOL_VERSION: u8 = 0x01;
    pub const SVC_HELLO: u8 = 0x02;
    pub const INTF_DEVICE_ID: u8 = 0x03;
    pub const INTF_HOTPLUG: u8 = 0x04;
    pub const INTF_HOT_UNPLUG: u8 = 0x05;
    pub const INTF_RESET: u8 = 0x06;
    pub const CONN_CREATE: u8 = 0x07;
    pub const CONN_DESTROY: u8 = 0x08;
    pub const DME_PEER_GET: u8 = 0x09;
    pub const DME_PEER_SET: u8 = 0x0a;
    pub const ROUTE_CREATE: u8 = 0x0b;
    pub const ROUTE_DESTROY: u8 = 0x0c;
}

/// Closed set of request types the SVC sends to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    ProtocolVersion,
    Hello,
    IntfHotplug,
    IntfHotUnplug,
    IntfReset,
    /// Anything else; gated like a regular request, then rejected.
    Other(u8),
}

impl RequestType {
    pub fn from_u8(op_type: u8) -> Self {
        match op_type {
            op::PROTOCOL_VERSION => RequestType::ProtocolVersion,
            op::SVC_HELLO => RequestType::Hello,
            op::INTF_HOTPLUG => RequestType::IntfHotplug,
            op::INTF_HOT_UNPLUG => RequestType::IntfHotUnplug,
            op::INTF_RESET => RequestType::IntfReset,
            other => RequestType::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            RequestType::ProtocolVersion => op::PROTOCOL_VERSION,
            RequestType::Hello => op::SVC_HELLO,
            RequestType::IntfHotplug => op::INTF_HOTPLUG,
            RequestType::IntfHotUnplug => op::INTF_HOT_UNPLUG,
            RequestType::IntfReset => op::INTF_RESET,
            RequestType::Other(other) => *other,
        }
    }
}

/// Decoded inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ProtocolVersion(VersionRequest),
    Hello(HelloRequest),
    IntfHotplug(HotplugRequest),
    IntfHotUnplug(HotUnplugRequest),
    IntfReset(IntfResetRequest),
}

impl Request {
    /// Decode an inbound payload of the given type.
    pub fn decode(op_type: u8, payload: &[u8]) -> Result<Self> {
        match RequestType::from_u8(op_type) {
            RequestType::ProtocolVersion => {
                VersionRequest::decode(payload).map(Request::ProtocolVersion)
            }
            RequestType::Hello => HelloRequest::decode(payload).map(Request::Hello),
            RequestType::IntfHotplug => HotplugRequest::decode(payload).map(Request::IntfHotplug),
            RequestType::IntfHotUnplug => {
                HotUnplugRequest::decode(payload).map(Request::IntfHotUnplug)
            }
            RequestType::IntfReset => IntfResetRequest::decode(payload).map(Request::IntfReset),
            RequestType::Other(other) => Err(SvcError::UnsupportedRequest(other)),
        }
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            Request::ProtocolVersion(_) => RequestType::ProtocolVersion,
            Request::Hello(_) => RequestType::Hello,
            Request::IntfHotplug(_) => RequestType::IntfHotplug,
            Request::IntfHotUnplug(_) => RequestType::IntfHotUnplug,
            Request::IntfReset(_) => RequestType::IntfReset,
        }
    }

    /// Encode back to the wire, as the SVC would send it.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::ProtocolVersion(r) => r.encode(),
            Request::Hello(r) => r.encode(),
            Request::IntfHotplug(r) => r.encode(),
            Request::IntfHotUnplug(r) => r.encode(),
            Request::IntfReset(r) => r.encode(),
        }
    }
}

fn check_len(op_type: u8, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() < expected {
        return Err(SvcError::InvalidPayload {
            op_type,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn le16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRequest {
    pub major: u8,
    pub minor: u8,
}

impl VersionRequest {
    pub const SIZE: usize = 2;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::PROTOCOL_VERSION, payload, Self::SIZE)?;
        Ok(Self {
            major: payload[0],
            minor: payload[1],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.major, self.minor]
    }
}

/// The response has the same layout as the request.
pub type VersionResponse = VersionRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloRequest {
    pub endo_id: u16,
    pub interface_id: u8,
}

impl HelloRequest {
    pub const SIZE: usize = 3;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::SVC_HELLO, payload, Self::SIZE)?;
        Ok(Self {
            endo_id: le16(payload, 0),
            interface_id: payload[2],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.endo_id.to_le_bytes());
        buf.push(self.interface_id);
        buf
    }
}

/// Identification data carried by a hotplug event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HotplugData {
    pub unipro_mfg_id: u32,
    pub unipro_prod_id: u32,
    pub ara_vend_id: u32,
    pub ara_prod_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotplugRequest {
    pub intf_id: u8,
    pub data: HotplugData,
}

impl HotplugRequest {
    pub const SIZE: usize = 17;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::INTF_HOTPLUG, payload, Self::SIZE)?;
        Ok(Self {
            intf_id: payload[0],
            data: HotplugData {
                unipro_mfg_id: le32(payload, 1),
                unipro_prod_id: le32(payload, 5),
                ara_vend_id: le32(payload, 9),
                ara_prod_id: le32(payload, 13),
            },
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(self.intf_id);
        buf.extend_from_slice(&self.data.unipro_mfg_id.to_le_bytes());
        buf.extend_from_slice(&self.data.unipro_prod_id.to_le_bytes());
        buf.extend_from_slice(&self.data.ara_vend_id.to_le_bytes());
        buf.extend_from_slice(&self.data.ara_prod_id.to_le_bytes());
        buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotUnplugRequest {
    pub intf_id: u8,
    pub attach_state: u8,
}

impl HotUnplugRequest {
    pub const SIZE: usize = 2;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::INTF_HOT_UNPLUG, payload, Self::SIZE)?;
        Ok(Self {
            intf_id: payload[0],
            attach_state: payload[1],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.intf_id, self.attach_state]
    }

    pub fn attached(&self) -> bool {
        self.attach_state == INTF_ATTACHED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntfResetRequest {
    pub intf_id: u8,
}

impl IntfResetRequest {
    pub const SIZE: usize = 1;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::INTF_RESET, payload, Self::SIZE)?;
        Ok(Self {
            intf_id: payload[0],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.intf_id]
    }
}

// Outbound requests. Only the SVC-side decoders are needed by the loopback
// fabric, so each struct carries both directions.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntfDeviceIdRequest {
    pub intf_id: u8,
    pub device_id: u8,
}

impl IntfDeviceIdRequest {
    pub const SIZE: usize = 2;

    pub fn encode(&self) -> Vec<u8> {
        vec![self.intf_id, self.device_id]
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::INTF_DEVICE_ID, payload, Self::SIZE)?;
        Ok(Self {
            intf_id: payload[0],
            device_id: payload[1],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnCreateRequest {
    pub intf1_id: u8,
    pub cport1_id: u16,
    pub intf2_id: u8,
    pub cport2_id: u16,
    pub tc: u8,
    pub flags: u8,
}

impl ConnCreateRequest {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(self.intf1_id);
        buf.extend_from_slice(&self.cport1_id.to_le_bytes());
        buf.push(self.intf2_id);
        buf.extend_from_slice(&self.cport2_id.to_le_bytes());
        buf.push(self.tc);
        buf.push(self.flags);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::CONN_CREATE, payload, Self::SIZE)?;
        Ok(Self {
            intf1_id: payload[0],
            cport1_id: le16(payload, 1),
            intf2_id: payload[3],
            cport2_id: le16(payload, 4),
            tc: payload[6],
            flags: payload[7],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnDestroyRequest {
    pub intf1_id: u8,
    pub cport1_id: u16,
    pub intf2_id: u8,
    pub cport2_id: u16,
}

impl ConnDestroyRequest {
    pub const SIZE: usize = 6;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(self.intf1_id);
        buf.extend_from_slice(&self.cport1_id.to_le_bytes());
        buf.push(self.intf2_id);
        buf.extend_from_slice(&self.cport2_id.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::CONN_DESTROY, payload, Self::SIZE)?;
        Ok(Self {
            intf1_id: payload[0],
            cport1_id: le16(payload, 1),
            intf2_id: payload[3],
            cport2_id: le16(payload, 4),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmePeerGetRequest {
    pub intf_id: u8,
    pub attr: u16,
    pub selector: u16,
}

impl DmePeerGetRequest {
    pub const SIZE: usize = 5;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(self.intf_id);
        buf.extend_from_slice(&self.attr.to_le_bytes());
        buf.extend_from_slice(&self.selector.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::DME_PEER_GET, payload, Self::SIZE)?;
        Ok(Self {
            intf_id: payload[0],
            attr: le16(payload, 1),
            selector: le16(payload, 3),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmePeerGetResponse {
    pub result_code: u16,
    pub attr_value: u32,
}

impl DmePeerGetResponse {
    pub const SIZE: usize = 6;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.result_code.to_le_bytes());
        buf.extend_from_slice(&self.attr_value.to_le_bytes());
        buf
    }

    /// Caller guarantees `payload.len() >= SIZE`.
    pub fn decode(payload: &[u8]) -> Self {
        Self {
            result_code: le16(payload, 0),
            attr_value: le32(payload, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmePeerSetRequest {
    pub intf_id: u8,
    pub attr: u16,
    pub selector: u16,
    pub value: u32,
}

impl DmePeerSetRequest {
    pub const SIZE: usize = 9;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(self.intf_id);
        buf.extend_from_slice(&self.attr.to_le_bytes());
        buf.extend_from_slice(&self.selector.to_le_bytes());
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::DME_PEER_SET, payload, Self::SIZE)?;
        Ok(Self {
            intf_id: payload[0],
            attr: le16(payload, 1),
            selector: le16(payload, 3),
            value: le32(payload, 5),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmePeerSetResponse {
    pub result_code: u16,
}

impl DmePeerSetResponse {
    pub const SIZE: usize = 2;

    pub fn encode(&self) -> Vec<u8> {
        self.result_code.to_le_bytes().to_vec()
    }

    /// Caller guarantees `payload.len() >= SIZE`.
    pub fn decode(payload: &[u8]) -> Self {
        Self {
            result_code: le16(payload, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteCreateRequest {
    pub intf1_id: u8,
    pub dev1_id: u8,
    pub intf2_id: u8,
    pub dev2_id: u8,
}

impl RouteCreateRequest {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> Vec<u8> {
        vec![self.intf1_id, self.dev1_id, self.intf2_id, self.dev2_id]
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::ROUTE_CREATE, payload, Self::SIZE)?;
        Ok(Self {
            intf1_id: payload[0],
            dev1_id: payload[1],
            intf2_id: payload[2],
            dev2_id: payload[3],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDestroyRequest {
    pub intf1_id: u8,
    pub intf2_id: u8,
}

impl RouteDestroyRequest {
    pub const SIZE: usize = 2;

    pub fn encode(&self) -> Vec<u8> {
        vec![self.intf1_id, self.intf2_id]
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(op::ROUTE_DESTROY, payload, Self::SIZE)?;
        Ok(Self {
            intf1_id: payload[0],
            intf2_id: payload[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hotplug_layout() {
        let payload = [
            5, // intf_id
            0x26, 0x01, 0x00, 0x00, // unipro_mfg_id
            0x00, 0x10, 0x00, 0x00, // unipro_prod_id
            0x01, 0x00, 0x00, 0x00, // ara_vend_id
            0x02, 0x00, 0x00, 0x00, // ara_prod_id
        ];
        let req = HotplugRequest::decode(&payload).unwrap();
        assert_eq!(req.intf_id, 5);
        assert_eq!(req.data.unipro_mfg_id, 0x126);
        assert_eq!(req.data.unipro_prod_id, 0x1000);
        assert_eq!(req.data.ara_vend_id, 1);
        assert_eq!(req.data.ara_prod_id, 2);
        assert_eq!(req.encode(), payload.to_vec());
    }

    #[test]
    fn test_hello_is_little_endian() {
        let req = HelloRequest::decode(&[0x42, 0x00, 2]).unwrap();
        assert_eq!(req.endo_id, 0x0042);
        assert_eq!(req.interface_id, 2);
    }

    #[test]
    fn test_short_payload_rejected() {
        let err = HotplugRequest::decode(&[5, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            SvcError::InvalidPayload {
                op_type: op::INTF_HOTPLUG,
                expected: 17,
                actual: 3,
            }
        );
        assert!(HelloRequest::decode(&[]).is_err());
        assert!(HotUnplugRequest::decode(&[5]).is_err());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let req = VersionRequest::decode(&[1, 0, 0xaa, 0xbb]).unwrap();
        assert_eq!(req, VersionRequest { major: 1, minor: 0 });
    }

    #[test]
    fn test_unknown_type_decodes_to_unsupported() {
        assert_eq!(
            Request::decode(0x42, &[]).unwrap_err(),
            SvcError::UnsupportedRequest(0x42)
        );
        assert_eq!(RequestType::from_u8(0x42), RequestType::Other(0x42));
        assert_eq!(RequestType::Other(0x42).as_u8(), 0x42);
    }

    #[test]
    fn test_conn_create_layout() {
        let req = ConnCreateRequest {
            intf1_id: 2,
            cport1_id: 0x0102,
            intf2_id: 5,
            cport2_id: 3,
            tc: 0,
            flags: CPORT_FLAGS_CSV_N | CPORT_FLAGS_E2EFC,
        };
        assert_eq!(req.encode(), vec![2, 0x02, 0x01, 5, 3, 0, 0, 0x05]);
    }

    #[test]
    fn test_attach_state() {
        assert!(HotUnplugRequest { intf_id: 1, attach_state: 1 }.attached());
        assert!(!HotUnplugRequest { intf_id: 1, attach_state: 0 }.attached());
    }
}
