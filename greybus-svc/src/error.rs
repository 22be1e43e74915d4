//! Error types for the SVC protocol engine.

use crate::svc::SvcState;
use thiserror::Error;

/// Failure reported by the operation substrate for an outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// No response arrived within the substrate's retry policy.
    #[error("operation timed out")]
    Timeout,

    /// The peer answered with a non-zero operation status.
    #[error("operation rejected by peer (status {0})")]
    Rejected(u8),

    /// The connection to the SVC is gone.
    #[error("connection disconnected")]
    Disconnected,

    /// The response payload was shorter than the expected struct.
    #[error("short response ({actual} < {expected})")]
    ShortResponse { expected: usize, actual: usize },
}

/// Failure reported by the host device / interface object model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostError(pub String);

/// Main error type for SVC operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SvcError {
    /// Request arrived in a state that does not accept it.
    #[error("unexpected request 0x{op_type:02x} received (state {state})")]
    ProtocolViolation { op_type: u8, state: SvcState },

    /// Request payload is shorter than its wire struct.
    #[error("short request 0x{op_type:02x} ({actual} < {expected})")]
    InvalidPayload {
        op_type: u8,
        expected: usize,
        actual: usize,
    },

    /// Requested major version is newer than what we implement.
    #[error("unsupported major version ({requested} > {supported})")]
    UnsupportedVersion { requested: u8, supported: u8 },

    /// Request type is not handled by the SVC protocol.
    #[error("unsupported request 0x{0:02x}")]
    UnsupportedRequest(u8),

    /// An outbound call failed at the substrate level.
    #[error("operation 0x{op_type:02x} for interface {intf_id} failed: {source}")]
    Remote {
        op_type: u8,
        intf_id: u8,
        #[source]
        source: OperationError,
    },

    /// A DME access completed but the UniPro result code was non-zero.
    #[error(
        "UniPro error on DME attribute ({intf_id} 0x{attr:04x} {selector}): {result}"
    )]
    RemoteResult {
        intf_id: u8,
        attr: u16,
        selector: u16,
        result: u16,
    },

    /// Device id space is exhausted.
    #[error("no device id available")]
    ResourceExhausted,

    /// Module boot status still reads zero.
    #[error("interface {0} not ready yet")]
    NotReady(u8),

    /// The SVC device could not be published.
    #[error("failed to register svc device: {0}")]
    DeviceRegistration(#[source] HostError),

    /// The interface object could not be created.
    #[error("failed to create interface {intf_id}: {source}")]
    InterfaceCreate {
        intf_id: u8,
        #[source]
        source: HostError,
    },

    /// The interface object failed to initialize.
    #[error("failed to initialize interface {intf_id}: {source}")]
    InterfaceInit {
        intf_id: u8,
        #[source]
        source: HostError,
    },

    /// A device id was released that was never allocated.
    #[error("device id {0} freed while not allocated")]
    DoubleFree(u8),

    /// The deferred work queue is no longer accepting requests.
    #[error("deferred work queue closed")]
    QueueClosed,
}

impl SvcError {
    /// Negative errno equivalent handed back to the operation substrate.
    pub fn errno(&self) -> i32 {
        match self {
            SvcError::ProtocolViolation { .. }
            | SvcError::InvalidPayload { .. }
            | SvcError::UnsupportedRequest(_)
            | SvcError::DoubleFree(_) => -EINVAL,
            SvcError::UnsupportedVersion { .. } => -ENOTSUPP,
            SvcError::Remote { source, .. } => match source {
                OperationError::Timeout => -ETIMEDOUT,
                OperationError::Disconnected => -ESHUTDOWN,
                _ => -EIO,
            },
            SvcError::RemoteResult { .. } => -EIO,
            SvcError::ResourceExhausted => -ENOMEM,
            SvcError::NotReady(_) => -ENODEV,
            SvcError::DeviceRegistration(_)
            | SvcError::InterfaceCreate { .. }
            | SvcError::InterfaceInit { .. } => -ENODEV,
            SvcError::QueueClosed => -ESHUTDOWN,
        }
    }
}

const EIO: i32 = 5;
const ENOMEM: i32 = 12;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ESHUTDOWN: i32 = 108;
const ETIMEDOUT: i32 = 110;
const ENOTSUPP: i32 = 524;

/// Result type for SVC operations.
pub type Result<T> = std::result::Result<T, SvcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(SvcError::NotReady(5).errno(), -19);
        assert_eq!(SvcError::ResourceExhausted.errno(), -12);
        assert_eq!(
            SvcError::ProtocolViolation {
                op_type: 0x04,
                state: SvcState::Reset
            }
            .errno(),
            -22
        );
        assert_eq!(
            SvcError::Remote {
                op_type: 0x0b,
                intf_id: 5,
                source: OperationError::Timeout,
            }
            .errno(),
            -110
        );
        assert_eq!(
            SvcError::RemoteResult {
                intf_id: 5,
                attr: 0x4083,
                selector: 0,
                result: 3,
            }
            .errno(),
            -5
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = SvcError::ProtocolViolation {
            op_type: 0x02,
            state: SvcState::Reset,
        };
        assert_eq!(
            err.to_string(),
            "unexpected request 0x02 received (state reset)"
        );

        let err = SvcError::Remote {
            op_type: 0x0b,
            intf_id: 5,
            source: OperationError::Rejected(2),
        };
        assert!(err.to_string().contains("interface 5"));
    }
}
