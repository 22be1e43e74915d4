//! Operation substrate boundary.
//!
//! The substrate owns framing, response correlation, timeouts and retries.
//! The SVC engine only issues synchronous calls through it and is handed
//! inbound requests one at a time.

use crate::error::OperationError;
use async_trait::async_trait;

/// Outbound half of the SVC connection.
#[async_trait]
pub trait Operations: Send + Sync {
    /// Send a request of `op_type` and wait for its response.
    ///
    /// `response_size` is the size of the expected response struct; zero
    /// for operations without a response body. Implementations return
    /// [`OperationError::ShortResponse`] when the peer sends less.
    async fn call(
        &self,
        op_type: u8,
        request: Vec<u8>,
        response_size: usize,
    ) -> Result<Vec<u8>, OperationError>;
}
