use async_trait::async_trait;

use crate::TransportError;

/// Hands a finished message to the next hop.
///
/// Implementations report failures as [`TransportError`] so callers can
/// tell retryable rejections from permanent ones.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `data` from `sender` to every address in `recipients`
    ///
    /// # Errors
    /// Whatever the next hop reports
    async fn send(
        &self,
        sender: &str,
        recipients: &[String],
        data: &[u8],
    ) -> Result<(), TransportError>;
}
