//! DeliveryProvider port - 外部配送プロバイダ（SMS / WhatsApp など）
//!
//! コアは at-least-once を前提とし、重複排除は行いません。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{DeliveryReceipt, Message};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider answered and refused the message.
    #[error("provider rejected message (recoverable: {recoverable}): {reason}")]
    Rejected { recoverable: bool, reason: String },

    /// No provider verdict: connection refused, reset, DNS, ...
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn rejected(recoverable: bool, reason: impl Into<String>) -> Self {
        ProviderError::Rejected {
            recoverable,
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    async fn send(&self, message: &Message) -> Result<DeliveryReceipt, ProviderError>;
}
