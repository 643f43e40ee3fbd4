use crate::error::DispatchError;
use crate::payload::EmailPayload;
use async_trait::async_trait;
use serde::Serialize;

/// Per-attempt sender details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
}

/// What a transport reports back after accepting a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub from: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub provider: String,
    pub message_id: String,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Provider tag reported in results, e.g. `smtp` or `resend`
    fn provider(&self) -> &'static str;

    /// Delivers one message, returning the transport-assigned message id
    async fn send(
        &self,
        payload: &EmailPayload,
        options: &SendOptions,
    ) -> Result<Delivery, DispatchError>;
}
