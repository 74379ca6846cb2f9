//! Outbound message transport.
//!
//! A transport sends exactly one template message and reports what the
//! provider said. No retry, no logging, no persistence — all bookkeeping
//! belongs to the dispatch engine.

pub mod whatsapp;

use async_trait::async_trait;

pub use whatsapp::WhatsAppTransport;

use crate::error::TransportError;

/// Raw outcome of a transport call: provider status code plus the raw
/// response body (JSON or otherwise — the caller decides what it means).
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub status_code: u16,
    pub body: String,
}

impl SendOutcome {
    /// A send counts as delivered only on HTTP 200 with a JSON body.
    /// Malformed provider responses are failed sends, not crashes.
    pub fn is_success(&self) -> bool {
        self.status_code == 200 && serde_json::from_str::<serde_json::Value>(&self.body).is_ok()
    }
}

/// Sends a single outbound template message to a phone number.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send_template(
        &self,
        recipient: &str,
        template_name: &str,
        language: &str,
        variables: &[String],
    ) -> Result<SendOutcome, TransportError>;
}
