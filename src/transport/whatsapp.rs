//! WhatsApp Cloud API transport.
//!
//! POSTs one template message to `{api_base}/{phone_id}/messages`. Recipient
//! numbers carry the country prefix and no leading `+`. Template variables
//! fill `{{1}}`, `{{2}}`, ... in order.

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::WhatsAppConfig;
use crate::error::TransportError;
use crate::transport::{MessageTransport, SendOutcome};

/// WhatsApp Cloud API client.
pub struct WhatsAppTransport {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppTransport {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, phone_id: &str) -> String {
        format!("{}/{phone_id}/messages", self.config.api_base)
    }
}

/// Build the Cloud API template-message payload.
fn build_payload(
    recipient: &str,
    template_name: &str,
    language: &str,
    variables: &[String],
) -> serde_json::Value {
    let mut template = serde_json::json!({
        "name": template_name,
        "language": { "code": language },
    });

    if !variables.is_empty() {
        template["components"] = serde_json::json!([{
            "type": "body",
            "parameters": variables
                .iter()
                .map(|v| serde_json::json!({ "type": "text", "text": v }))
                .collect::<Vec<_>>(),
        }]);
    }

    serde_json::json!({
        "messaging_product": "whatsapp",
        "to": recipient,
        "type": "template",
        "template": template,
    })
}

#[async_trait]
impl MessageTransport for WhatsAppTransport {
    async fn send_template(
        &self,
        recipient: &str,
        template_name: &str,
        language: &str,
        variables: &[String],
    ) -> Result<SendOutcome, TransportError> {
        // Absent credentials fail here, before any network traffic.
        let (token, phone_id) = match (&self.config.token, &self.config.phone_id) {
            (Some(token), Some(phone_id)) => (token, phone_id),
            _ => return Err(TransportError::MissingCredentials),
        };

        let url = self.api_url(phone_id);
        let payload = build_payload(recipient, template_name, language, variables);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;

        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::RequestFailed {
                endpoint: url,
                reason: format!("failed to read response body: {e}"),
            })?;

        Ok(SendOutcome { status_code, body })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config(token: Option<&str>, phone_id: Option<&str>, api_base: &str) -> WhatsAppConfig {
        WhatsAppConfig {
            token: token.map(SecretString::from),
            phone_id: phone_id.map(String::from),
            api_base: api_base.to_string(),
        }
    }

    #[test]
    fn api_url_includes_phone_id() {
        let transport = WhatsAppTransport::new(config(
            Some("t"),
            Some("555001"),
            "https://graph.facebook.com/v22.0",
        ));
        assert_eq!(
            transport.api_url("555001"),
            "https://graph.facebook.com/v22.0/555001/messages"
        );
    }

    #[test]
    fn payload_without_variables_has_no_components() {
        let payload = build_payload("34600000000", "welcome_student_service_v1", "en_US", &[]);
        assert_eq!(payload["messaging_product"], "whatsapp");
        assert_eq!(payload["to"], "34600000000");
        assert_eq!(payload["template"]["name"], "welcome_student_service_v1");
        assert_eq!(payload["template"]["language"]["code"], "en_US");
        assert!(payload["template"].get("components").is_none());
    }

    #[test]
    fn payload_variables_are_ordered_text_parameters() {
        let vars = vec!["Ana".to_string(), "Course 1".to_string(), "45.5".to_string()];
        let payload = build_payload("34600000000", "progress_student_service_v1", "es", &vars);

        let params = &payload["template"]["components"][0]["parameters"];
        assert_eq!(params.as_array().unwrap().len(), 3);
        assert_eq!(params[0]["type"], "text");
        assert_eq!(params[0]["text"], "Ana");
        assert_eq!(params[2]["text"], "45.5");
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_network_call() {
        // api_base points nowhere routable; reaching the network would error
        // differently than MissingCredentials.
        let transport = WhatsAppTransport::new(config(None, None, "http://127.0.0.1:1"));
        let result = transport
            .send_template("34600000000", "tpl", "es", &[])
            .await;
        assert!(matches!(result, Err(TransportError::MissingCredentials)));
    }

    #[tokio::test]
    async fn missing_phone_id_alone_fails() {
        let transport = WhatsAppTransport::new(config(Some("token"), None, "http://127.0.0.1:1"));
        let result = transport
            .send_template("34600000000", "tpl", "es", &[])
            .await;
        assert!(matches!(result, Err(TransportError::MissingCredentials)));
    }

    #[tokio::test]
    async fn connection_failure_is_request_failed() {
        let transport =
            WhatsAppTransport::new(config(Some("token"), Some("555001"), "http://127.0.0.1:1"));
        let result = transport
            .send_template("34600000000", "tpl", "es", &[])
            .await;
        assert!(matches!(
            result,
            Err(TransportError::RequestFailed { .. })
        ));
    }
}
