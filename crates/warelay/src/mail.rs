//! Thin client for the Resend transactional email API.

use reqwest::Client;
use serde::{Deserialize, Serialize};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// Transactional email sender. Every provider failure is normalized into
/// [`SendOutcome::Failed`]; this type never returns an `Err`.
pub struct Mailer {
    http: Client,
    api_key: String,
    from: String,
}

impl Mailer {
    pub fn new(api_key: String, from: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            from,
        }
    }

    pub async fn send(
        &self,
        to: &str,
        subject: &str,
        text: &str,
        html: Option<&str>,
        attachments: Option<Vec<Attachment>>,
    ) -> SendOutcome {
        let payload = EmailPayload {
            from: &self.from,
            to: vec![to],
            subject,
            text,
            html,
            attachments,
        };

        let response = match self
            .http
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return SendOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return SendOutcome::Failed {
                error: format!("API error (status {status}): {message}"),
            };
        }

        match response.json::<SendResponse>().await {
            Ok(body) => SendOutcome::Sent {
                message_id: body.id,
            },
            Err(e) => SendOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Result of an email send.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent { message_id: String },
    Failed { error: String },
}

/// Attachment in the provider's wire format; `content` is base64.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content: String,
    pub content_type: String,
    pub disposition: String,
}

#[derive(Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachments: Option<Vec<Attachment>>,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_wire_shape() {
        let payload = EmailPayload {
            from: "relay@example.com",
            to: vec!["oncall@example.com"],
            subject: "subject",
            text: "text body",
            html: Some("<p>html body</p>"),
            attachments: Some(vec![Attachment {
                filename: "qr.png".to_string(),
                content: "aGVsbG8=".to_string(),
                content_type: "image/png".to_string(),
                disposition: "attachment".to_string(),
            }]),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["from"], "relay@example.com");
        assert_eq!(json["to"], serde_json::json!(["oncall@example.com"]));
        assert_eq!(json["html"], "<p>html body</p>");
        assert_eq!(json["attachments"][0]["filename"], "qr.png");
        assert_eq!(json["attachments"][0]["content_type"], "image/png");
        assert_eq!(json["attachments"][0]["disposition"], "attachment");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let payload = EmailPayload {
            from: "relay@example.com",
            to: vec!["oncall@example.com"],
            subject: "subject",
            text: "text body",
            html: None,
            attachments: None,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("html").is_none());
        assert!(json.get("attachments").is_none());
    }
}
