/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: resend_sender.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-10-13 14:12:36
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-10-19 10:31:44
 */

use crate::config::{DEFAULT_RESEND_API_URL, DEFAULT_RESEND_FROM_ADDRESS};
use crate::error::DispatchError;
use crate::payload::{EmailPayload, NormalizedContent, normalize_attachments};
use crate::traits::{Delivery, MailTransport, SendOptions};
use async_trait::async_trait;
use log::{error, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const PROVIDER: &str = "resend";

/// Delivers through the Resend HTTP API.
pub struct ResendTransport {
    api_key: String,
    from_address: String,
    client: Client,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: String,
    to: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<ResendAttachment>,
}

#[derive(Debug, Serialize)]
struct ResendAttachment {
    filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

// Success carries `id`; failures carry `statusCode`, `name` and `message`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResendResponse {
    id: Option<String>,
    status_code: Option<u16>,
    name: Option<String>,
    message: Option<String>,
}

impl ResendResponse {
    fn is_error(&self) -> bool {
        self.status_code.is_some() || self.name.is_some() || self.message.is_some()
    }
}

impl ResendTransport {
    #[allow(dead_code)]
    pub fn new(api_key: &str) -> Result<Self, DispatchError> {
        Self::with_settings(api_key, DEFAULT_RESEND_FROM_ADDRESS, DEFAULT_RESEND_API_URL)
    }

    pub fn with_settings(api_key: &str, from_address: &str, api_url: &str) -> Result<Self, DispatchError> {
        if api_key.trim().is_empty() {
            return Err(DispatchError::Configuration(
                "Resend API key is not configured".to_string(),
            ));
        }

        Ok(Self {
            api_key: api_key.trim().to_string(),
            from_address: from_address.to_string(),
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// `"Name" <from_address>` with a display name, the bare fixed sender otherwise.
    pub fn from_header(&self, from_name: Option<&str>) -> String {
        match from_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => format!("\"{}\" <{}>", name, self.from_address),
            None => self.from_address.clone(),
        }
    }

    fn provider_error(&self, status: Option<u16>, response: ResendResponse, fallback: String) -> DispatchError {
        DispatchError::Provider {
            provider: PROVIDER,
            status: response.status_code.or(status),
            name: response.name,
            message: response.message.unwrap_or(fallback),
        }
    }
}

#[async_trait]
impl MailTransport for ResendTransport {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn send(&self, payload: &EmailPayload, options: &SendOptions) -> Result<Delivery, DispatchError> {
        let url = format!("{}/emails", self.api_url);
        let from = self.from_header(options.from_name.as_deref());

        let attachments = normalize_attachments(&payload.attachments)
            .into_iter()
            .map(|a| {
                let (content, path) = match a.content {
                    NormalizedContent::Inline(encoded) => (Some(encoded), None),
                    NormalizedContent::Remote(url) => (None, Some(url)),
                };
                ResendAttachment {
                    filename: a.filename,
                    content,
                    path,
                    content_type: a.content_type,
                }
            })
            .collect();

        let body = ResendEmail {
            from: from.clone(),
            to: vec![payload.to.as_str()],
            cc: payload.cc.iter().map(String::as_str).collect(),
            bcc: payload.bcc.iter().map(String::as_str).collect(),
            subject: &payload.subject,
            html: &payload.html,
            reply_to: options.reply_to.as_deref(),
            attachments,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport {
                provider: PROVIDER,
                target: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| DispatchError::Transport {
            provider: PROVIDER,
            target: url.clone(),
            reason: format!("failed to read response: {}", e),
        })?;
        let parsed: ResendResponse = serde_json::from_str(&text).unwrap_or_default();

        // An error object counts as a failure whatever the status code says
        if !status.is_success() || parsed.is_error() {
            error!("Resend API error: {} - {}", status, text);
            return Err(self.provider_error(Some(status.as_u16()), parsed, status.to_string()));
        }

        let Some(message_id) = parsed.id else {
            return Err(self.provider_error(
                Some(status.as_u16()),
                ResendResponse::default(),
                "response did not include a message id".to_string(),
            ));
        };

        info!("Resend accepted message {} for {}", message_id, payload.to);
        Ok(Delivery {
            message_id,
            from,
            reply_to: options.reply_to.clone(),
        })
    }
}
