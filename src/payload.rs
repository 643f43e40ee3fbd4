/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: payload.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-10-12 10:31:17
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-10-19 10:12:05
 */

use crate::error::DispatchError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

pub const DEFAULT_ATTACHMENT_NAME: &str = "attachment";

/// A message to deliver. Built once per dispatch call and never persisted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    pub to: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl EmailPayload {
    #[allow(dead_code)]
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            html: html.into(),
            attachments: Vec::new(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, DispatchError> {
        serde_json::from_str(raw).map_err(|e| DispatchError::InvalidPayload(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentContent {
    Binary(Vec<u8>),
    /// Base64 text. `Attachment::base64` stores it in canonical form, but a
    /// hand-built value may still carry a data-URI prefix or line breaks.
    Base64(String),
    /// Fetched by the transport at send time.
    RemoteRef(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "AttachmentSpec")]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub content: AttachmentContent,
}

impl Attachment {
    pub fn binary(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            content: AttachmentContent::Binary(bytes),
        }
    }

    pub fn base64(filename: impl Into<String>, encoded: impl Into<String>) -> Result<Self, DispatchError> {
        let encoded = canonical_base64(&encoded.into());
        STANDARD
            .decode(&encoded)
            .map_err(|e| DispatchError::InvalidPayload(format!("attachment is not valid base64: {}", e)))?;

        Ok(Self {
            filename: filename.into(),
            content_type: None,
            content: AttachmentContent::Base64(encoded),
        })
    }

    pub fn remote(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            content: AttachmentContent::RemoteRef(url.into()),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Wire shape of an attachment, as it arrives in JSON.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentSpec {
    #[serde(default)]
    filename: String,
    content_type: Option<String>,
    content: Option<RawContent>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl TryFrom<AttachmentSpec> for Attachment {
    type Error = DispatchError;

    fn try_from(spec: AttachmentSpec) -> Result<Self, Self::Error> {
        let attachment = match (spec.content, spec.url) {
            (Some(_), Some(_)) => {
                return Err(DispatchError::InvalidPayload(format!(
                    "attachment {:?} has both content and url",
                    spec.filename
                )));
            }
            (None, None) => {
                return Err(DispatchError::InvalidPayload(format!(
                    "attachment {:?} has neither content nor url",
                    spec.filename
                )));
            }
            (None, Some(url)) => Attachment::remote(spec.filename, url),
            (Some(RawContent::Bytes(bytes)), None) => Attachment::binary(spec.filename, bytes),
            (Some(RawContent::Text(text)), None) => Attachment::base64(spec.filename, text)?,
        };

        Ok(Attachment {
            content_type: spec.content_type,
            ..attachment
        })
    }
}

/// Attachment content as every transport consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedContent {
    /// Canonical base64 without any data-URI prefix.
    Inline(String),
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAttachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub content: NormalizedContent,
}

impl NormalizedAttachment {
    /// Decoded bytes for inline content, `None` for remote references.
    pub fn decoded(&self) -> Result<Option<Vec<u8>>, DispatchError> {
        match &self.content {
            NormalizedContent::Inline(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| DispatchError::InvalidPayload(format!("{}: {}", self.filename, e))),
            NormalizedContent::Remote(_) => Ok(None),
        }
    }
}

pub fn strip_data_uri(encoded: &str) -> &str {
    match encoded.split_once("base64,") {
        Some((_, data)) => data,
        None => encoded,
    }
}

/// Drops any data-URI prefix and every ASCII whitespace character, so MIME
/// line-wrapped input decodes the same as a single line.
pub fn canonical_base64(encoded: &str) -> String {
    strip_data_uri(encoded)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect()
}

pub fn normalize_attachments(attachments: &[Attachment]) -> Vec<NormalizedAttachment> {
    attachments
        .iter()
        .map(|a| {
            let filename = if a.filename.trim().is_empty() {
                DEFAULT_ATTACHMENT_NAME.to_string()
            } else {
                a.filename.clone()
            };

            let content = match &a.content {
                AttachmentContent::Binary(bytes) => NormalizedContent::Inline(STANDARD.encode(bytes)),
                AttachmentContent::Base64(encoded) => NormalizedContent::Inline(canonical_base64(encoded)),
                AttachmentContent::RemoteRef(url) => NormalizedContent::Remote(url.clone()),
            };

            NormalizedAttachment {
                filename,
                content_type: a.content_type.clone(),
                content,
            }
        })
        .collect()
}
