/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: error.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-10-12 10:04:51
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-10-16 18:22:07
 */

use thiserror::Error;

/// Errors surfaced by a dispatch call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No usable transport, or a transport is missing required settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The SMTP handshake or authentication failed before anything was sent.
    #[error("SMTP verification failed for {host}: {reason}")]
    Verification { host: String, reason: String },

    /// The message could not be delivered after the transport was ready.
    #[error("{provider} send via {target} failed: {reason}")]
    Transport {
        provider: &'static str,
        target: String,
        reason: String,
    },

    /// The hosted API answered with an error object.
    #[error("{provider} returned an error{}: {message}", describe_status(.status, .name))]
    Provider {
        provider: &'static str,
        status: Option<u16>,
        name: Option<String>,
        message: String,
    },

    /// Every transport in the chain failed.
    #[error("all transports failed: {}", describe_failures(.0))]
    Composite(Vec<TransportFailure>),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// One failed attempt inside a composite failure.
#[derive(Debug)]
pub struct TransportFailure {
    pub provider: &'static str,
    pub error: DispatchError,
}

fn describe_status(status: &Option<u16>, name: &Option<String>) -> String {
    match (status, name) {
        (Some(status), Some(name)) => format!(" ({} {})", status, name),
        (Some(status), None) => format!(" ({})", status),
        (None, Some(name)) => format!(" ({})", name),
        (None, None) => String::new(),
    }
}

fn describe_failures(failures: &[TransportFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.provider, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_keeps_every_message() {
        let err = DispatchError::Composite(vec![
            TransportFailure {
                provider: "smtp",
                error: DispatchError::Verification {
                    host: "smtp.test".to_string(),
                    reason: "auth error".to_string(),
                },
            },
            TransportFailure {
                provider: "resend",
                error: DispatchError::Provider {
                    provider: "resend",
                    status: Some(422),
                    name: Some("validation_error".to_string()),
                    message: "Invalid `to` field".to_string(),
                },
            },
        ]);

        let text = err.to_string();
        assert!(text.contains("smtp.test"));
        assert!(text.contains("auth error"));
        assert!(text.contains("422 validation_error"));
        assert!(text.contains("Invalid `to` field"));
    }

    #[test]
    fn test_provider_error_without_status() {
        let err = DispatchError::Provider {
            provider: "resend",
            status: None,
            name: None,
            message: "missing id".to_string(),
        };
        assert_eq!(err.to_string(), "resend returned an error: missing id");
    }
}
