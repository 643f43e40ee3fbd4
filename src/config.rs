/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: config.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-10-12 09:40:02
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-10-16 21:03:55
 */

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_use_smtp")]
    pub use_smtp: bool,
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub resend: ResendConfig,
    pub from_name: Option<String>,
    pub log_file: Option<String>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub quiet: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    pub user: String,
    pub pass: String,
    /// Display name used in the From header when the caller gives none.
    pub name: Option<String>,
    pub connect_timeout_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResendConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_resend_api_url")]
    pub api_url: String,
    #[serde(default = "default_resend_from_address")]
    pub from_address: String,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_resend_api_url(),
            from_address: default_resend_from_address(),
        }
    }
}

// Port for SMTP over implicit TLS
pub const IMPLICIT_TLS_PORT: u16 = 465;

// Connect and greeting must finish within this many seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 15;

// Socket idle timeout for the SMTP session
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 30;

pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com";
pub const DEFAULT_RESEND_FROM_ADDRESS: &str = "onboarding@resend.dev";

fn default_use_smtp() -> bool {
    true
}

fn default_resend_api_url() -> String {
    DEFAULT_RESEND_API_URL.to_string()
}

fn default_resend_from_address() -> String {
    DEFAULT_RESEND_FROM_ADDRESS.to_string()
}

impl SmtpConfig {
    /// A config is usable only when every credential field is filled in.
    pub fn is_usable(&self) -> bool {
        !self.host.trim().is_empty()
            && self.port != 0
            && !self.user.trim().is_empty()
            && !self.pass.is_empty()
    }

    /// Port 465 always speaks implicit TLS, whatever `secure` says.
    pub fn implicit_tls(&self) -> bool {
        self.secure || self.port == IMPLICIT_TLS_PORT
    }

    pub fn timeouts(&self) -> SmtpTimeouts {
        SmtpTimeouts {
            connect: Duration::from_secs(
                self.connect_timeout_seconds
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            ),
            idle: Duration::from_secs(
                self.idle_timeout_seconds
                    .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECONDS),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmtpTimeouts {
    /// Upper bound for connecting, reading the greeting and authenticating.
    pub connect: Duration,
    pub idle: Duration,
}

// Implement loading configuration
impl AppConfig {
    // Load config from defaults, then file (if exists), then environment variables
    pub fn new() -> Result<Self, ConfigError> {
        Self::configure_defaults()?
            // Merge in config file if present
            .add_source(File::with_name("config").required(false))
            // Merge in environment variables
            // e.g. APP__USE_SMTP=false APP__RESEND__API_KEY=...
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }

    // Load config from a specific file path
    pub fn new_from_file(path: &str) -> Result<Self, ConfigError> {
        Self::configure_defaults()?
            .add_source(File::with_name(path).required(true))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }

    fn configure_defaults()
    -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder().set_default("use_smtp", default_use_smtp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn load(toml_str: &str) -> Result<AppConfig, ConfigError> {
        AppConfig::configure_defaults()
            .unwrap()
            .add_source(File::from_str(toml_str, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn test_valid_config_deserialization() {
        let config = load(
            r#"
            use_smtp = true
            from_name = "Acme"

            [smtp]
            host = "smtp.example.com"
            port = 587
            user = "me@example.com"
            pass = "secret"

            [resend]
            api_key = "re_123"
        "#,
        )
        .unwrap();

        assert!(config.use_smtp);
        assert_eq!(config.from_name.as_deref(), Some("Acme"));

        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 587);
        assert!(!smtp.secure);
        assert!(smtp.is_usable());

        assert_eq!(config.resend.api_key.as_deref(), Some("re_123"));
        assert_eq!(config.resend.api_url, DEFAULT_RESEND_API_URL);
        assert_eq!(config.resend.from_address, DEFAULT_RESEND_FROM_ADDRESS);
    }

    #[test]
    fn test_default_values() {
        // Neither transport configured
        let config = load(r#"log_level = "debug""#).unwrap();

        assert!(config.use_smtp);
        assert!(config.smtp.is_none());
        assert!(config.resend.api_key.is_none());
        assert!(!config.quiet);
    }

    #[test]
    fn test_smtp_timeouts() {
        let config = load(
            r#"
            [smtp]
            host = "h"
            port = 25
            user = "u"
            pass = "p"
            idle_timeout_seconds = 5
        "#,
        )
        .unwrap();

        let timeouts = config.smtp.unwrap().timeouts();
        assert_eq!(timeouts.connect, Duration::from_secs(15));
        assert_eq!(timeouts.idle, Duration::from_secs(5));
    }

    #[test]
    fn test_usable_requires_every_field() {
        let base = SmtpConfig {
            host: "smtp.test".to_string(),
            port: 587,
            secure: false,
            user: "a@b.com".to_string(),
            pass: "x".to_string(),
            name: None,
            connect_timeout_seconds: None,
            idle_timeout_seconds: None,
        };
        assert!(base.is_usable());

        assert!(!SmtpConfig { host: " ".to_string(), ..base.clone() }.is_usable());
        assert!(!SmtpConfig { port: 0, ..base.clone() }.is_usable());
        assert!(!SmtpConfig { user: String::new(), ..base.clone() }.is_usable());
        assert!(!SmtpConfig { pass: String::new(), ..base }.is_usable());
    }

    #[test]
    fn test_port_465_forces_implicit_tls() {
        let config = SmtpConfig {
            host: "smtp.test".to_string(),
            port: 465,
            secure: false,
            user: "a@b.com".to_string(),
            pass: "x".to_string(),
            name: None,
            connect_timeout_seconds: None,
            idle_timeout_seconds: None,
        };
        assert!(config.implicit_tls());
        assert!(!SmtpConfig { port: 587, ..config }.implicit_tls());
    }

    #[test]
    fn test_invalid_config_type() {
        let res = load(
            r#"
            [smtp]
            host = "h"
            port = "not a port"
            user = "u"
            pass = "p"
        "#,
        );
        assert!(res.is_err());
    }
}
