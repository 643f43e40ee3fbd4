/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: dispatcher.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-10-13 16:55:02
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-10-17 15:27:44
 */

use crate::config::{ResendConfig, SmtpConfig};
use crate::error::{DispatchError, TransportFailure};
use crate::payload::EmailPayload;
use crate::resend_sender::ResendTransport;
use crate::smtp_sender::SmtpTransport;
use crate::traits::{DispatchResult, MailTransport, SendOptions};
use log::{error, info, warn};

/// One step of the delivery chain.
pub struct Route {
    pub transport: Box<dyn MailTransport>,
    pub reply_to: Option<String>,
}

impl Route {
    pub fn new(transport: Box<dyn MailTransport>) -> Self {
        Self {
            transport,
            reply_to: None,
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Tries each route in order and stops at the first that delivers.
pub struct Dispatcher {
    routes: Vec<Route>,
}

impl Dispatcher {
    pub fn new(routes: Vec<Route>) -> Result<Self, DispatchError> {
        if routes.is_empty() {
            return Err(DispatchError::Configuration(
                "no transport available".to_string(),
            ));
        }
        Ok(Self { routes })
    }

    #[allow(dead_code)]
    pub fn providers(&self) -> Vec<&'static str> {
        self.routes.iter().map(|r| r.transport.provider()).collect()
    }

    pub async fn dispatch(
        &self,
        payload: &EmailPayload,
        from_name: Option<&str>,
    ) -> Result<DispatchResult, DispatchError> {
        let mut failures: Vec<TransportFailure> = Vec::new();

        for route in &self.routes {
            let provider = route.transport.provider();
            let options = SendOptions {
                from_name: from_name.map(str::to_string),
                reply_to: route.reply_to.clone(),
            };

            if failures.is_empty() {
                info!("Sending to {} via {}", payload.to, provider);
            } else {
                warn!("Falling back to {} for {}", provider, payload.to);
            }

            match route.transport.send(payload, &options).await {
                Ok(delivery) => {
                    let note = (!failures.is_empty()).then(|| {
                        let failed: Vec<String> =
                            failures.iter().map(|f| f.provider.to_uppercase()).collect();
                        format!("fallback from {} failure", failed.join(", "))
                    });

                    return Ok(DispatchResult {
                        success: true,
                        provider: provider.to_string(),
                        message_id: delivery.message_id,
                        from: delivery.from,
                        reply_to: delivery.reply_to,
                        note,
                    });
                }
                Err(e) => {
                    error!("{} delivery to {} failed: {}", provider, payload.to, e);
                    failures.push(TransportFailure { provider, error: e });
                }
            }
        }

        match failures.len() {
            1 => Err(failures.remove(0).error),
            _ => Err(DispatchError::Composite(failures)),
        }
    }
}

/// Which transports the caller allows and how they are configured.
#[derive(Debug, Clone, Default)]
pub struct TransportSelection {
    pub use_smtp: bool,
    pub smtp: Option<SmtpConfig>,
    pub api_key: Option<String>,
}

// Builds concrete transports so tests can substitute them
#[cfg_attr(test, mockall::automock)]
pub trait TransportFactory: Send + Sync {
    fn smtp(&self, config: &SmtpConfig) -> Box<dyn MailTransport>;

    fn hosted(&self, api_key: &str) -> Result<Box<dyn MailTransport>, DispatchError>;
}

pub struct RealTransportFactory {
    resend: ResendConfig,
}

impl RealTransportFactory {
    pub fn new(resend: ResendConfig) -> Self {
        Self { resend }
    }
}

impl TransportFactory for RealTransportFactory {
    fn smtp(&self, config: &SmtpConfig) -> Box<dyn MailTransport> {
        Box::new(SmtpTransport::new(config.clone()))
    }

    fn hosted(&self, api_key: &str) -> Result<Box<dyn MailTransport>, DispatchError> {
        let transport =
            ResendTransport::with_settings(api_key, &self.resend.from_address, &self.resend.api_url)?;
        Ok(Box::new(transport))
    }
}

/// SMTP first when requested and usable, the hosted API as fallback (with
/// replies going to the SMTP account), or the hosted API alone.
pub fn plan_routes(
    factory: &dyn TransportFactory,
    selection: &TransportSelection,
) -> Result<Vec<Route>, DispatchError> {
    let api_key = selection
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let smtp = selection
        .smtp
        .as_ref()
        .filter(|c| selection.use_smtp && c.is_usable());

    if let Some(config) = smtp {
        let mut routes = vec![Route::new(factory.smtp(config))];
        if let Some(key) = api_key {
            routes.push(Route::new(factory.hosted(key)?).with_reply_to(config.user.clone()));
        }
        return Ok(routes);
    }

    if selection.use_smtp {
        warn!("SMTP requested but not fully configured, using the hosted API");
    }

    match api_key {
        Some(key) => Ok(vec![Route::new(factory.hosted(key)?)]),
        None => Err(DispatchError::Configuration(
            "no transport available".to_string(),
        )),
    }
}

/// Entry point: picks the transports for `selection` and delivers `payload`.
pub async fn dispatch_email(
    factory: &dyn TransportFactory,
    payload: &EmailPayload,
    selection: &TransportSelection,
    from_name: Option<&str>,
) -> Result<DispatchResult, DispatchError> {
    let dispatcher = Dispatcher::new(plan_routes(factory, selection)?)?;
    dispatcher.dispatch(payload, from_name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp_sender::{MockSmtpMailer, MockSmtpMailerFactory};
    use crate::traits::{Delivery, MockMailTransport};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn usable_smtp() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.test".to_string(),
            port: 465,
            secure: false,
            user: "a@b.com".to_string(),
            pass: "x".to_string(),
            name: None,
            connect_timeout_seconds: None,
            idle_timeout_seconds: None,
        }
    }

    fn payload() -> EmailPayload {
        EmailPayload::new("user@example.com", "Hi", "<p>Hi</p>")
    }

    fn delivering(provider: &'static str, times: usize) -> MockMailTransport {
        let mut transport = MockMailTransport::new();
        transport.expect_provider().return_const(provider);
        transport.expect_send().times(times).returning(|_, options| {
            Ok(Delivery {
                message_id: uuid::Uuid::new_v4().to_string(),
                from: "sender@example.com".to_string(),
                reply_to: options.reply_to.clone(),
            })
        });
        transport
    }

    fn failing(provider: &'static str, reason: &'static str) -> MockMailTransport {
        let mut transport = MockMailTransport::new();
        transport.expect_provider().return_const(provider);
        transport.expect_send().times(1).returning(move |_, _| {
            Err(DispatchError::Transport {
                provider,
                target: "smtp.test:465".to_string(),
                reason: reason.to_string(),
            })
        });
        transport
    }

    #[tokio::test]
    async fn test_api_only_never_touches_smtp() {
        let mut factory = MockTransportFactory::new();
        factory.expect_smtp().times(0);
        factory
            .expect_hosted()
            .times(1)
            .returning(|_| Ok(Box::new(delivering("resend", 1))));

        let selection = TransportSelection {
            use_smtp: false,
            smtp: Some(usable_smtp()),
            api_key: Some("re_test".to_string()),
        };

        let result = dispatch_email(&factory, &payload(), &selection, None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.provider, "resend");
        assert!(result.note.is_none());
        assert!(result.reply_to.is_none());
    }

    #[tokio::test]
    async fn test_smtp_success_skips_fallback() {
        let mut factory = MockTransportFactory::new();
        factory
            .expect_smtp()
            .times(1)
            .returning(|_| Box::new(delivering("smtp", 1)));
        factory
            .expect_hosted()
            .times(1)
            .returning(|_| Ok(Box::new(delivering("resend", 0))));

        let selection = TransportSelection {
            use_smtp: true,
            smtp: Some(usable_smtp()),
            api_key: Some("re_test".to_string()),
        };

        let result = dispatch_email(&factory, &payload(), &selection, Some("Acme"))
            .await
            .unwrap();
        assert_eq!(result.provider, "smtp");
        assert!(result.note.is_none());
    }

    #[tokio::test]
    async fn test_smtp_failure_falls_back_once_with_reply_to() {
        let mut factory = MockTransportFactory::new();
        factory
            .expect_smtp()
            .returning(|_| Box::new(failing("smtp", "connection reset")));
        factory.expect_hosted().returning(|_| {
            let mut transport = MockMailTransport::new();
            transport.expect_provider().return_const("resend");
            transport
                .expect_send()
                .times(1)
                .withf(|_, options| {
                    options.reply_to.as_deref() == Some("a@b.com")
                        && options.from_name.as_deref() == Some("Acme")
                })
                .returning(|_, options| {
                    Ok(Delivery {
                        message_id: "re-1".to_string(),
                        from: "\"Acme\" <onboarding@resend.dev>".to_string(),
                        reply_to: options.reply_to.clone(),
                    })
                });
            Ok(Box::new(transport))
        });

        let selection = TransportSelection {
            use_smtp: true,
            smtp: Some(usable_smtp()),
            api_key: Some("re_test".to_string()),
        };

        let result = dispatch_email(&factory, &payload(), &selection, Some("Acme"))
            .await
            .unwrap();
        assert_eq!(result.provider, "resend");
        assert_eq!(result.reply_to.as_deref(), Some("a@b.com"));
        assert_eq!(result.note.as_deref(), Some("fallback from SMTP failure"));
    }

    #[tokio::test]
    async fn test_both_failures_are_kept() {
        let mut factory = MockTransportFactory::new();
        factory
            .expect_smtp()
            .returning(|_| Box::new(failing("smtp", "connection reset")));
        factory
            .expect_hosted()
            .returning(|_| Ok(Box::new(failing("resend", "invalid from address"))));

        let selection = TransportSelection {
            use_smtp: true,
            smtp: Some(usable_smtp()),
            api_key: Some("re_test".to_string()),
        };

        let err = dispatch_email(&factory, &payload(), &selection, None)
            .await
            .unwrap_err();
        assert!(matches!(&err, DispatchError::Composite(f) if f.len() == 2));
        let text = err.to_string();
        assert!(text.contains("connection reset"));
        assert!(text.contains("invalid from address"));
    }

    #[tokio::test]
    async fn test_no_transport_available() {
        let mut factory = MockTransportFactory::new();
        factory.expect_smtp().times(0);
        factory.expect_hosted().times(0);

        let mut unusable = usable_smtp();
        unusable.pass = String::new();

        let selection = TransportSelection {
            use_smtp: true,
            smtp: Some(unusable),
            api_key: Some("   ".to_string()),
        };

        let err = dispatch_email(&factory, &payload(), &selection, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
        assert!(err.to_string().contains("no transport available"));
    }

    #[tokio::test]
    async fn test_unusable_smtp_uses_hosted_api() {
        let mut factory = MockTransportFactory::new();
        factory.expect_smtp().times(0);
        factory
            .expect_hosted()
            .returning(|_| Ok(Box::new(delivering("resend", 1))));

        let selection = TransportSelection {
            use_smtp: true,
            smtp: None,
            api_key: Some("re_test".to_string()),
        };

        let result = dispatch_email(&factory, &payload(), &selection, None)
            .await
            .unwrap();
        assert_eq!(result.provider, "resend");
    }

    #[tokio::test]
    async fn test_identical_dispatches_differ_only_in_message_id() {
        let mut factory = MockTransportFactory::new();
        factory
            .expect_hosted()
            .times(2)
            .returning(|_| Ok(Box::new(delivering("resend", 1))));

        let selection = TransportSelection {
            use_smtp: false,
            smtp: None,
            api_key: Some("re_test".to_string()),
        };

        let first = dispatch_email(&factory, &payload(), &selection, Some("Acme"))
            .await
            .unwrap();
        let second = dispatch_email(&factory, &payload(), &selection, Some("Acme"))
            .await
            .unwrap();

        assert_ne!(first.message_id, second.message_id);
        assert_eq!(
            DispatchResult {
                message_id: String::new(),
                ..first
            },
            DispatchResult {
                message_id: String::new(),
                ..second
            }
        );
    }

    #[tokio::test]
    async fn test_longer_chains_report_every_failure() {
        let dispatcher = Dispatcher::new(vec![
            Route::new(Box::new(failing("smtp", "timeout"))),
            Route::new(Box::new(failing("sendgrid", "unauthorized"))),
            Route::new(Box::new(delivering("resend", 1))),
        ])
        .unwrap();

        assert_eq!(dispatcher.providers(), vec!["smtp", "sendgrid", "resend"]);
        let result = dispatcher.dispatch(&payload(), None).await.unwrap();
        assert_eq!(
            result.note.as_deref(),
            Some("fallback from SMTP, SENDGRID failure")
        );
    }

    #[test]
    fn test_empty_chain_rejected() {
        assert!(matches!(
            Dispatcher::new(Vec::new()),
            Err(DispatchError::Configuration(_))
        ));
    }

    // Real SMTP transport with a stubbed mailer: verification fails, no API key.
    #[tokio::test]
    async fn test_smtp_auth_error_without_api_key() {
        let connects = Arc::new(AtomicUsize::new(0));

        let mut mailer_factory = MockSmtpMailerFactory::new();
        let counter = connects.clone();
        mailer_factory.expect_create().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut mailer = MockSmtpMailer::new();
            mailer
                .expect_verify()
                .returning(|| Err(anyhow::anyhow!("auth error")));
            mailer.expect_send().times(0);
            Ok(Box::new(mailer))
        });
        let mailer_factory = Arc::new(mailer_factory);

        let mut factory = MockTransportFactory::new();
        factory.expect_smtp().returning(move |config| {
            Box::new(SmtpTransport::new_with_factory(
                config.clone(),
                mailer_factory.clone(),
            ))
        });
        factory.expect_hosted().times(0);

        let selection = TransportSelection {
            use_smtp: true,
            smtp: Some(usable_smtp()),
            api_key: None,
        };

        let err = dispatch_email(&factory, &payload(), &selection, None)
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("smtp.test"));
        assert!(text.contains("auth error"));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    // Same verification failure, but an API key is present: the hosted API takes over.
    #[tokio::test]
    async fn test_smtp_auth_error_falls_back_to_hosted_api() {
        let mut server = mockito::Server::new_async().await;
        let hosted_mock = server
            .mock("POST", "/emails")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "to": ["user@example.com"],
                "reply_to": "a@b.com"
            })))
            .with_status(200)
            .with_body(r#"{"id":"re-42"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut mailer_factory = MockSmtpMailerFactory::new();
        mailer_factory.expect_create().times(1).returning(|_, _| {
            let mut mailer = MockSmtpMailer::new();
            mailer
                .expect_verify()
                .returning(|| Err(anyhow::anyhow!("auth error")));
            mailer.expect_send().times(0);
            Ok(Box::new(mailer))
        });
        let mailer_factory = Arc::new(mailer_factory);

        let mut factory = MockTransportFactory::new();
        factory.expect_smtp().returning(move |config| {
            Box::new(SmtpTransport::new_with_factory(
                config.clone(),
                mailer_factory.clone(),
            ))
        });
        let api_url = server.url();
        factory.expect_hosted().times(1).returning(move |api_key| {
            let transport = ResendTransport::with_settings(
                api_key,
                crate::config::DEFAULT_RESEND_FROM_ADDRESS,
                &api_url,
            )?;
            Ok(Box::new(transport) as Box<dyn MailTransport>)
        });

        let selection = TransportSelection {
            use_smtp: true,
            smtp: Some(usable_smtp()),
            api_key: Some("re_test".to_string()),
        };

        let result = dispatch_email(&factory, &payload(), &selection, None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.provider, "resend");
        assert_eq!(result.message_id, "re-42");
        assert_eq!(result.reply_to.as_deref(), Some("a@b.com"));
        assert_eq!(result.note.as_deref(), Some("fallback from SMTP failure"));
        hosted_mock.assert_async().await;
    }
}
