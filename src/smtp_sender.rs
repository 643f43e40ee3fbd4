use crate::config::{SmtpConfig, SmtpTimeouts};
use crate::error::DispatchError;
use crate::payload::{EmailPayload, NormalizedAttachment, NormalizedContent, normalize_attachments};
use crate::traits::{Delivery, MailTransport, SendOptions};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{info, warn};
use reqwest::Client;
use std::sync::Arc;

pub const PROVIDER: &str = "smtp";

const OCTET_STREAM: &str = "application/octet-stream";

// Abstract the mailer so we can mock it
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmtpMailer: Send + Sync {
    /// Connects, reads the greeting and authenticates without sending anything
    async fn verify(&self) -> anyhow::Result<()>;

    async fn send(&self, message: Message) -> anyhow::Result<()>;
}

// Wrapper for Real Lettre Transport
pub struct RealSmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl SmtpMailer for RealSmtpMailer {
    async fn verify(&self) -> anyhow::Result<()> {
        let connected = self
            .transport
            .test_connection()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if !connected {
            anyhow::bail!("server did not accept the connection");
        }
        Ok(())
    }

    async fn send(&self, message: Message) -> anyhow::Result<()> {
        self.transport
            .send(message)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
            .map(|_| ())
    }
}

// Factory trait
#[cfg_attr(test, mockall::automock)]
pub trait SmtpMailerFactory: Send + Sync {
    fn create(&self, config: &SmtpConfig, timeouts: &SmtpTimeouts) -> anyhow::Result<Box<dyn SmtpMailer>>;
}

pub struct RealSmtpMailerFactory;

impl SmtpMailerFactory for RealSmtpMailerFactory {
    fn create(&self, config: &SmtpConfig, timeouts: &SmtpTimeouts) -> anyhow::Result<Box<dyn SmtpMailer>> {
        let creds = Credentials::new(config.user.clone(), config.pass.clone());

        // User-supplied servers often run self-signed certificates, so they are
        // accepted here. This trades certificate validation for reachability.
        let tls_params = TlsParameters::builder(config.host.clone())
            .dangerous_accept_invalid_certs(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid TLS parameters: {}", e))?;

        if config.port == crate::config::IMPLICIT_TLS_PORT && !config.secure {
            warn!(
                "Port {} requires implicit TLS, ignoring secure=false for {}",
                config.port, config.host
            );
        }

        let tls = if config.implicit_tls() {
            Tls::Wrapper(tls_params)
        } else {
            Tls::Opportunistic(tls_params)
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.host.as_str())
            .port(config.port)
            .tls(tls)
            .credentials(creds)
            .timeout(Some(timeouts.idle))
            .build();

        Ok(Box::new(RealSmtpMailer { transport }))
    }
}

#[cfg(test)]
#[path = "./smtp_sender_tests.rs"]
mod smtp_sender_tests;

pub struct SmtpTransport {
    config: SmtpConfig,
    timeouts: SmtpTimeouts,
    factory: Arc<dyn SmtpMailerFactory>,
    http: Client,
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig) -> Self {
        Self::new_with_factory(config, Arc::new(RealSmtpMailerFactory))
    }

    pub fn new_with_factory(config: SmtpConfig, factory: Arc<dyn SmtpMailerFactory>) -> Self {
        let timeouts = config.timeouts();
        Self {
            config,
            timeouts,
            factory,
            http: Client::new(),
        }
    }

    /// The From mailbox: optional display name, always the authenticated account.
    pub fn from_mailbox(&self, from_name: Option<&str>) -> Result<Mailbox, DispatchError> {
        let address = self.config.user.parse::<Address>().map_err(|e| {
            DispatchError::InvalidPayload(format!("invalid sender address (user): {}", e))
        })?;
        Ok(Mailbox::new(
            self.display_name(from_name).map(str::to_string),
            address,
        ))
    }

    /// From header exactly as it is written into the message.
    pub fn from_header(&self, from_name: Option<&str>) -> Result<String, DispatchError> {
        self.from_mailbox(from_name).map(|m| m.to_string())
    }

    fn display_name<'a>(&'a self, from_name: Option<&'a str>) -> Option<&'a str> {
        from_name
            .or(self.config.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    fn transport_error(&self, reason: impl ToString) -> DispatchError {
        DispatchError::Transport {
            provider: PROVIDER,
            target: format!("{}:{}", self.config.host, self.config.port),
            reason: reason.to_string(),
        }
    }

    fn generate_message_id(&self) -> String {
        let domain = self
            .config
            .user
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or(self.config.host.as_str());
        format!("<{}@{}>", uuid::Uuid::new_v4(), domain)
    }

    // Bounded by connect + idle so a stalled URL cannot hold the send open
    async fn fetch_remote(&self, url: &str) -> Result<(Vec<u8>, Option<String>), DispatchError> {
        let limit = self.timeouts.connect + self.timeouts.idle;
        match tokio::time::timeout(limit, self.fetch_remote_unbounded(url)).await {
            Ok(result) => result,
            Err(_) => Err(self.transport_error(format!(
                "fetching attachment {} timed out after {}s",
                url,
                limit.as_secs()
            ))),
        }
    }

    async fn fetch_remote_unbounded(&self, url: &str) -> Result<(Vec<u8>, Option<String>), DispatchError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("failed to fetch attachment {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(self.transport_error(format!(
                "failed to fetch attachment {}: {}",
                url,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(format!("failed to read attachment {}: {}", url, e)))?;

        Ok((bytes.to_vec(), content_type))
    }

    async fn attachment_part(&self, attachment: &NormalizedAttachment) -> Result<SinglePart, DispatchError> {
        let (bytes, fetched_type) = match &attachment.content {
            NormalizedContent::Inline(_) => (attachment.decoded()?.unwrap_or_default(), None),
            NormalizedContent::Remote(url) => self.fetch_remote(url).await?,
        };

        let mime = attachment
            .content_type
            .as_deref()
            .or(fetched_type.as_deref())
            .unwrap_or(OCTET_STREAM);
        let content_type = ContentType::parse(mime)
            .or_else(|_| ContentType::parse(OCTET_STREAM))
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;

        Ok(MailAttachment::new(attachment.filename.clone()).body(bytes, content_type))
    }

    pub async fn build_message(
        &self,
        payload: &EmailPayload,
        options: &SendOptions,
        message_id: &str,
    ) -> Result<Message, DispatchError> {
        let invalid = |what: &str, e: &dyn std::fmt::Display| {
            DispatchError::InvalidPayload(format!("invalid {}: {}", what, e))
        };

        let from = self.from_mailbox(options.from_name.as_deref())?;

        let mut builder = Message::builder()
            .from(from)
            .to(payload.to.parse::<Mailbox>().map_err(|e| invalid("recipient", &e))?)
            .subject(payload.subject.clone())
            .message_id(Some(message_id.to_string()));

        for cc in &payload.cc {
            builder = builder.cc(cc.parse::<Mailbox>().map_err(|e| invalid("cc address", &e))?);
        }
        for bcc in &payload.bcc {
            builder = builder.bcc(bcc.parse::<Mailbox>().map_err(|e| invalid("bcc address", &e))?);
        }
        if let Some(reply_to) = &options.reply_to {
            builder = builder.reply_to(reply_to.parse::<Mailbox>().map_err(|e| invalid("reply-to address", &e))?);
        }

        let html = SinglePart::html(payload.html.clone());
        let attachments = normalize_attachments(&payload.attachments);

        let message = if attachments.is_empty() {
            builder.singlepart(html)
        } else {
            let mut multipart = MultiPart::mixed().singlepart(html);
            for attachment in &attachments {
                multipart = multipart.singlepart(self.attachment_part(attachment).await?);
            }
            builder.multipart(multipart)
        };

        message.map_err(|e| invalid("message", &e))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn send(&self, payload: &EmailPayload, options: &SendOptions) -> Result<Delivery, DispatchError> {
        let host = self.config.host.clone();
        let verification = |reason: String| DispatchError::Verification {
            host: host.clone(),
            reason,
        };

        let mailer = self
            .factory
            .create(&self.config, &self.timeouts)
            .map_err(|e| verification(e.to_string()))?;

        match tokio::time::timeout(self.timeouts.connect, mailer.verify()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(verification(e.to_string())),
            Err(_) => {
                return Err(verification(format!(
                    "timed out after {}s",
                    self.timeouts.connect.as_secs()
                )));
            }
        }

        let message_id = self.generate_message_id();
        let from = self.from_header(options.from_name.as_deref())?;
        let message = self.build_message(payload, options, &message_id).await?;

        mailer
            .send(message)
            .await
            .map_err(|e| self.transport_error(e))?;

        info!(
            "SMTP accepted message {} for {} via {}",
            message_id, payload.to, self.config.host
        );

        Ok(Delivery {
            message_id,
            from,
            reply_to: options.reply_to.clone(),
        })
    }
}
