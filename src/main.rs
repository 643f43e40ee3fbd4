/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: main.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-10-12 09:31:48
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-10-19 11:02:37
 */

mod config;
mod dispatcher;
mod error;
mod payload;
mod resend_sender;
mod smtp_sender;
mod templates;
mod traits;

use clap::Parser;
use config::AppConfig;
use dispatcher::{RealTransportFactory, TransportSelection, dispatch_email};
use log::{error, info};
use payload::EmailPayload;
use rustls::crypto;
use std::io::Write;
use templates::EmailTemplate;

struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + 'static>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for w in &mut self.writers {
            let _ = w.write(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for w in &mut self.writers {
            let _ = w.flush();
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config: Option<String>,

    /// JSON file holding the message to send
    #[arg(short, long, required_unless_present = "template", conflicts_with = "template")]
    payload: Option<String>,

    /// JSON file holding a stored template, sent with `--to`, `--cc` and `--bcc`
    #[arg(short, long, requires = "to")]
    template: Option<String>,

    /// Recipient when sending a template
    #[arg(long)]
    to: Option<String>,

    #[arg(long)]
    cc: Vec<String>,

    #[arg(long)]
    bcc: Vec<String>,

    /// Display name for the From header, overrides `from_name` in the config
    #[arg(long)]
    from_name: Option<String>,

    /// Skip SMTP and send through the hosted API only
    #[arg(long)]
    no_smtp: bool,
}

fn initialize_logger(config: &AppConfig) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::new();

    if let Some(level) = &config.log_level {
        builder.parse_filters(level);
    } else if let Ok(env_level) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env_level);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }

    if let Some(log_file) = &config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", log_file, e))?;

        if config.quiet {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        } else {
            let multi_writer = MultiWriter {
                writers: vec![Box::new(file), Box::new(std::io::stderr())],
            };
            builder.target(env_logger::Target::Pipe(Box::new(multi_writer)));
        }
    } else if config.quiet {
        builder.target(env_logger::Target::Pipe(Box::new(std::io::sink())));
    }

    builder.init();
    Ok(())
}

fn load_payload(path: &str) -> anyhow::Result<EmailPayload> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read payload {}: {}", path, e))?;
    Ok(EmailPayload::from_json(&raw)?)
}

fn load_template_payload(path: &str, args: &Args) -> anyhow::Result<EmailPayload> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read template {}: {}", path, e))?;
    let template: EmailTemplate = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid template {}: {}", path, e))?;
    let to = args
        .to
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--to is required with --template"))?;

    info!("Using template \"{}\" ({})", template.name, template.id);
    Ok(template.to_payload(to, args.cc.clone(), args.bcc.clone()))
}

fn build_payload(args: &Args) -> anyhow::Result<EmailPayload> {
    match (&args.payload, &args.template) {
        (Some(path), _) => load_payload(path),
        (None, Some(path)) => load_template_payload(path, args),
        (None, None) => anyhow::bail!("either --payload or --template is required"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = crypto::ring::default_provider().install_default();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::new_from_file(path),
        None => AppConfig::new(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Failed to load config: {:?}", e);
        if let Ok(path) = std::env::current_dir() {
            eprintln!("Current search path: {:?}", path);
        }
        eprintln!("Please create a `config.toml` or set APP__... environment variables, or specify a config file with --config.");
        std::process::exit(1);
    });

    initialize_logger(&config)?;

    let payload = build_payload(&args)?;
    let from_name = args.from_name.clone().or_else(|| config.from_name.clone());

    let selection = TransportSelection {
        use_smtp: config.use_smtp && !args.no_smtp,
        smtp: config.smtp.clone(),
        api_key: config.resend.api_key.clone(),
    };
    let factory = RealTransportFactory::new(config.resend.clone());

    info!("Dispatching \"{}\" to {}", payload.subject, payload.to);

    match dispatch_email(&factory, &payload, &selection, from_name.as_deref()).await {
        Ok(result) => {
            info!("Delivered via {} as {}", result.provider, result.message_id);
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            error!("Dispatch failed: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("mail-dispatcher-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_payload_or_template_required() {
        assert!(Args::try_parse_from(["mail-dispatcher"]).is_err());
        assert!(Args::try_parse_from(["mail-dispatcher", "-p", "a.json", "-t", "b.json"]).is_err());
        // A template needs a recipient
        assert!(Args::try_parse_from(["mail-dispatcher", "--template", "b.json"]).is_err());
    }

    #[test]
    fn test_build_payload_from_template() {
        let path = write_temp(
            r#"{
                "id": "2d7e2c4e-5a0b-4bde-9a0e-1f4c3b8a6d21",
                "owner_id": "user-1",
                "name": "Welcome",
                "subject": "Welcome aboard",
                "html_body": "<p>Hi</p>",
                "attachments": [{
                    "filename": "guide.pdf",
                    "content_type": "application/pdf",
                    "storage_path": "user-1/guide.pdf",
                    "url": "https://cdn.test/user-1/guide.pdf"
                }],
                "created_at": "2026-10-01T08:00:00Z",
                "updated_at": "2026-10-01T08:00:00Z"
            }"#,
        );

        let args = Args::try_parse_from([
            "mail-dispatcher",
            "--template",
            path.as_str(),
            "--to",
            "user@example.com",
            "--cc",
            "cc@example.com",
        ])
        .unwrap();
        let payload = build_payload(&args).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(payload.to, "user@example.com");
        assert_eq!(payload.cc, vec!["cc@example.com".to_string()]);
        assert_eq!(payload.subject, "Welcome aboard");
        assert_eq!(payload.attachments.len(), 1);
        assert_eq!(
            payload.attachments[0].content,
            payload::AttachmentContent::RemoteRef("https://cdn.test/user-1/guide.pdf".to_string())
        );
    }

    #[test]
    fn test_build_payload_from_file() {
        let path = write_temp(r#"{"to":"user@example.com","subject":"Hi","html":"<p>Hi</p>"}"#);
        let args = Args::try_parse_from(["mail-dispatcher", "--payload", path.as_str()]).unwrap();
        let payload = build_payload(&args).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(payload.subject, "Hi");
        assert!(payload.attachments.is_empty());
    }
}
