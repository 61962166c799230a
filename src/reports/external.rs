//! Trait boundaries for report rendering and delivery — the "external
//! format adapter" and mail transport §4.7 treats as swappable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::database::analytics::{BandwidthEntry, Count, Summary};

#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub host: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub summary: Summary,
    pub top_paths: Vec<Count>,
    pub top_referrers: Vec<Count>,
    pub bandwidth: Vec<BandwidthEntry>,
}

pub struct RenderedReport {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: &'static str,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unsupported report format: {0}")]
    UnsupportedFormat(String),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait ReportRenderer: Send + Sync {
    fn render(&self, format: &str, data: &ReportData) -> Result<RenderedReport, RenderError>;
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("smtp transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        attachment: (&str, &str, &[u8]),
    ) -> Result<(), MailError>;
}

/// Renders `json` and `csv`; any other format is rejected. MIME type is
/// chosen by file extension, matching §4.7's "MIME type by extension".
#[derive(Debug, Default)]
pub struct BuiltinReportRenderer;

impl ReportRenderer for BuiltinReportRenderer {
    fn render(&self, format: &str, data: &ReportData) -> Result<RenderedReport, RenderError> {
        match format {
            "json" => {
                let bytes = serde_json::to_vec_pretty(data)?;
                Ok(RenderedReport {
                    bytes,
                    file_name: format!("{}-{}.json", data.host, data.period_start.format("%Y%m%d")),
                    mime_type: "application/json",
                })
            }
            "csv" => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                writer.write_record(["path", "hits"]).ok();
                for row in &data.top_paths {
                    writer.write_record([row.key.as_str(), &row.count.to_string()]).ok();
                }
                let bytes = writer.into_inner().map_err(|e| RenderError::UnsupportedFormat(e.to_string()))?;
                Ok(RenderedReport {
                    bytes,
                    file_name: format!("{}-{}.csv", data.host, data.period_start.format("%Y%m%d")),
                    mime_type: "text/csv",
                })
            }
            other => Err(RenderError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Used when `SMTP_HOST` is unset: reports still persist, delivery is a
/// silent no-op.
#[derive(Debug, Default)]
pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send(&self, _recipients: &[String], _subject: &str, _body: &str, _attachment: (&str, &str, &[u8])) -> Result<(), MailError> {
        Ok(())
    }
}

/// SMTP delivery via `lettre`, multipart/mixed with the rendered artifact
/// as a base64-encoded attachment.
pub struct SmtpMailer {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16, username: Option<&str>, password: Option<&str>, from: &str) -> Result<Self, MailError> {
        use lettre::transport::smtp::authentication::Credentials;

        let mut builder = lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::relay(host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(port);

        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(username.to_string(), password.to_string()));
        }

        Ok(Self { transport: builder.build(), from: from.to_string() })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, recipients: &[String], subject: &str, body: &str, attachment: (&str, &str, &[u8])) -> Result<(), MailError> {
        use lettre::message::{header::ContentType, Attachment, MultiPart, SinglePart};
        use lettre::{AsyncTransport, Message};

        let (file_name, mime_type, bytes) = attachment;
        let content_type = ContentType::parse(mime_type).unwrap_or(ContentType::TEXT_PLAIN);

        let mut message_builder = Message::builder().from(self.from.parse().map_err(|e: lettre::address::AddressError| MailError::Transport(e.to_string()))?);
        for recipient in recipients {
            message_builder = message_builder
                .to(recipient.parse().map_err(|e: lettre::address::AddressError| MailError::Transport(e.to_string()))?);
        }

        let message = message_builder
            .subject(subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body.to_string()))
                    .singlepart(Attachment::new(file_name.to_string()).body(bytes.to_vec(), content_type)),
            )
            .map_err(|e| MailError::Transport(e.to_string()))?;

        self.transport.send(message).await.map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}
