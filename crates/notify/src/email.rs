//! Email channel using SMTP over implicit TLS.

use handlebars::Handlebars;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;

use crate::error::NotifyError;

/// Embedded report template.
const REPORT_TEMPLATE: &str = include_str!("../templates/report-email.html.hbs");

/// One cluster's row in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterRow {
    pub cluster_name: String,
    pub role: String,
    pub status: String,
    pub status_color: String,
    pub version: String,
    pub console_url: String,
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub login_command: String,
}

impl ClusterRow {
    /// Row for a cluster whose status is known.
    #[must_use]
    pub fn available_color(available: bool) -> &'static str {
        if available {
            "green"
        } else {
            "red"
        }
    }
}

/// The rendered report payload.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub run_id: String,
    pub rows: Vec<ClusterRow>,
}

impl ClusterReport {
    /// Render the report to HTML.
    ///
    /// # Errors
    ///
    /// Returns an error if the template fails to render.
    pub fn render(&self) -> Result<String, NotifyError> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::html_escape);
        Ok(registry.render_template(REPORT_TEMPLATE, self)?)
    }
}

/// An SMTP sender for cluster reports.
pub struct EmailChannel {
    smtp_server: String,
    smtp_port: u16,
    sender: String,
    password: String,
}

impl EmailChannel {
    /// Channel with explicit SMTP settings; `sender` doubles as the
    /// login user.
    #[must_use]
    pub fn new(
        smtp_server: impl Into<String>,
        smtp_port: u16,
        sender: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            smtp_server: smtp_server.into(),
            smtp_port,
            sender: sender.into(),
            password: password.into(),
        }
    }

    /// Send the report to `recipients`, attaching a kubeconfig when one
    /// is provided.
    ///
    /// # Errors
    ///
    /// Returns an error when the channel is unconfigured, the message
    /// cannot be built, or SMTP delivery fails.
    pub async fn send_report(
        &self,
        recipients: &[String],
        subject: &str,
        report: &ClusterReport,
        kubeconfig: Option<Vec<u8>>,
    ) -> Result<(), NotifyError> {
        if self.sender.is_empty() {
            return Err(NotifyError::NotConfigured("sender address".into()));
        }
        if recipients.is_empty() {
            return Err(NotifyError::NotConfigured("recipient list".into()));
        }

        let html = report.render()?;
        let mut builder = Message::builder()
            .from(self.sender.parse()?)
            .subject(subject);
        for recipient in recipients {
            builder = builder.to(recipient.trim().parse()?);
        }

        let html_part = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(html);
        let body = match kubeconfig {
            Some(bytes) => MultiPart::mixed().singlepart(html_part).singlepart(
                Attachment::new("kubeconfig".to_string()).body(bytes, ContentType::TEXT_PLAIN),
            ),
            None => MultiPart::mixed().singlepart(html_part),
        };
        let email = builder.multipart(body)?;

        let credentials = Credentials::new(self.sender.clone(), self.password.clone());
        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.smtp_server)?
                .port(self.smtp_port)
                .credentials(credentials)
                .build();

        mailer.send(email).await?;
        tracing::info!(
            recipients = ?recipients,
            subject = subject,
            "Report emailed"
        );
        Ok(())
    }
}
