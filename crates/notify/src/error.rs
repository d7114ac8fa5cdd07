//! Error types for the notification channel.

use thiserror::Error;

/// Errors that can occur when sending a report.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Channel is not configured
    #[error("channel not configured: {0}")]
    NotConfigured(String),

    /// An address failed to parse
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// Message assembly failed
    #[error("failed to build email message: {0}")]
    Message(#[from] lettre::error::Error),

    /// SMTP transport error
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// Report template failed to render
    #[error("report rendering failed: {0}")]
    Template(#[from] handlebars::RenderError),
}
