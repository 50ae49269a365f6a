//! SMTP submission transport
//!
//! Connects with STARTTLS, authenticates with the configured
//! credentials and submits one message per connection. The whole
//! exchange runs under the configured deadline.

use crate::config::SmtpConfig;
use crate::error::{Error, Result};
use crate::forward::Transport;
use mail_send::smtp::message::{Address as SmtpAddress, Message as SmtpMessage};
use mail_send::{Credentials, SmtpClientBuilder};
use tracing::{debug, warn};

/// [`Transport`] backed by an SMTP submission server.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &SmtpConfig {
        &self.config
    }

    fn client_builder(&self) -> SmtpClientBuilder<String> {
        let builder = SmtpClientBuilder::new(self.config.host.clone(), self.config.port)
            .implicit_tls(false)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .timeout(self.config.timeout);

        if self.config.accept_invalid_certs {
            builder.allow_invalid_certs()
        } else {
            builder
        }
    }

    async fn submit(&self, message: SmtpMessage<'_>) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        debug!("Connecting to SMTP server at {}", addr);

        let mut client = self
            .client_builder()
            .connect()
            .await
            .map_err(|e| Error::Smtp(format!("Cannot connect to {addr}: {e}")))?;

        client
            .send(message)
            .await
            .map_err(|e| Error::Smtp(format!("Delivery failed: {e}")))?;

        if let Err(e) = client.quit().await {
            warn!("SMTP QUIT failed after delivery: {}", e);
        }
        Ok(())
    }
}

impl Transport for SmtpTransport {
    async fn send(&self, from: &str, to: &[String], body: &[u8]) -> Result<()> {
        if to.is_empty() {
            return Err(Error::Smtp("No envelope recipients".into()));
        }

        let message = SmtpMessage {
            mail_from: SmtpAddress {
                email: from.into(),
                ..Default::default()
            },
            rcpt_to: to
                .iter()
                .map(|email| SmtpAddress {
                    email: email.as_str().into(),
                    ..Default::default()
                })
                .collect(),
            body: body.into(),
        };

        tokio::time::timeout(self.config.timeout, self.submit(message))
            .await
            .map_err(|_| {
                Error::Smtp(format!(
                    "Timed out after {}s",
                    self.config.timeout.as_secs()
                ))
            })?
    }
}
