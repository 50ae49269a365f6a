//! Configuration: SMTP credentials and file locations

use crate::error::{Error, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// SMTP submission settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender mailbox used for `From:` and the envelope.
    pub from: String,
    /// Deadline for one complete submission.
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl SmtpConfig {
    /// Load SMTP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `SMTP_USERNAME`
    /// - `SMTP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `SMTP_HOST` (default: `smtp.gmail.com`)
    /// - `SMTP_PORT` (default: `587`)
    /// - `SMTP_FROM` (default: the username)
    /// - `SMTP_TIMEOUT_SECS` (default: `30`)
    /// - `SMTP_ACCEPT_INVALID_CERTS` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// numeric one does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let username = env::var("SMTP_USERNAME")
            .map_err(|_| Error::Config("SMTP_USERNAME not set".into()))?;

        Ok(Self {
            host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
            port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid SMTP_PORT: {e}")))?,
            password: env::var("SMTP_PASSWORD")
                .map_err(|_| Error::Config("SMTP_PASSWORD not set".into()))?,
            from: env::var("SMTP_FROM").unwrap_or_else(|_| username.clone()),
            timeout: Duration::from_secs(
                env::var("SMTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .map_err(|e| Error::Config(format!("Invalid SMTP_TIMEOUT_SECS: {e}")))?,
            ),
            accept_invalid_certs: env::var("SMTP_ACCEPT_INVALID_CERTS")
                .is_ok_and(|v| matches!(v.trim(), "1" | "true" | "yes")),
            username,
        })
    }
}

/// Where the maildir, rule files and environment name live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub maildir: PathBuf,
    pub rules: PathBuf,
    pub local_rules: PathBuf,
    pub environment: PathBuf,
}

impl Paths {
    /// The standard layout under `home`.
    #[must_use]
    pub fn under(home: &Path) -> Self {
        Self {
            maildir: home.join("Mail"),
            rules: home.join(".label-mail.yml"),
            local_rules: home.join(".label-mail.local.yml"),
            environment: home.join(".dotfile-environment"),
        }
    }

    /// The standard layout under the current user's home directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the home directory is unknown.
    pub fn default_for_home() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Cannot determine home directory".into()))?;
        Ok(Self::under(&home))
    }
}

/// The active environment name: the first non-empty line of `path`,
/// trimmed. A missing or unreadable file means `""`.
#[must_use]
pub fn read_environment(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string(),
        Err(e) => {
            debug!("No environment name at {}: {}", path.display(), e);
            String::new()
        }
    }
}
