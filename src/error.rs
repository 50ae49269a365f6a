//! Error types for label-mail

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message parsing error: {0}")]
    Parse(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Pass cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the failure is worth retrying on a later pass.
    ///
    /// Only delivery problems qualify; a bad rule file or an unreadable
    /// folder will fail the same way next time.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Smtp(_))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(format!("Invalid rules file: {err}"))
    }
}

impl From<mailparse::MailParseError> for Error {
    fn from(err: mailparse::MailParseError) -> Self {
        Self::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_smtp_errors_are_transient() {
        assert!(Error::Smtp("timeout".into()).is_transient());
        assert!(!Error::Config("missing".into()).is_transient());
        assert!(!Error::Parse("bad date".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn yaml_errors_become_config_errors() {
        let err = serde_yaml::from_str::<Vec<String>>("{not: a list}").unwrap_err();
        assert!(matches!(Error::from(err), Error::Config(_)));
    }
}
