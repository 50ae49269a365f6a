//! Flags and setup shared by the `label-mail` and `label-message` commands

use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::Args;
use label_mail::{
    ActionsSummary, CompiledRule, Forwarder, LabelerOptions, Maildir, Paths, SmtpConfig,
    SmtpTransport, load, read_environment,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Args)]
pub struct CommonArgs {
    /// Maildir root (default: ~/Mail)
    #[arg(long)]
    pub maildir: Option<PathBuf>,

    /// Rules file (default: ~/.label-mail.yml)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Local rules overlay (default: ~/.label-mail.local.yml)
    #[arg(long)]
    pub local_rules: Option<PathBuf>,

    /// Report what would be done without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// More logging; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Actually send forwards over SMTP
    #[arg(long)]
    pub allow_forwarding: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl CommonArgs {
    pub fn paths(&self) -> anyhow::Result<Paths> {
        let mut paths = Paths::default_for_home()?;
        if let Some(maildir) = &self.maildir {
            paths.maildir.clone_from(maildir);
        }
        if let Some(rules) = &self.rules {
            paths.rules.clone_from(rules);
        }
        if let Some(local) = &self.local_rules {
            paths.local_rules.clone_from(local);
        }
        Ok(paths)
    }

    pub fn options(&self) -> LabelerOptions {
        LabelerOptions {
            dry_run: self.dry_run,
            allow_forwarding: self.allow_forwarding,
            ..LabelerOptions::default()
        }
    }

    /// SMTP settings are only read when forwarding is allowed.
    pub fn forwarder(&self) -> anyhow::Result<Option<Forwarder<SmtpTransport>>> {
        if !self.allow_forwarding {
            return Ok(None);
        }
        let config = SmtpConfig::from_env()?;
        let from = config.from.clone();
        let forwarder = Forwarder::new(SmtpTransport::new(config), &from)
            .with_context(|| format!("Invalid SMTP_FROM '{from}'"))?;
        Ok(Some(forwarder))
    }
}

pub fn init(verbose: u8) -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("label_mail={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

pub fn load_rules(paths: &Paths) -> anyhow::Result<Vec<CompiledRule>> {
    let env = read_environment(&paths.environment);
    load(&paths.rules, &paths.local_rules, &env)
        .with_context(|| format!("Cannot load rules from {}", paths.rules.display()))
}

pub fn open_maildir(paths: &Paths) -> anyhow::Result<Maildir> {
    if !paths.maildir.is_dir() {
        return Err(anyhow!("Maildir {} does not exist", paths.maildir.display()));
    }
    Ok(Maildir::new(&paths.maildir))
}

/// A token that fires on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current message");
            trigger.cancel();
        }
    });
    token
}

pub fn print_summary(summary: &ActionsSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{summary}");
    }
    Ok(())
}
