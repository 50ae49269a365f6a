#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Apply labeling rules to every recent message in a maildir

mod common;

use clap::Parser;
use common::CommonArgs;
use label_mail::{Labeler, Vacuum, VacuumReport};

#[derive(Parser)]
#[command(name = "label-mail")]
#[command(about = "Label, file and forward mail in a local maildir by rule")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Scan every message, not just those modified in the last 2 hours
    #[arg(long)]
    all: bool,

    /// Retire unwanted folders and tidy keyword headers instead of
    /// applying rules
    #[arg(long)]
    vacuum: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    common::init(args.common.verbose)?;

    let paths = args.common.paths()?;
    let maildir = common::open_maildir(&paths)?;
    let cancel = common::cancel_on_ctrl_c();

    if args.vacuum {
        let report = Vacuum::new(args.common.dry_run)
            .with_cancellation(cancel)
            .run(&maildir)?;
        return print_report(&report, args.common.json);
    }

    let rules = common::load_rules(&paths)?;
    let mut options = args.common.options();
    if args.all {
        options.recent = None;
    }

    let labeler = Labeler::new(&rules, args.common.forwarder()?, options).with_cancellation(cancel);
    let summary = labeler.label_messages(&maildir).await?;

    common::print_summary(&summary, args.common.json)
}

fn print_report(report: &VacuumReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Folders removed:    {}", report.folders_removed.len());
    for folder in &report.folders_removed {
        println!("  {folder}");
    }
    println!("Messages moved:     {}", report.messages_moved);
    println!("Messages rewritten: {}", report.messages_rewritten);
    if report.failures > 0 {
        println!("Failures:           {}", report.failures);
    }
    Ok(())
}
