#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Apply labeling rules to a single message

mod common;

use clap::Parser;
use common::CommonArgs;
use label_mail::Labeler;

#[derive(Parser)]
#[command(name = "label-message")]
#[command(about = "Run the labeling rules against one message")]
struct Args {
    /// Folder holding the message (e.g. INBOX)
    folder: String,

    /// On-disk filename of the message, flags included
    filename: String,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    common::init(args.common.verbose)?;

    let paths = args.common.paths()?;
    let maildir = common::open_maildir(&paths)?;
    let rules = common::load_rules(&paths)?;

    let labeler = Labeler::new(&rules, args.common.forwarder()?, args.common.options())
        .with_cancellation(common::cancel_on_ctrl_c());
    let summary = labeler
        .label_message(&maildir, &args.folder, &args.filename)
        .await?;

    common::print_summary(&summary, args.common.json)
}
