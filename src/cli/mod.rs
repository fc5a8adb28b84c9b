pub mod run;

use clap::Parser;

/// Each invocation is one sync pass; everything else comes from the settings file.
#[derive(Parser)]
#[command(
    name = "paysync",
    version,
    about = "Mirror card payment notifications from Gmail into a web household ledger."
)]
pub struct Cli {}
