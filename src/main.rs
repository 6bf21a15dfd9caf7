//! Telepipe CLI entry point.

use anyhow::Context;
use telepipe_lib::cli::{self, Cli};
use telepipe_lib::core::diagnostics::format_user_error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse_args();

    // Execute the command
    cli::execute(cli)
        .await
        .map_err(|e| anyhow::anyhow!(format_user_error(&e)))
        .context("telepipe failed")
}
