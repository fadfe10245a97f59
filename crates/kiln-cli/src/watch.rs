//! Watch command implementation for kiln CLI.
//!
//! Re-executes a source file every time it changes. Every execution becomes a
//! new frame, so values registered by earlier runs stay visible to later ones.

use std::path::Path;

use kiln_core::{WatchLoop, WatchOptions};

use crate::callback::TerminalCallback;
use crate::colors;
use crate::options::BuildArgs;

/// Execute the watch command.
pub async fn execute(
    file: &Path,
    args: &BuildArgs,
    run_now: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let mut engine = args.engine(TerminalCallback::new(verbose, true))?;

    let mut watch = WatchLoop::new().map_err(kiln_core::Error::from)?;
    watch
        .watch(
            file,
            WatchOptions {
                run_now,
                auto_reload: true,
            },
        )
        .map_err(kiln_core::Error::from)?;

    colors::header("Kiln Watch", &file.display().to_string());
    println!(
        "{}Watching for changes... (Ctrl+C to stop){}",
        colors::DIM,
        colors::RESET
    );
    println!();

    watch
        .run_until(&mut engine, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    println!(
        "\n{}Stopping after {} frames{}",
        colors::DIM,
        engine.frame_count() - 1,
        colors::RESET
    );
    engine.teardown();
    Ok(())
}
