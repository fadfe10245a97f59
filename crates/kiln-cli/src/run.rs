//! Run command implementation for kiln CLI.
//!
//! Builds a source file, executes it once and tears everything down.

use std::path::Path;
use std::time::Instant;

use crate::callback::TerminalCallback;
use crate::colors;
use crate::options::BuildArgs;

/// Execute the run command.
pub fn execute(file: &Path, args: &BuildArgs, verbose: bool) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut engine = args.engine(TerminalCallback::new(verbose, false))?;

    colors::header("Kiln Run", &file.display().to_string());
    let frame = engine.execute_file(file)?;

    println!("{}", "─".repeat(50));
    println!(
        "{}Completed{} frame {} in {:.2}s",
        colors::GREEN,
        colors::RESET,
        frame,
        start.elapsed().as_secs_f64()
    );

    engine.teardown();
    Ok(())
}
