//! Terminal reporting of engine progress.

use std::time::Duration;

use kiln_core::{BuildStep, EngineCallback, Error, FrameId};

use crate::colors;

/// Prints engine events to the terminal.
#[derive(Debug, Clone, Copy)]
pub struct TerminalCallback {
    /// Stream every toolchain line, not just the log of failed builds.
    verbose: bool,
    /// Print errors as they happen. Off when the command returns them instead.
    report_errors: bool,
}

impl TerminalCallback {
    pub fn new(verbose: bool, report_errors: bool) -> Self {
        Self {
            verbose,
            report_errors,
        }
    }
}

impl EngineCallback for TerminalCallback {
    fn on_build_started(&self, sequence: u64) {
        println!("{}Building module {}...{}", colors::DIM, sequence, colors::RESET);
    }

    fn on_build_output(&self, step: BuildStep, line: &str) {
        if self.verbose {
            println!("{}[{}]{} {}", colors::DIM, step, colors::RESET, line);
        }
    }

    fn on_build_finished(&self, sequence: u64, elapsed: Duration) {
        println!(
            "{}Built{} module {} in {:.2}s",
            colors::GREEN,
            colors::RESET,
            sequence,
            elapsed.as_secs_f64()
        );
    }

    fn on_frame_created(&self, frame: FrameId) {
        println!("{}Running in frame {}{}", colors::DIM, frame, colors::RESET);
    }

    fn on_module_log(&self, frame: FrameId, message: &str) {
        println!("{}[{}]{} {}", colors::CYAN, frame, colors::RESET, message);
    }

    fn on_error(&self, error: &Error) {
        // Without -v the toolchain output has not been shown yet.
        if !self.verbose
            && let Error::Build(build) = error
            && let Some(log) = build.log()
        {
            eprintln!("{}", log.trim_end());
        }

        if self.report_errors {
            eprintln!("{}Error:{} {}", colors::RED, colors::RESET, error.with_hint());
        }
    }
}
