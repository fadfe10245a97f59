//! Interactive REPL for kiln CLI.
//!
//! Lines are collected until `go`, then wrapped in an entry function and
//! executed as one module. State carries over: each `go` runs in a new frame
//! that sees everything earlier frames registered.

use std::io::{self, BufRead};

use crate::callback::TerminalCallback;
use crate::colors;
use crate::options::BuildArgs;

/// A line that controls the REPL instead of being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Go,
    Clear,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "go" => Some(Self::Go),
            "clear" => Some(Self::Clear),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Wrap collected statements in a module with an entry point.
fn wrap(body: &str) -> String {
    format!(
        "#![allow(unused)]\n\
         use kiln::prelude::*;\n\
         \n\
         #[kiln::entry]\n\
         fn main(ctx: &Context) {{\n\
         {body}\n\
         }}\n"
    )
}

/// Execute the repl command.
pub fn execute(args: &BuildArgs, verbose: bool) -> anyhow::Result<()> {
    let mut engine = args.engine(TerminalCallback::new(verbose, true))?;
    if !engine.config().link_sdk {
        tracing::warn!("--no-sdk is set; `ctx` and `log!` will not resolve in REPL code");
    }

    colors::header("Kiln REPL", "type Rust statements");
    println!(
        "{}`ctx` is the module context. Commands: go, clear, quit{}",
        colors::DIM,
        colors::RESET
    );

    let mut buffer = String::new();
    let mut lines = io::stdin().lock().lines();

    loop {
        let prompt = if buffer.is_empty() { "kiln> " } else { "  ... " };
        print!("{}", prompt);
        colors::flush_stdout();

        let Some(line) = lines.next() else {
            println!();
            break;
        };
        let line = line?;

        match Command::parse(&line) {
            Some(Command::Quit) => break,
            Some(Command::Clear) => {
                buffer.clear();
                println!("{}Cleared{}", colors::DIM, colors::RESET);
            }
            Some(Command::Go) => {
                if buffer.trim().is_empty() {
                    println!("{}Nothing to run{}", colors::DIM, colors::RESET);
                    continue;
                }
                // Errors are already reported by the callback; keep going.
                let _ = engine.execute(&wrap(&buffer));
                buffer.clear();
            }
            None => {
                buffer.push_str(&line);
                buffer.push('\n');
            }
        }
    }

    engine.teardown();
    Ok(())
}
