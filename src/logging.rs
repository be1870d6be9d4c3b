//! Logging setup for the grader.
//!
//! Log lines go to stderr so stdout stays free for the summary and the
//! autograder JSON. `RUST_LOG` overrides the level picked from `-q`/`--debug`.

use std::io::IsTerminal;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Cli;

fn level(quiet: u8, debug: bool) -> &'static str {
    if debug {
        return "debug";
    }
    match quiet {
        0 => "info",
        1 => "warn",
        2 => "error",
        _ => "off",
    }
}

pub fn init(cli: &Cli) {
    let ansi = match cli.color.as_deref() {
        Some("on") => true,
        Some(_) => false,
        None => std::io::stderr().is_terminal(),
    };
    if cli.color.is_some() {
        colored::control::set_override(ansi);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("cpp_grader={},warn", level(cli.quiet, cli.debug)))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(false)
                .without_time()
                .compact(),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_count_lowers_level() {
        assert_eq!(level(0, false), "info");
        assert_eq!(level(1, false), "warn");
        assert_eq!(level(2, false), "error");
        assert_eq!(level(5, false), "off");
        assert_eq!(level(3, true), "debug");
    }
}
