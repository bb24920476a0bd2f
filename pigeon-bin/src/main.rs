//! `pigeon` is a fast, asynchronous notifier.
//! It reads messages from standard input, line by line, and fans them out to
//! an HTTP endpoint, one `POST` request per message.
//!
//! The pigeon binary is a thin wrapper around pigeon-lib, which does the
//! actual dispatch: concurrency capping, rate limiting, and failure
//! reporting.
//!
//! Send a one-off notification:
//! ```sh
//! echo "deploy finished" | pigeon --url https://hooks.example.com/notify
//! ```
//!
//! Follow a log file and forward a line every second:
//! ```sh
//! tail -f app.log | pigeon --url http://localhost:8080 --interval 1s
//! ```
//!
//! Exercise it locally against the bundled echo sink:
//! ```sh
//! pigeon-sink --addr 127.0.0.1:8080 &
//! echo "on my way" | pigeon --url http://127.0.0.1:8080
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Error, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use pigeon_lib::{Client, ErrorKind};

use crate::logging::init_logging;
use crate::options::PigeonOptions;

mod client;
mod logging;
mod options;
mod verbosity;

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator, e.g. a client that cannot be constructed.
    // Usage errors exit with 2 through clap itself.
    #[allow(unused)]
    UnexpectedFailure = 1,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    // See: https://doc.rust-lang.org/stable/std/process/fn.exit.html
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Set up runtime and call pigeon entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = PigeonOptions::parse();
    init_logging(&opts.verbose);

    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(run(&opts)) {
        Err(e) if Some(io::ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
/// This is helpful for troubleshooting the root cause of an error.
/// Code is taken from the anyhow documentation.
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Run the notifier on the messages arriving on standard input
async fn run(opts: &PigeonOptions) -> Result<i32> {
    let client = client::create(opts)?;

    let failed = Arc::new(AtomicUsize::new(0));
    let failures = Arc::clone(&failed);
    client.on_error(move |message, error| {
        failures.fetch_add(1, Ordering::Relaxed);
        error!("{error}: {message}");
    });

    let submitted = feed_from_stdin(&client, opts.interval).await?;

    // admitted deliveries drain before the process exits
    client.wait().await;

    let failed = failed.load(Ordering::Relaxed);
    info!("done, {submitted} message(s) submitted, {failed} failed");
    Ok(ExitCode::Success as i32)
}

/// Forward stdin to the client, one line per message, pausing `interval`
/// between submissions. Returns the number of messages handed to workers.
async fn feed_from_stdin(client: &Client, interval: Duration) -> Result<usize> {
    // Trip the stop signal on Ctrl-C: deliveries parked on the rate limiter
    // abort right away instead of sitting out the rest of their window.
    let watcher = client.clone();
    let mut interrupted = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, draining in-flight deliveries");
            watcher.stop();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut submitted = 0;

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut interrupted => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            // stdin is drained
            break;
        };

        match client.submit([line]) {
            Ok(count) => submitted += count,
            Err(cut_short) => {
                warn!("{cut_short}");
                // messages admitted before the gate filled up still count
                if cut_short.reason == ErrorKind::WorkersLimitExceeded {
                    submitted += cut_short.accepted;
                }
            }
        }

        tokio::select! {
            biased;
            _ = &mut interrupted => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    Ok(submitted)
}
