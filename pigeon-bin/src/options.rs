use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use http::{
    HeaderMap,
    header::{HeaderName, HeaderValue},
};
use pigeon_lib::{DEFAULT_MAX_REQUESTS_PER_INTERVAL, DEFAULT_USER_AGENT};

use crate::verbosity::Verbosity;

// these exist because clap requires `&str` type values for defaults
// whereas the library exposes its canonical defaults as `Duration`s
// (a test below keeps them from drifting apart)
const RATE_INTERVAL_STR: &str = "10s";
const SEND_INTERVAL_STR: &str = "5s";

/// pigeon is a fast, asynchronous notifier. It reads messages from standard
/// input, line by line, and fans them out to an HTTP endpoint, one POST
/// request per message.
///
/// pigeon is powered by pigeon-lib, the Rust library for message dispatch.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct PigeonOptions {
    /// Endpoint which receives every message as the body of a POST request
    #[arg(long, env = "PIGEON_URL")]
    pub(crate) url: String,

    /// Pause between two consecutive submissions
    #[arg(
        short,
        long,
        value_parser = humantime::parse_duration,
        default_value = SEND_INTERVAL_STR
    )]
    pub(crate) interval: Duration,

    /// Ceiling on concurrently running deliveries.
    ///
    /// When unset, a ceiling is derived from the process limit on open file
    /// descriptors.
    #[arg(long)]
    pub(crate) max_concurrency: Option<usize>,

    /// Length of the rate limiting window
    #[arg(
        long,
        value_parser = humantime::parse_duration,
        default_value = RATE_INTERVAL_STR
    )]
    pub(crate) rate_interval: Duration,

    /// Number of requests allowed per rate limiting window
    #[arg(long, default_value_t = DEFAULT_MAX_REQUESTS_PER_INTERVAL)]
    pub(crate) max_requests_per_interval: u32,

    /// Request timeout covering the whole HTTP round trip.
    ///
    /// No timeout is applied when unset, and a hanging endpoint will stall
    /// the final drain.
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub(crate) timeout: Option<Duration>,

    /// User agent sent with every request
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    pub(crate) user_agent: String,

    /// Custom request header, e.g. `Authorization: Bearer 123`. Repeatable
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    pub(crate) headers: Vec<String>,

    /// Proceed for server connections considered insecure (invalid TLS)
    #[arg(long)]
    pub(crate) insecure: bool,

    /// Verbose program output
    #[clap(flatten)]
    pub(crate) verbose: Verbosity,
}

impl PigeonOptions {
    /// Collect the repeatable `--header` flags into a header map
    pub(crate) fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for raw in &self.headers {
            let (name, value) = parse_single_header(raw)?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Parse a single header into a [`HeaderName`] and [`HeaderValue`]
///
/// Headers are expected to be in format `Header-Name: Header-Value`.
/// The header name and value are trimmed of whitespace. If the header
/// contains multiple colons, the part after the first colon is considered
/// the value.
fn parse_single_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let Some((name, value)) = header.split_once(':') else {
        return Err(anyhow!(
            "Invalid header format. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        ));
    };
    let name = name.trim();
    let name = HeaderName::from_str(name)
        .map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|e| anyhow!("Unable to read value of header with name '{name}': {e}"))?;
    Ok((name, value))
}
