use anyhow::{Context, Result};
use pigeon_lib::{Client, ClientBuilder};

use crate::options::PigeonOptions;

/// Creates a client according to the command-line config
pub(crate) fn create(opts: &PigeonOptions) -> Result<Client> {
    let headers = opts.header_map()?;

    ClientBuilder::builder()
        .url(opts.url.clone())
        .max_concurrency(opts.max_concurrency)
        .rate_interval(opts.rate_interval)
        .max_requests_per_interval(opts.max_requests_per_interval)
        .timeout(opts.timeout)
        .user_agent(opts.user_agent.clone())
        .custom_headers(headers)
        .allow_insecure(opts.insecure)
        .build()
        .client()
        .context("Failed to create request client")
}
