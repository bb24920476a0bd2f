//! `pigeon` is a library for fanning out notification messages over HTTP.
//!
//! Messages are submitted in batches and delivered concurrently, each one as
//! the body of a `POST` request to a single configured endpoint. Delivery is
//! fire-and-forget: [`Client::submit`] only reports whether messages were
//! admitted, and anything that fails later reaches the callback registered
//! with [`Client::on_error`] instead.
//! ```rust,no_run
//! use pigeon_lib::{ClientBuilder, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let client = ClientBuilder::builder()
//!       .url("http://localhost:8080")
//!       .build()
//!       .client()?;
//!   client.on_error(|message, error| eprintln!("delivery of {message} failed: {error}"));
//!   if let Err(cut_short) = client.submit(["on my way"]) {
//!       eprintln!("{cut_short}");
//!   }
//!   client.wait().await;
//!   Ok(())
//! }
//! ```
// #![deny(missing_docs)]

#[cfg(doctest)]
doc_comment::doctest!("../../README.md");

mod client;
mod limits;
mod shutdown;
mod types;
mod waiter;

#[cfg(test)]
#[macro_use]
pub mod test_utils;

pub use client::{
    Client, ClientBuilder, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_REQUESTS_PER_INTERVAL,
    DEFAULT_RATE_INTERVAL, DEFAULT_USER_AGENT,
};
pub use types::*;
