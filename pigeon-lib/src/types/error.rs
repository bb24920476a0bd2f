use std::hash::Hash;
use thiserror::Error;

/// Possible errors when dispatching messages with `pigeon_lib`.
///
/// Errors fall into three groups: rejections surfaced by
/// [`Client::submit`](crate::Client::submit) (`Canceled`,
/// `WorkersLimitExceeded`), per-message delivery failures handed to the
/// error callback (everything [`is_send_error`](ErrorKind::is_send_error)
/// reports `true` for), and construction failures out of
/// [`ClientBuilder::client`](crate::ClientBuilder::client).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The client was stopped; no further messages are accepted or delivered
    #[error("Client context canceled")]
    Canceled,
    /// Every delivery slot was taken when the message arrived
    #[error("Workers limit exceeded")]
    WorkersLimitExceeded,
    /// Building the outgoing request failed before any I/O happened,
    /// typically because the configured endpoint is not a valid URL
    #[error("unable to create request")]
    BuildRequest(#[source] reqwest::Error),
    /// The wait for a rate limiter permit was cut short by a stop
    #[error("rate limiter error")]
    RateLimiterInterrupted,
    /// The HTTP round trip failed (connect, TLS, timeout), or a stop
    /// aborted it mid-flight, in which case there is no underlying cause
    #[error("unable to do request")]
    NetworkRequest(#[source] Option<reqwest::Error>),
    /// The configured user agent or a custom header is not a valid header value
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// The HTTP transport required for deliveries cannot be created
    #[error("Failed to build the request client: {0}")]
    BuildHttpClient(#[source] reqwest::Error),
}

impl ErrorKind {
    /// `true` when the error came out of a delivery worker: the message was
    /// admitted, but could not be handed to the endpoint.
    ///
    /// The precise stage shows up in the display text and, where one
    /// exists, the underlying cause stays reachable through
    /// [`std::error::Error::source`].
    #[must_use]
    pub const fn is_send_error(&self) -> bool {
        matches!(
            self,
            Self::BuildRequest(_) | Self::RateLimiterInterrupted | Self::NetworkRequest(_)
        )
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Canceled, Self::Canceled)
            | (Self::WorkersLimitExceeded, Self::WorkersLimitExceeded)
            | (Self::InvalidHeader(_), Self::InvalidHeader(_))
            | (Self::BuildHttpClient(_), Self::BuildHttpClient(_)) => true,
            // Delivery failures compare as one class. The failure stage and
            // the wrapped cause are informational; what callers branch on is
            // "the message was admitted and still did not make it".
            (left, right) => left.is_send_error() && right.is_send_error(),
        }
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        // One bucket per failure class, in agreement with `PartialEq`
        match self {
            Self::Canceled => state.write_u8(0),
            Self::WorkersLimitExceeded => state.write_u8(1),
            Self::InvalidHeader(_) => state.write_u8(2),
            Self::BuildHttpClient(_) => state.write_u8(3),
            Self::BuildRequest(_) | Self::RateLimiterInterrupted | Self::NetworkRequest(_) => {
                state.write_u8(4);
            }
        }
    }
}

/// Returned by [`Client::submit`](crate::Client::submit) when a batch was
/// cut short.
///
/// `accepted` counts the messages that were still handled: admitted to a
/// delivery worker or, after a stop, reported to the error callback. The
/// remainder of the batch was dropped without side effects, so callers that
/// care about the tail can resubmit everything past `accepted`.
#[derive(Error, Debug)]
#[error("batch cut short after {accepted} message(s): {reason}")]
pub struct SubmitError {
    /// Number of messages handled before the cut-off
    pub accepted: usize,
    /// Why the rest of the batch was not admitted
    #[source]
    pub reason: ErrorKind,
}
