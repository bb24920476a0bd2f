//! Handler of message dispatch operations.
//!
//! This module defines two structs, [`Client`] and [`ClientBuilder`].
//! `Client` fans submitted messages out to concurrent delivery workers and
//! reports failures through a replaceable callback. `ClientBuilder` exposes
//! a finer level of granularity for building a `Client`.
#![allow(clippy::module_name_repetitions)]

use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use http::header::{self, HeaderMap, HeaderValue};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use typed_builder::TypedBuilder;

use crate::limits;
use crate::shutdown::StopSignal;
use crate::types::{ErrorKind, Message, Result, SubmitError};
use crate::waiter::WaitGroup;

/// Default ceiling on concurrently running delivery workers, 100.
/// The effective ceiling may be lower, see [`ClientBuilder::max_concurrency`].
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;
/// Default length of the rate limiting window, 10 seconds.
pub const DEFAULT_RATE_INTERVAL: Duration = Duration::from_secs(10);
/// Default number of requests allowed per rate limiting window, 100.
pub const DEFAULT_MAX_REQUESTS_PER_INTERVAL: u32 = 100;
/// Default user agent, `pigeon-<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("pigeon/", env!("CARGO_PKG_VERSION"));

/// Callback invoked with each failed message and the failure itself
type ErrorCallback = Box<dyn Fn(&Message, &ErrorKind) + Send + Sync>;

/// Builder for [`Client`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `ClientBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ClientBuilder`.
"))]
pub struct ClientBuilder {
    /// Endpoint which receives every message as the body of an HTTP `POST`.
    ///
    /// Deliberately kept as an opaque string: a malformed value does not
    /// fail construction but surfaces per message as an "unable to create
    /// request" report, so a misconfigured endpoint and an unreachable one
    /// travel through the same channel.
    url: String,

    /// Ceiling on concurrently running delivery workers.
    ///
    /// When unset, the ceiling is derived at construction time from
    /// [`DEFAULT_MAX_CONCURRENCY`], the process limit on open file
    /// descriptors, and `pool_max_idle_per_host`. Zero is treated as 1.
    max_concurrency: Option<usize>,

    /// Length of the rate limiting window
    #[builder(default = DEFAULT_RATE_INTERVAL)]
    rate_interval: Duration,

    /// Number of requests allowed per rate limiting window.
    ///
    /// Together with `rate_interval` this forms a token bucket: bursts up
    /// to this size go out immediately, after which one slot refills per
    /// window, so no window ever sees more than this many requests. Zero
    /// is treated as 1; a zero `rate_interval` disables throttling
    /// altogether.
    #[builder(default = DEFAULT_MAX_REQUESTS_PER_INTERVAL)]
    max_requests_per_interval: u32,

    /// Per-request timeout covering the whole HTTP round trip.
    /// No timeout is applied when unset
    timeout: Option<Duration>,

    /// Cap on idle connections kept pooled per host. Also considered when
    /// deriving the worker ceiling, since it bounds how many deliveries
    /// the transport can usefully run against one endpoint
    pool_max_idle_per_host: Option<usize>,

    /// User agent sent with every request
    #[builder(default = DEFAULT_USER_AGENT.to_string())]
    user_agent: String,

    /// Extra headers attached to every request (authentication tokens,
    /// routing hints, and the like)
    custom_headers: HeaderMap,

    /// Accept invalid TLS certificates, e.g. for self-signed endpoints on
    /// internal networks
    allow_insecure: bool,
}

impl Default for ClientBuilder {
    #[must_use]
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientBuilder {
    /// The build method instantiates the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the user agent cannot be encoded as a header
    /// value or the HTTP transport cannot be created
    pub fn client(self) -> Result<Client> {
        let Self {
            url,
            max_concurrency,
            rate_interval,
            max_requests_per_interval,
            timeout,
            pool_max_idle_per_host,
            user_agent,
            mut custom_headers,
            allow_insecure,
        } = self;

        custom_headers.insert(header::USER_AGENT, HeaderValue::from_str(&user_agent)?);

        let mut builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(custom_headers)
            .danger_accept_invalid_certs(allow_insecure);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(pool_max_idle_per_host) = pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(pool_max_idle_per_host);
        }
        let http = builder.build().map_err(ErrorKind::BuildHttpClient)?;

        let max_concurrency = match max_concurrency {
            Some(explicit) => explicit.max(1),
            None => limits::optimal_concurrency(pool_max_idle_per_host),
        };

        let burst = NonZeroU32::new(max_requests_per_interval).unwrap_or(NonZeroU32::MIN);
        // one refill per window, burst up to the per-window quota: no
        // window of `rate_interval` ever sees more than `burst` requests
        let quota = Quota::with_period(rate_interval)
            // a zero interval means "do not throttle"
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
            .allow_burst(burst);

        Ok(Client {
            url,
            http,
            max_concurrency,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            gate: Arc::new(Semaphore::new(max_concurrency)),
            stop: StopSignal::new(),
            tasks: WaitGroup::new(),
            error_callback: Arc::new(RwLock::new(Box::new(|_, _| {}))),
        })
    }
}

/// Handles the fan-out of messages to a notification endpoint, with
/// concurrency capping, rate limiting, and cooperative shutdown.
///
/// Use the [`ClientBuilder`] to create a new client.
///
/// Cloning is cheap, and every clone drives the same dispatcher: the
/// clones share the admission gate, the rate limiter, the stop signal,
/// and the error callback.
#[derive(Clone)]
pub struct Client {
    /// Target endpoint for every delivery
    url: String,

    /// reqwest client instance shared by all delivery workers
    http: reqwest::Client,

    /// Effective worker ceiling, after defaults and clamping
    max_concurrency: usize,

    /// Token bucket shared by every worker; the primary form of
    /// backpressure
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,

    /// Admission gate: one permit per running worker, taken without
    /// blocking at submit time
    gate: Arc<Semaphore>,

    /// One-shot stop flag observed by `submit` and by every worker
    stop: StopSignal,

    /// Tracks in-flight workers for [`Client::wait`]
    tasks: WaitGroup,

    /// Replaceable callback observing every failed delivery
    error_callback: Arc<RwLock<ErrorCallback>>,
}

impl Client {
    /// Submits a batch of messages for delivery.
    ///
    /// Admission is synchronous and never blocks: each message either takes
    /// a free worker slot on the spot or the batch is cut short. Delivery
    /// itself happens on background tasks, so this must be called from
    /// within a Tokio runtime.
    ///
    /// Returns the number of messages handed to a delivery worker. Failures
    /// *during* delivery are not returned here; they reach the callback
    /// registered with [`Client::on_error`], together with the affected
    /// message.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Canceled`] after [`Client::stop`]: nothing is
    ///   admitted, and every message of the batch is reported to the error
    ///   callback.
    /// - [`ErrorKind::WorkersLimitExceeded`] when all worker slots are
    ///   taken: messages admitted up to that point keep running, the rest
    ///   of the batch is dropped without any callback invocations.
    pub fn submit<I, T>(&self, messages: I) -> std::result::Result<usize, SubmitError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Message>,
    {
        if self.stop.is_raised() {
            let mut reported = 0;
            for message in messages {
                self.report(&message.into(), &ErrorKind::Canceled);
                reported += 1;
            }
            return Err(SubmitError {
                accepted: reported,
                reason: ErrorKind::Canceled,
            });
        }

        let mut accepted = 0;
        for message in messages {
            let Ok(permit) = Arc::clone(&self.gate).try_acquire_owned() else {
                return Err(SubmitError {
                    accepted,
                    reason: ErrorKind::WorkersLimitExceeded,
                });
            };
            self.spawn_worker(message.into(), permit);
            accepted += 1;
        }
        Ok(accepted)
    }

    /// Trips the stop signal: deliveries waiting on the rate limiter or on
    /// the wire are cut short and every later [`Client::submit`] rejects
    /// its whole batch as canceled. Idempotent, never blocks, and cannot
    /// be undone; in-flight workers are not waited for
    pub fn stop(&self) {
        self.stop.raise();
    }

    /// Whether [`Client::stop`] has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_raised()
    }

    /// Waits until every delivery worker spawned so far has finished.
    ///
    /// Reusable: further submit/wait rounds are fine, and several callers
    /// may wait at once. Resolves immediately when nothing is in flight.
    /// There is no built-in deadline; if the endpoint may hang, bound the
    /// round trip via the builder's `timeout`
    pub async fn wait(&self) {
        self.tasks.wait().await;
    }

    /// Replaces the error callback.
    ///
    /// The callback observes every failed message together with the
    /// failure. It is invoked from delivery workers concurrently and must
    /// synchronize any shared state itself; replacing it affects all
    /// failures reported afterwards. The initial callback does nothing
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Message, &ErrorKind) + Send + Sync + 'static,
    {
        // a panicking callback cannot poison this lock: reports only ever
        // take the read side, and read guards do not poison on unwind
        *self.error_callback.write().unwrap() = Box::new(callback);
    }

    /// Effective ceiling on concurrent delivery workers
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Hands a failed message to the registered error callback
    fn report(&self, message: &Message, error: &ErrorKind) {
        let callback = self.error_callback.read().unwrap();
        (*callback)(message, error);
    }

    fn spawn_worker(&self, message: Message, permit: OwnedSemaphorePermit) {
        // the guard must exist before the task does, so a `wait` racing
        // this spawn still counts the work
        let guard = self.tasks.guard();
        let client = self.clone();
        tokio::spawn(async move {
            // slot and wait counter are released when these drop, whatever
            // path the delivery takes
            let _permit = permit;
            let _guard = guard;
            client.deliver(&message).await;
        });
    }

    /// Runs a single delivery to completion, reporting a failure, if any,
    /// exactly once
    async fn deliver(&self, message: &Message) {
        if let Err(error) = self.try_deliver(message).await {
            log::debug!("delivery failed: {error}");
            self.report(message, &error);
        }
    }

    async fn try_deliver(&self, message: &Message) -> Result<()> {
        let request = self
            .http
            .post(&self.url)
            .body(message.clone())
            .build()
            .map_err(ErrorKind::BuildRequest)?;

        tokio::select! {
            biased;
            () = self.stop.raised() => return Err(ErrorKind::RateLimiterInterrupted),
            () = self.rate_limiter.until_ready() => {}
        }

        tokio::select! {
            biased;
            () = self.stop.raised() => Err(ErrorKind::NetworkRequest(None)),
            result = self.http.execute(request) => {
                // handed over is all that counts here: the status code and
                // the body are not inspected, a 5xx is still a delivered
                // notification
                result.map(drop).map_err(|error| ErrorKind::NetworkRequest(Some(error)))
            }
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("max_concurrency", &self.max_concurrency)
            .field("stopped", &self.stop.is_raised())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use http::header::HeaderMap;
    use pretty_assertions::assert_eq;

    use super::{Client, ClientBuilder, DEFAULT_MAX_CONCURRENCY, DEFAULT_USER_AGENT};
    use crate::{ErrorKind, Message, mock_server, test_utils::ErrorLog};

    fn client_for(url: impl Into<String>) -> Client {
        ClientBuilder::builder().url(url).build().client().unwrap()
    }

    #[tokio::test]
    async fn default_client_is_ready_to_go() {
        let client = ClientBuilder::default().client().unwrap();
        assert!(client.max_concurrency() >= 1);
        assert!(client.max_concurrency() <= DEFAULT_MAX_CONCURRENCY);
        assert!(!client.is_stopped());
    }

    #[tokio::test]
    async fn explicit_concurrency_is_taken_verbatim() {
        let client = ClientBuilder::builder()
            .max_concurrency(DEFAULT_MAX_CONCURRENCY * 10)
            .build()
            .client()
            .unwrap();
        assert_eq!(client.max_concurrency(), DEFAULT_MAX_CONCURRENCY * 10);
    }

    #[tokio::test]
    async fn zero_concurrency_is_coerced_to_one() {
        let client = ClientBuilder::builder()
            .max_concurrency(0)
            .build()
            .client()
            .unwrap();
        assert_eq!(client.max_concurrency(), 1);
    }

    #[tokio::test]
    async fn pool_size_feeds_the_derived_ceiling() {
        let client = ClientBuilder::builder()
            .pool_max_idle_per_host(3)
            .build()
            .client()
            .unwrap();
        assert_eq!(client.max_concurrency(), 3);

        // an explicit ceiling wins over the pool hint
        let client = ClientBuilder::builder()
            .pool_max_idle_per_host(3)
            .max_concurrency(7)
            .build()
            .client()
            .unwrap();
        assert_eq!(client.max_concurrency(), 7);
    }

    #[tokio::test]
    async fn delivers_a_whole_batch() {
        let mock_server = mock_server!(StatusCode::OK);
        let errors = ErrorLog::new();
        let client = client_for(mock_server.uri());
        client.on_error(errors.handler());

        let accepted = client.submit(["first", "second", "third"]).unwrap();
        assert_eq!(accepted, 3);

        client.wait().await;
        assert!(errors.is_empty());

        let requests = mock_server.received_requests().await.unwrap();
        let mut bodies: Vec<String> = requests
            .iter()
            .map(|request| String::from_utf8_lossy(&request.body).into_owned())
            .collect();
        bodies.sort();
        assert_eq!(bodies, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn error_statuses_still_count_as_delivered() {
        let mock_server = mock_server!(StatusCode::INTERNAL_SERVER_ERROR);
        let errors = ErrorLog::new();
        let client = client_for(mock_server.uri());
        client.on_error(errors.handler());

        assert_eq!(client.submit(["boom"]).unwrap(), 1);
        client.wait().await;

        assert!(errors.is_empty());
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn user_agent_and_custom_headers_reach_the_wire() {
        let mock_server = mock_server!(StatusCode::OK);
        let mut custom = HeaderMap::new();
        custom.insert("x-api-token", "s3cr3t".parse().unwrap());

        let client = ClientBuilder::builder()
            .url(mock_server.uri())
            .custom_headers(custom)
            .build()
            .client()
            .unwrap();
        assert_eq!(client.submit(["ping"]).unwrap(), 1);
        client.wait().await;

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].headers.get("user-agent").unwrap(),
            DEFAULT_USER_AGENT
        );
        assert_eq!(requests[0].headers.get("x-api-token").unwrap(), "s3cr3t");
    }

    #[tokio::test]
    async fn stopped_client_reports_the_whole_batch() {
        let errors = ErrorLog::new();
        let client = client_for("http://localhost:8080");
        client.on_error(errors.handler());

        client.stop();
        client.stop(); // a second stop is a no-op
        assert!(client.is_stopped());

        let cut_short = client.submit(["a", "b", "c"]).unwrap_err();
        assert_eq!(cut_short.accepted, 3);
        assert_eq!(cut_short.reason, ErrorKind::Canceled);

        let reports = errors.reports();
        assert_eq!(reports.len(), 3);
        for (index, expected) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(reports[index].0, Message::from(*expected));
            assert_eq!(reports[index].1, "Client context canceled");
        }
    }

    #[tokio::test]
    async fn full_gate_cuts_the_batch_and_drops_the_tail() {
        let mock_server = mock_server!(StatusCode::OK, set_delay(Duration::from_millis(400)));
        let errors = ErrorLog::new();
        let client = ClientBuilder::builder()
            .url(mock_server.uri())
            .max_concurrency(2)
            .build()
            .client()
            .unwrap();
        client.on_error(errors.handler());

        let cut_short = client.submit(["a", "b", "c", "d"]).unwrap_err();
        assert_eq!(cut_short.accepted, 2);
        assert_eq!(cut_short.reason, ErrorKind::WorkersLimitExceeded);

        client.wait().await;
        // the dropped tail causes no reports and no requests
        assert!(errors.is_empty());
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_url_fails_per_message_not_at_submit() {
        let errors = ErrorLog::new();
        let client = client_for("%");
        client.on_error(errors.handler());

        assert_eq!(client.submit(["payload"]).unwrap(), 1);
        client.wait().await;

        let reports = errors.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, Message::from("payload"));
        assert_eq!(reports[0].1, "unable to create request");
    }

    #[tokio::test]
    async fn transport_failures_reach_the_callback() {
        let errors = ErrorLog::new();
        let client = client_for("http://127.0.0.1:0/");
        client.on_error(errors.handler());

        assert_eq!(client.submit(["lost"]).unwrap(), 1);
        client.wait().await;

        let reports = errors.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1, "unable to do request");
    }

    #[tokio::test]
    async fn a_window_admits_no_more_than_its_quota() {
        let mock_server = mock_server!(StatusCode::OK);
        let client = ClientBuilder::builder()
            .url(mock_server.uri())
            .rate_interval(Duration::from_secs(2))
            .max_requests_per_interval(2_u32)
            .build()
            .client()
            .unwrap();

        assert_eq!(client.submit(["a", "b", "c", "d", "e"]).unwrap(), 5);

        // the burst goes out at once; nothing else may leave before the
        // window rolls over
        tokio::time::sleep(Duration::from_millis(1_800)).await;
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);

        // cut the queued deliveries short instead of sitting out their
        // windows
        client.stop();
        client.wait().await;
    }

    #[tokio::test]
    async fn stop_interrupts_rate_limited_deliveries() {
        let mock_server = mock_server!(StatusCode::OK);
        let errors = ErrorLog::new();
        let client = ClientBuilder::builder()
            .url(mock_server.uri())
            .rate_interval(Duration::from_secs(60))
            .max_requests_per_interval(1_u32)
            .build()
            .client()
            .unwrap();
        client.on_error(errors.handler());

        // one burst token: the first delivery goes out, the others queue
        assert_eq!(client.submit(["first", "second", "third"]).unwrap(), 3);
        tokio::time::sleep(Duration::from_millis(200)).await;
        client.stop();
        client.wait().await;

        let reports = errors.reports();
        assert_eq!(reports.len(), 2);
        let mut interrupted: Vec<String> = reports
            .iter()
            .map(|(message, error)| {
                assert_eq!(error, "rate limiter error");
                message.to_string()
            })
            .collect();
        interrupted.sort();
        assert_eq!(interrupted, ["second", "third"]);
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn client_is_reusable_after_a_wait() {
        let mock_server = mock_server!(StatusCode::OK);
        let errors = ErrorLog::new();
        let client = client_for(mock_server.uri());
        client.on_error(errors.handler());

        assert_eq!(client.submit(["one"]).unwrap(), 1);
        client.wait().await;
        assert_eq!(client.submit(["two"]).unwrap(), 1);
        client.wait().await;

        assert!(errors.is_empty());
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replacing_the_callback_moves_later_reports() {
        let first = ErrorLog::new();
        let second = ErrorLog::new();
        let client = client_for("http://localhost:8080");

        client.on_error(first.handler());
        client.on_error(second.handler());

        client.stop();
        let _ = client.submit(["x"]);

        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
    }
}
