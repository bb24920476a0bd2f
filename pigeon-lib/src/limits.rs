//! Derivation of the default worker ceiling from process resource limits
//! and transport configuration.

use rlimit::Resource;

use crate::client::DEFAULT_MAX_CONCURRENCY;

/// Derives the worker ceiling used when a [`crate::ClientBuilder`] does not
/// pin one down explicitly.
///
/// Every in-flight delivery holds at least one socket, so the default of
/// [`DEFAULT_MAX_CONCURRENCY`] is clamped to the process soft limit on open
/// file descriptors and, when configured, to the connection pool's per-host
/// size. Never returns zero.
pub(crate) fn optimal_concurrency(pool_max_idle_per_host: Option<usize>) -> usize {
    let mut ceiling = DEFAULT_MAX_CONCURRENCY;

    if let Some(open_files) = fd_soft_limit() {
        ceiling = ceiling.min(open_files);
    }

    if let Some(per_host) = pool_max_idle_per_host {
        if per_host > 0 {
            ceiling = ceiling.min(per_host);
        }
    }

    let ceiling = ceiling.max(1);
    log::debug!("derived a ceiling of {ceiling} concurrent deliveries");
    ceiling
}

/// Soft limit on open file descriptors, if the process can read it
fn fd_soft_limit() -> Option<usize> {
    let (soft, _hard) = Resource::NOFILE.get().ok()?;
    usize::try_from(soft).ok()
}
