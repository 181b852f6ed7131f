//! Store write retry on SQLite lock contention
//!
//! Workers write distinct rows, but WAL still admits one writer at a time, so
//! a commit can see `SQLITE_BUSY` when many results land together. Those are
//! retried here; every other store error surfaces immediately and is fatal to
//! the batch.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use vigil_common::Result;

/// Default upper bound on total time spent retrying one store write
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Doubling backoff between lock retries, 10ms up to 1s
#[derive(Debug, Clone, Copy)]
struct LockBackoff {
    next_ms: u64,
}

impl LockBackoff {
    const FIRST_MS: u64 = 10;
    const CEILING_MS: u64 = 1000;

    fn new() -> Self {
        Self { next_ms: Self::FIRST_MS }
    }

    fn advance(&mut self) -> Duration {
        let wait = Duration::from_millis(self.next_ms);
        self.next_ms = (self.next_ms * 2).min(Self::CEILING_MS);
        wait
    }
}

/// Run `operation`, retrying while the store reports a lock, for at most
/// `max_wait_ms` in total
///
/// The last lock error is returned once the budget is spent. `label` names
/// the write in log lines.
pub async fn retry_on_lock<F, Fut, T>(
    label: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut backoff = LockBackoff::new();
    let mut tries = 0u32;

    loop {
        tries += 1;
        let err = match operation().await {
            Ok(value) => {
                if tries > 1 {
                    debug!(
                        write = label,
                        tries,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Store write went through after lock contention"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_error() => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        if waited >= budget {
            error!(
                write = label,
                tries,
                waited_ms = waited.as_millis() as u64,
                "Store still locked, giving up"
            );
            return Err(err);
        }

        let pause = backoff.advance().min(budget - waited);
        warn!(
            write = label,
            tries,
            pause_ms = pause.as_millis() as u64,
            "Store locked, backing off"
        );
        tokio::time::sleep(pause).await;
    }
}
