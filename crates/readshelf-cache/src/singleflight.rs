//! Request coalescing for concurrent computations of the same key.
//!
//! The first caller for a key becomes the leader and runs the computation;
//! callers arriving while it runs become followers and receive a clone of
//! the leader's result without running the computation themselves. If a
//! leader is cancelled before publishing, one waiting follower is promoted
//! to leader and the computation runs again.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;

/// One in-progress computation. The leader holds the slot's lock for the
/// duration of the work; followers block on the lock and read the published
/// result. An unlocked slot still holding `None` means the leader was
/// cancelled before publishing.
struct Flight<T> {
    slot: Mutex<Option<T>>,
}

/// Coalesces concurrent calls per key within this process.
///
/// Keys are independent; only callers of the same key coalesce. Results are
/// broadcast by `Clone`, so errors must be cloneable too (wrap them in `Arc`
/// or use a cloneable error type).
pub struct SingleFlight<T> {
    flights: DashMap<String, Arc<Flight<T>>>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            flights: DashMap::new(),
        }
    }

    /// Number of computations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Run `func` for `key`, coalescing with any concurrent call for the
    /// same key. At most one invocation of `func` runs per flight; every
    /// coalesced caller receives a clone of the same result.
    pub async fn work<F, Fut>(&self, key: &str, func: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut func = Some(func);
        loop {
            let existing = self.flights.get(key).map(|f| Arc::clone(f.value()));
            if let Some(flight) = existing {
                let guard = flight.slot.lock().await;
                if let Some(result) = guard.as_ref() {
                    return result.clone();
                }
                // The leader was cancelled without publishing. Clear the
                // stale flight (if it is still the current one) and retry;
                // exactly one retrier wins the next leadership.
                drop(guard);
                self.flights
                    .remove_if(key, |_, f| Arc::ptr_eq(f, &flight));
                continue;
            }

            let flight = Arc::new(Flight {
                slot: Mutex::new(None),
            });
            // Lock before publishing so no follower can ever observe this
            // flight unlocked and empty while the leader is alive.
            let mut guard = flight
                .slot
                .try_lock()
                .expect("freshly created flight is uncontended");
            match self.flights.entry(key.to_owned()) {
                Entry::Occupied(_) => {
                    // Lost the race to another leader; rejoin as follower.
                    drop(guard);
                    continue;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&flight));
                }
            }

            let result = (func.take().expect("leader runs at most once"))().await;
            *guard = Some(result.clone());
            drop(guard);
            self.flights
                .remove_if(key, |_, f| Arc::ptr_eq(f, &flight));
            return result;
        }
    }
}
