//! In-process registry of live query subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, mpsc};

use tracing::debug;

use crate::subscription::{QuerySubscription, SubscriptionId, SubscriptionQuery};

struct Subscriber<U> {
    id: SubscriptionId,
    query: SubscriptionQuery,
    sink: mpsc::Sender<U>,
}

/// Fan-out hub for read-model updates.
///
/// - No IO / no async
/// - Matching is structural (a predicate over the subscribed query), so one
///   mutation reaches zero, one or many subscribers
/// - Disconnected sinks are dropped while emitting
pub struct QueryUpdateHub<U> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber<U>>>,
}

impl<U> QueryUpdateHub<U> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber<U>>> {
        // A panicking subscriber cannot leave the list half-updated.
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register interest in `query`; updates arrive on the returned handle.
    pub fn subscribe(&self, query: SubscriptionQuery) -> QuerySubscription<U> {
        let (tx, rx) = mpsc::channel();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.lock().push(Subscriber {
            id,
            query: query.clone(),
            sink: tx,
        });

        debug!(subscription = id.0, query = query.name(), "query subscription registered");
        QuerySubscription::new(id, query, rx)
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

impl<U: Clone> QueryUpdateHub<U> {
    /// Push `update` to every subscriber whose query satisfies `matcher`.
    ///
    /// Returns the number of sinks the update was delivered to.
    pub fn emit<F>(&self, matcher: F, update: &U) -> usize
    where
        F: Fn(&SubscriptionQuery) -> bool,
    {
        let mut delivered = 0;
        self.lock().retain(|s| {
            if !matcher(&s.query) {
                return true;
            }
            match s.sink.send(update.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(subscription = s.id.0, "dropping disconnected query subscription");
                    false
                }
            }
        });
        delivered
    }
}

impl<U> Default for QueryUpdateHub<U> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<U> core::fmt::Debug for QueryUpdateHub<U> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueryUpdateHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
