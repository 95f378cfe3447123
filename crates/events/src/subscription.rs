//! Live query subscriptions.
//!
//! A subscriber registers the *identity* of the query it is watching (query
//! name plus optional argument). Projections never address subscribers
//! directly: after a mutation they emit the updated record together with a
//! predicate over query identities, and every subscriber whose query matches
//! receives a copy.

use std::sync::mpsc::Receiver;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Identity of a subscribed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionQuery {
    name: String,
    argument: Option<JsonValue>,
}

impl SubscriptionQuery {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            argument: None,
        }
    }

    pub fn with_argument(name: impl Into<String>, argument: impl Into<JsonValue>) -> Self {
        Self {
            name: name.into(),
            argument: Some(argument.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn argument(&self) -> Option<&JsonValue> {
        self.argument.as_ref()
    }

    /// Argument as a string, when it is one.
    pub fn argument_str(&self) -> Option<&str> {
        self.argument.as_ref().and_then(JsonValue::as_str)
    }
}

/// Handle identifying a registration in a hub.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

/// Receiving side of a live query subscription.
///
/// Dropping it ends the subscription: the hub discards the registration the
/// next time a matching update fails to deliver.
///
/// ## Usage Pattern
///
/// ```ignore
/// let sub = hub.subscribe(SubscriptionQuery::named("findAll"));
///
/// loop {
///     match sub.recv_timeout(Duration::from_secs(1)) {
///         Ok(update) => push_to_client(update)?,
///         Err(RecvTimeoutError::Timeout) => continue,   // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break, // hub dropped
///     }
/// }
/// ```
#[derive(Debug)]
pub struct QuerySubscription<U> {
    id: SubscriptionId,
    query: SubscriptionQuery,
    receiver: Receiver<U>,
}

impl<U> QuerySubscription<U> {
    pub fn new(id: SubscriptionId, query: SubscriptionQuery, receiver: Receiver<U>) -> Self {
        Self {
            id,
            query,
            receiver,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn query(&self) -> &SubscriptionQuery {
        &self.query
    }

    /// Block until the next update is available.
    pub fn recv(&self) -> Result<U, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an update without blocking.
    pub fn try_recv(&self) -> Result<U, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for an update.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<U, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain every update that is already queued.
    pub fn drain(&self) -> Vec<U> {
        self.receiver.try_iter().collect()
    }
}
