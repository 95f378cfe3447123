use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use pedalstream_events::{
    EventEnvelope, Projection, ProjectionBatch, ProjectionError, QuerySubscription, QueryUpdateHub, ReplayStatus,
    SubscriptionQuery,
};
use pedalstream_rental::{BikeStatus, BikeStatusNamedQueries, RentalEvent, RentalStatus};

use crate::read_model::{ReadModelError, ReadModelStore};

/// Bike status projection.
///
/// Folds rental events into one `BikeStatus` per bike and pushes every
/// change to `findAll` subscribers and to `findOne` subscribers of that bike.
/// A batch stages its changes in an overlay; the store is written and
/// subscribers are notified only when the batch commits.
/// Read models are disposable and rebuildable from the event stream.
pub struct BikeStatusProjection<S>
where
    S: ReadModelStore<String, BikeStatus>,
{
    store: S,
    updates: Arc<QueryUpdateHub<BikeStatus>>,
}

impl<S> BikeStatusProjection<S>
where
    S: ReadModelStore<String, BikeStatus>,
{
    pub const NAME: &'static str = "bike-status";

    pub fn new(store: S, updates: Arc<QueryUpdateHub<BikeStatus>>) -> Self {
        Self { store, updates }
    }

    pub fn updates(&self) -> &Arc<QueryUpdateHub<BikeStatus>> {
        &self.updates
    }

    pub fn find_all(&self) -> Result<Vec<BikeStatus>, ReadModelError> {
        self.store.list()
    }

    /// Available bikes of a type.
    pub fn find_available(&self, bike_type: &str) -> Result<Vec<BikeStatus>, ReadModelError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|b| b.bike_type == bike_type && b.status == RentalStatus::Available)
            .collect())
    }

    pub fn find_one(&self, bike_id: &str) -> Result<Option<BikeStatus>, ReadModelError> {
        self.store.get(&bike_id.to_string())
    }

    pub fn count_by_type(&self, bike_type: &str) -> Result<u64, ReadModelError> {
        Ok(self
            .store
            .list()?
            .iter()
            .filter(|b| b.bike_type == bike_type)
            .count() as u64)
    }

    pub fn subscribe_all(&self) -> QuerySubscription<BikeStatus> {
        self.updates
            .subscribe(SubscriptionQuery::named(BikeStatusNamedQueries::FIND_ALL))
    }

    pub fn subscribe_one(&self, bike_id: &str) -> QuerySubscription<BikeStatus> {
        self.updates.subscribe(SubscriptionQuery::with_argument(
            BikeStatusNamedQueries::FIND_ONE,
            bike_id,
        ))
    }

    fn emit(&self, status: &BikeStatus, include_find_one: bool) {
        self.updates
            .emit(|q| q.name() == BikeStatusNamedQueries::FIND_ALL, status);
        if include_find_one {
            self.updates.emit(
                |q| {
                    q.name() == BikeStatusNamedQueries::FIND_ONE
                        && q.argument_str() == Some(status.bike_id.as_str())
                },
                status,
            );
        }
    }
}

impl<S> Projection for BikeStatusProjection<S>
where
    S: ReadModelStore<String, BikeStatus>,
{
    fn name(&self) -> &str {
        Self::NAME
    }

    fn event_types(&self) -> &[&'static str] {
        RentalEvent::ALL_TYPES
    }

    fn begin(&self) -> Box<dyn ProjectionBatch + '_> {
        Box::new(BikeStatusBatch {
            projection: self,
            staged: BTreeMap::new(),
            effects: Vec::new(),
        })
    }

    fn on_reset(&self) -> Result<(), ProjectionError> {
        info!(projection = Self::NAME, "deleting bike status view");
        self.store.clear()?;
        Ok(())
    }
}

/// Side effects held back until the batch commits.
enum Effect {
    Updated { status: BikeStatus, find_one: bool },
    ThankYouMail { bike_id: String },
    RejectionMail { bike_id: String, rental_reference: String },
}

/// One batch of bike status changes: an overlay over the store.
struct BikeStatusBatch<'a, S>
where
    S: ReadModelStore<String, BikeStatus>,
{
    projection: &'a BikeStatusProjection<S>,
    staged: BTreeMap<String, BikeStatus>,
    effects: Vec<Effect>,
}

impl<S> BikeStatusBatch<'_, S>
where
    S: ReadModelStore<String, BikeStatus>,
{
    fn current(&self, bike_id: &str) -> Result<Option<BikeStatus>, ProjectionError> {
        if let Some(staged) = self.staged.get(bike_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.projection.store.get(&bike_id.to_string())?)
    }

    fn update<F>(&self, bike_id: &str, mutate: F) -> Result<Option<BikeStatus>, ProjectionError>
    where
        F: FnOnce(&mut BikeStatus),
    {
        let Some(mut status) = self.current(bike_id)? else {
            debug!(bike_id, "event for unknown bike ignored");
            return Ok(None);
        };
        mutate(&mut status);
        Ok(Some(status))
    }
}

impl<S> ProjectionBatch for BikeStatusBatch<'_, S>
where
    S: ReadModelStore<String, BikeStatus>,
{
    fn apply(
        &mut self,
        envelope: &EventEnvelope<JsonValue>,
        status: ReplayStatus,
    ) -> Result<(), ProjectionError> {
        let event: RentalEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        if event.bike_id() != envelope.aggregate_id() {
            return Err(ProjectionError::Apply(format!(
                "event bike_id '{}' does not match partition key '{}'",
                event.bike_id(),
                envelope.aggregate_id()
            )));
        }

        let (updated, find_one) = match &event {
            RentalEvent::BikeRegistered(e) => (
                Some(BikeStatus::new(&e.bike_id, &e.bike_type, &e.location)),
                false,
            ),
            RentalEvent::BikeRequested(e) => {
                (self.update(&e.bike_id, |b| b.requested_by(&e.renter))?, true)
            }
            RentalEvent::BikeInUse(e) => (self.update(&e.bike_id, |b| b.rented_by(&e.renter))?, true),
            RentalEvent::BikeReturned(e) => {
                (self.update(&e.bike_id, |b| b.returned_at(&e.location))?, true)
            }
            RentalEvent::RequestRejected(e) => (
                self.update(&e.bike_id, |b| {
                    let location = b.location.clone();
                    b.returned_at(location)
                })?,
                true,
            ),
        };

        let Some(updated) = updated else {
            return Ok(());
        };
        self.staged.insert(updated.bike_id.clone(), updated.clone());

        if status.is_replay() {
            return Ok(());
        }

        self.effects.push(Effect::Updated {
            status: updated,
            find_one,
        });
        match event {
            RentalEvent::BikeReturned(e) => self.effects.push(Effect::ThankYouMail { bike_id: e.bike_id }),
            RentalEvent::RequestRejected(e) => self.effects.push(Effect::RejectionMail {
                bike_id: e.bike_id,
                rental_reference: e.rental_reference,
            }),
            _ => {}
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), ProjectionError> {
        let BikeStatusBatch {
            projection,
            staged,
            effects,
        } = *self;
        if !staged.is_empty() {
            projection.store.upsert_all(staged.into_iter().collect())?;
        }

        for effect in effects {
            match effect {
                Effect::Updated { status, find_one } => projection.emit(&status, find_one),
                Effect::ThankYouMail { bike_id } => {
                    info!(bike_id = %bike_id, "sending e-mail thanking the customer for their rental");
                }
                Effect::RejectionMail {
                    bike_id,
                    rental_reference,
                } => {
                    info!(
                        bike_id = %bike_id,
                        rental_reference = %rental_reference,
                        "sending e-mail telling the customer their request was rejected"
                    );
                }
            }
        }
        Ok(())
    }
}
