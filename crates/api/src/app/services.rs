use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use pedalstream_events::{QueryUpdateHub, QuerySubscription};
use pedalstream_infra::{
    dead_letter::InMemoryDeadLetterQueue,
    event_log::{EventLog, EventLogError, InMemoryEventLog, StoredEvent, UncommittedEvent},
    processing::{
        EventProcessor, InMemoryTokenStore, ProcessorError, ProcessorRegistry, ReplayController,
        SegmentCoordinator,
    },
    projections::BikeStatusProjection,
    read_model::InMemoryReadModelStore,
};
use pedalstream_rental::{BikeStatus, RentalEvent, events::BIKE_AGGREGATE};

use crate::config::ApiConfig;

/// Name of the processor hosting the bike status projection.
pub const BIKE_STATUS_PROCESSOR: &str = "bike-status-processor";

pub type BikeStatusStore = Arc<InMemoryReadModelStore<String, BikeStatus>>;

/// Everything the handlers need, shared through an axum `Extension`.
pub struct AppServices {
    pub log: Arc<InMemoryEventLog>,
    pub processors: Arc<ProcessorRegistry>,
    pub replay: ReplayController,
    pub bike_status: Arc<BikeStatusProjection<BikeStatusStore>>,
}

/// Wire the in-memory log, token store and dead-letter queue to the bike
/// status processor and start it.
pub fn build_services(config: &ApiConfig) -> Result<Arc<AppServices>, ProcessorError> {
    let log = Arc::new(InMemoryEventLog::new());
    let coordinator = Arc::new(SegmentCoordinator::new(
        Arc::new(InMemoryTokenStore::new()),
        config.processor.lease_duration,
    ));

    let store: BikeStatusStore = Arc::new(InMemoryReadModelStore::new());
    let bike_status = Arc::new(BikeStatusProjection::new(store, Arc::new(QueryUpdateHub::new())));

    let processor = EventProcessor::builder(BIKE_STATUS_PROCESSOR, log.clone(), coordinator)
        .config(config.processor.clone())
        .projection(bike_status.clone())
        .dead_letter_queue(Arc::new(InMemoryDeadLetterQueue::new()))
        .build();

    let processors = Arc::new(ProcessorRegistry::new().with(Arc::new(processor))?);
    processors.start_all()?;

    Ok(Arc::new(AppServices {
        replay: ReplayController::new(processors.clone(), log.clone()),
        log,
        processors,
        bike_status,
    }))
}

impl AppServices {
    /// Append a rental event to the log (stand-in for the external write side).
    pub fn append_event(&self, event: &RentalEvent) -> Result<StoredEvent, EventLogError> {
        let uncommitted = UncommittedEvent::from_typed(BIKE_AGGREGATE, Uuid::now_v7(), event)?;
        self.log
            .append(vec![uncommitted])?
            .pop()
            .ok_or_else(|| EventLogError::InvalidAppend("append returned no event".to_string()))
    }
}

/// Stream a live query subscription as SSE: the current result first, then
/// every update the projection emits for the subscribed query.
pub fn query_sse_stream<T>(
    initial: T,
    subscription: QuerySubscription<BikeStatus>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>
where
    T: serde::Serialize,
{
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();

    if let Ok(event) = SseEvent::default().event("initial").json_data(&initial) {
        let _ = tx.send(Ok(event));
    }

    // The hub delivers on a std channel; forward from a blocking task until
    // the client goes away.
    tokio::task::spawn_blocking(move || {
        loop {
            match subscription.recv_timeout(Duration::from_secs(1)) {
                Ok(update) => {
                    let Ok(event) = SseEvent::default().event("update").json_data(&update) else {
                        continue;
                    };
                    if tx.send(Ok(event)).is_err() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if tx.is_closed() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(subscription = subscription.id().0, query = subscription.query().name(), "query stream closed");
    });

    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
