use std::collections::HashMap;
use std::sync::Arc;

use crate::Projection;

/// Routes event type tags to the projections that fold them.
///
/// The mapping is resolved once, at registration time: dispatching an event
/// is a single map lookup returning the handlers in registration order.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    projections: Vec<Arc<dyn Projection>>,
    by_type: HashMap<&'static str, Vec<Arc<dyn Projection>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a projection for every event type it declares.
    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        for event_type in projection.event_types() {
            self.by_type
                .entry(*event_type)
                .or_default()
                .push(projection.clone());
        }
        self.projections.push(projection);
    }

    pub fn with(mut self, projection: Arc<dyn Projection>) -> Self {
        self.register(projection);
        self
    }

    /// Handlers for an event type, in registration order (empty if none).
    pub fn handlers_for(&self, event_type: &str) -> &[Arc<dyn Projection>] {
        self.by_type
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Look up a registered projection by name.
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Projection>> {
        self.projections.iter().find(|p| p.name() == name)
    }

    pub fn projections(&self) -> &[Arc<dyn Projection>] {
        &self.projections
    }

    /// A processor is resettable only if every projection it hosts is.
    pub fn supports_reset(&self) -> bool {
        self.projections.iter().all(|p| p.supports_reset())
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field(
                "projections",
                &self.projections.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventEnvelope, ProjectionBatch, ProjectionError, ReplayStatus};
    use serde_json::Value as JsonValue;

    struct Named(&'static str, &'static [&'static str], bool);

    struct Noop;

    impl ProjectionBatch for Noop {
        fn apply(
            &mut self,
            _envelope: &EventEnvelope<JsonValue>,
            _status: ReplayStatus,
        ) -> Result<(), ProjectionError> {
            Ok(())
        }

        fn commit(self: Box<Self>) -> Result<(), ProjectionError> {
            Ok(())
        }
    }

    impl Projection for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn event_types(&self) -> &[&'static str] {
            self.1
        }

        fn begin(&self) -> Box<dyn ProjectionBatch + '_> {
            Box::new(Noop)
        }

        fn supports_reset(&self) -> bool {
            self.2
        }
    }

    #[test]
    fn dispatch_preserves_registration_order() {
        let registry = HandlerRegistry::new()
            .with(Arc::new(Named("first", &["a", "b"], true)))
            .with(Arc::new(Named("second", &["a"], true)));

        let names: Vec<_> = registry.handlers_for("a").iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(registry.handlers_for("b").len(), 1);
        assert!(registry.handlers_for("unknown").is_empty());
    }

    #[test]
    fn one_non_resettable_projection_makes_registry_non_resettable() {
        let registry = HandlerRegistry::new()
            .with(Arc::new(Named("first", &["a"], true)))
            .with(Arc::new(Named("second", &["a"], false)));

        assert!(!registry.supports_reset());
        assert!(registry.find("second").is_some());
    }
}
