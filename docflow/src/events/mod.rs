//! Event emission for orchestrator observability.

mod sink;

pub use sink::{
    emit_bounded, names, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink,
};
