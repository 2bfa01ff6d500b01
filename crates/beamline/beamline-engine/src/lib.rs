//! Parallelization engine (spec component C9): the worker loop and the
//! collector loop that drive a `Processor` + `EventHandler` pair across the
//! PUSH/PULL `EVENTS_IN` and PUB/SUB `FEEDBACK_OUT` sockets.
//!
//! Grounded directly on spec.md §4.6's pseudocode, cross-checked against
//! `original_source/src/om/parallelization_layer/parallel_zmq.py` for the
//! exact ordering (poll feedback, then extract; merge feedback before
//! `process_data`; `{"end": true}` / `{"stopped": true}` sentinels).

mod collector;
mod worker;

pub use collector::{initiate_shutdown, run_collector};
pub use worker::run_worker;

use beamline_events::{ProcessedResult, Value};
use beamline_icc::{PubSocket, PullSocket, PushSocket, SubSocket};

/// Wire type for both `EVENTS_IN` and `FEEDBACK_OUT`: a plain string-keyed
/// map of `Value`s, the same shape as `ProcessedResult` — the loop never
/// needs more structure than that to recognize the `"end"` / `"stopped"` /
/// `"stop"` sentinels alongside a strategy's own payload keys.
pub type WireMessage = ProcessedResult;

pub type EventsPush = PushSocket<WireMessage>;
pub type EventsPull = PullSocket<WireMessage>;
pub type FeedbackPub = PubSocket;
pub type FeedbackSub = SubSocket<WireMessage>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
    #[error("event source failure: {0}")]
    Source(String),
    #[error(transparent)]
    Processor(#[from] beamline_processor::ProcessorError),
}

/// The `{"end": true}` sentinel a worker pushes once its event source is
/// exhausted.
fn end_message() -> WireMessage {
    let mut msg = WireMessage::new();
    msg.insert("end".to_string(), Value::Bool(true));
    msg
}

/// The `{"stopped": true}` sentinel a worker pushes to acknowledge a
/// `{"stop": true}` feedback message.
fn stopped_message() -> WireMessage {
    let mut msg = WireMessage::new();
    msg.insert("stopped".to_string(), Value::Bool(true));
    msg
}

/// The `{"stop": true}` message the collector (or a shutdown signal
/// handler) publishes on topic `"all"` to begin an orderly shutdown
/// (spec.md §5).
pub fn stop_message() -> WireMessage {
    let mut msg = WireMessage::new();
    msg.insert("stop".to_string(), Value::Bool(true));
    msg
}

fn is_flagged(msg: &WireMessage, key: &str) -> bool {
    matches!(msg.get(key), Some(Value::Bool(true)))
}
