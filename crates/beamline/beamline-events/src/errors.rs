/// A per-event failure raised while interpreting data from an event source
/// or while processing it.
///
/// Shared between the source-adapter contract (C2) and the processor
/// contract (C6): either stage can classify a bad event this way, and the
/// parallelization engine reacts identically in both cases — log a warning
/// and skip the event, rather than aborting the worker.
#[derive(Debug, thiserror::Error)]
#[error("cannot interpret event: {0}")]
pub struct DataExtractionError(pub String);
