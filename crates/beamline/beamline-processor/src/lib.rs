//! `Processor` strategy contract (spec component C6) and the one bundled
//! strategy this workspace ships: a crystallography hit-finder built from
//! calibration + peakfinder8 + the radial profile engine.
//!
//! Grounded on the original monitor's `OmProcessingProtocol` — the five
//! lifecycle methods there (`initialize_processing_node`,
//! `initialize_collecting_node`, `process_data`, `collect_data`,
//! `wait_for_data`) map to `init_worker`/`init_collector`/`process_data`/
//! `collect_data`/`wait_for_data` here, with its two end-of-run hooks
//! collapsed into `finalize_worker`/`finalize_collector`.

mod crystallography;

pub use crystallography::{CrystallographyParams, CrystallographyProcessor};

use beamline_events::{DataExtractionError, ExtractedData, FeedbackDict, ProcessedResult};

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// A per-event fault in the data itself — the parallelization engine
    /// logs and skips the event rather than aborting the worker.
    #[error(transparent)]
    DataExtraction(#[from] DataExtractionError),
    /// Anything else; propagates and aborts the worker (spec.md §4.5).
    #[error("processor fault: {0}")]
    Fatal(String),
}

/// A user-supplied strategy, instantiated identically on every node and
/// dispatched differently depending on whether the node is a worker or the
/// collector (spec.md §4.5).
pub trait Processor: Send {
    /// Constructs algorithm instances, allocates buffers, loads
    /// per-detector constants. Called once, on each worker.
    fn init_worker(&mut self, rank: u32, pool_size: u32) -> Result<(), ProcessorError>;

    /// Constructs aggregate buffers. Called once, on the collector only.
    fn init_collector(&mut self, rank: u32, pool_size: u32) -> Result<(), ProcessorError>;

    /// A pure function of `data`: must not reach across workers. Returns the
    /// result to forward to the collector, tagged with this worker's rank.
    fn process_data(
        &mut self,
        rank: u32,
        pool_size: u32,
        data: ExtractedData,
    ) -> Result<(ProcessedResult, u32), ProcessorError>;

    /// Aggregates one worker's result on the collector; may mutate
    /// collector-owned state and optionally return feedback for the workers.
    fn collect_data(
        &mut self,
        rank: u32,
        pool_size: u32,
        processed: (ProcessedResult, u32),
    ) -> Option<FeedbackDict>;

    /// Called on the collector when no result is pending; used for
    /// idle-time work. Most strategies have nothing to do here.
    fn wait_for_data(&mut self, rank: u32, pool_size: u32) {
        let _ = (rank, pool_size);
    }

    /// Called exactly once at worker shutdown; may emit one final message.
    fn finalize_worker(&mut self, rank: u32, pool_size: u32) -> Option<ProcessedResult> {
        let _ = (rank, pool_size);
        None
    }

    /// Called exactly once at collector shutdown; may emit one final
    /// aggregate message.
    fn finalize_collector(&mut self, rank: u32, pool_size: u32) -> Option<ProcessedResult> {
        let _ = (rank, pool_size);
        None
    }
}
