//! Event source adapter contract (spec component C2) and the one concrete,
//! facility-agnostic adapter this workspace ships: a file-list source.
//!
//! Facility-specific adapters (psana, HiDRA, ASAP::O, HTTP, ZMQ streams) stay
//! out of scope per spec.md §1 — they are external collaborators consumed
//! through this same narrow `EventHandler` contract.

mod filelist;

pub use filelist::FileListSource;

pub use beamline_events::DataExtractionError;
use beamline_events::{Event, ExtractedData};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot connect to or read event source '{0}'")]
    Connect(String),
    #[error("cannot retrieve event with id '{0}'")]
    RetrievalFailed(String),
    #[error("random access is not implemented for this event source")]
    NotImplemented,
}

/// The pluggable contract between the pipeline and one event source
/// (spec.md §4.1). One instance is owned by exactly one worker for its
/// lifetime; it is restartable only by constructing a fresh instance.
pub trait EventHandler: Send {
    /// One-shot; may configure the external source (e.g. set an HTTP
    /// detector mode). Called once, on the collector only.
    fn initialize_on_collector(&mut self, rank: u32, pool_size: u32) -> Result<(), SourceError>;

    /// One-shot; may compute rank-specific subscription strings, ports, or
    /// (for finite sources) this worker's slice of the event list. Called
    /// once, on each worker.
    fn initialize_on_worker(&mut self, rank: u32, pool_size: u32) -> Result<(), SourceError>;

    /// A lazy, possibly-infinite sequence of events for this worker. The
    /// returned iterator owns everything it needs so it does not borrow
    /// `self` — callers may freely interleave it with other `&mut self`
    /// calls (`open`, `extract`, `close`) inside the worker loop.
    fn events(&mut self, rank: u32, pool_size: u32) -> Box<dyn Iterator<Item = Event> + Send>;

    /// Idempotent; resolves handles or decodes headers ahead of `extract`.
    fn open(&mut self, event: &Event) -> Result<(), SourceError>;

    /// Releases any resources `open` acquired. Must be called even when
    /// `extract` fails.
    fn close(&mut self, event: &Event) -> Result<(), SourceError>;

    /// Extracts the declared fields for one event. A per-source failure is
    /// reported as `DataExtractionError`; the pipeline then logs and skips
    /// the event rather than treating it as fatal.
    fn extract(&mut self, event: &Event) -> Result<ExtractedData, DataExtractionError>;

    /// Random access for viewers/tools. Optional — sources that can't
    /// support it return `SourceError::NotImplemented`.
    fn retrieve_by_id(&mut self, _event_id: &str) -> Result<Event, SourceError> {
        Err(SourceError::NotImplemented)
    }
}
