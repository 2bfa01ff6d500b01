//! Worker loop (spec.md §4.6): extracts events from this worker's slice of
//! the source, merges any pending feedback, runs them through the
//! processor, and pushes results to the collector.

use crate::{EngineError, EventsPush, FeedbackSub, end_message, is_flagged, stopped_message};
use beamline_events::DataExtractionError;
use beamline_icc::{TOPIC_ALL, rank_topic};
use beamline_perf::{PerfRecorder, PerfStage};
use beamline_processor::{Processor, ProcessorError};
use beamline_source::EventHandler;

/// Runs this worker's lifetime: `init_worker`, the per-event loop, then
/// `finalize_worker` and the terminal `{"end": true}` push.
///
/// Returns once the event source is exhausted. If a `{"stop": true}`
/// feedback message is observed first, `{"stopped": true}` is pushed
/// instead and the function returns immediately, without running
/// `finalize_worker` or pushing the normal `"end"` sentinel.
pub fn run_worker(
    rank: u32,
    pool_size: u32,
    source: &mut dyn EventHandler,
    processor: &mut dyn Processor,
    events_addr: &str,
    feedback_addr: &str,
) -> Result<(), EngineError> {
    source
        .initialize_on_worker(rank, pool_size)
        .map_err(|e| EngineError::Source(e.to_string()))?;
    processor.init_worker(rank, pool_size)?;

    let push: EventsPush = EventsPush::connect(events_addr)?;
    let sub: FeedbackSub =
        FeedbackSub::connect(feedback_addr, vec![rank_topic(rank), TOPIC_ALL.to_string()])?;

    let mut perf = PerfRecorder::new();
    perf.begin(PerfStage::WorkerTotal);

    for event in source.events(rank, pool_size) {
        let feedback = sub.try_recv().map(|(_, payload)| payload);
        if let Some(fb) = &feedback {
            if is_flagged(fb, "stop") {
                push.send(stopped_message(), rank)?;
                return Ok(());
            }
        }

        source
            .open(&event)
            .map_err(|e| EngineError::Source(e.to_string()))?;

        perf.begin(PerfStage::ExtractEvent);
        let extracted = source.extract(&event);
        perf.end(PerfStage::ExtractEvent);

        let mut data = match extracted {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(rank, error = %e, "skipping event: data extraction failed");
                source
                    .close(&event)
                    .map_err(|e| EngineError::Source(e.to_string()))?;
                continue;
            }
        };
        if let Some(fb) = feedback {
            data.merge(fb);
        }

        perf.begin(PerfStage::ProcessData);
        let processed = processor.process_data(rank, pool_size, data);
        perf.end(PerfStage::ProcessData);

        match processed {
            Ok((result, sender)) => {
                perf.begin(PerfStage::PushSend);
                let sent = push.send(result, sender);
                perf.end(PerfStage::PushSend);
                sent?;
            }
            Err(ProcessorError::DataExtraction(DataExtractionError(msg))) => {
                tracing::warn!(rank, error = %msg, "skipping event: processing failed");
            }
            Err(err @ ProcessorError::Fatal(_)) => return Err(err.into()),
        }

        source
            .close(&event)
            .map_err(|e| EngineError::Source(e.to_string()))?;
    }

    perf.end(PerfStage::WorkerTotal);
    log_stage_summary(rank, "worker", &perf, PerfStage::ExtractEvent, "extract_event");
    log_stage_summary(rank, "worker", &perf, PerfStage::ProcessData, "process_data");
    log_stage_summary(rank, "worker", &perf, PerfStage::PushSend, "push_send");

    if let Some(final_result) = processor.finalize_worker(rank, pool_size) {
        push.send(final_result, rank)?;
    }
    push.send(end_message(), rank)?;
    Ok(())
}

/// Logs the mean stage duration if any samples were recorded — a no-op
/// unless `beamline-perf`'s `record` feature is enabled.
fn log_stage_summary(rank: u32, node: &str, perf: &PerfRecorder, stage: PerfStage, name: &str) {
    let samples = perf.samples(stage);
    if samples.is_empty() {
        return;
    }
    let mean_ns = samples.iter().sum::<u64>() / samples.len() as u64;
    tracing::debug!(rank, node, stage = name, mean_ns, count = samples.len(), "stage timing");
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamline_events::{Event, ExtractedData, ProcessedResult, Value};
    use beamline_icc::{PubSocket, PullSocket};
    use beamline_source::SourceError;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    struct FiniteSource {
        remaining: Vec<f64>,
    }

    impl EventHandler for FiniteSource {
        fn initialize_on_collector(&mut self, _rank: u32, _pool_size: u32) -> Result<(), SourceError> {
            Ok(())
        }
        fn initialize_on_worker(&mut self, _rank: u32, _pool_size: u32) -> Result<(), SourceError> {
            Ok(())
        }
        fn events(&mut self, _rank: u32, _pool_size: u32) -> Box<dyn Iterator<Item = Event> + Send> {
            let events: Vec<Event> = self
                .remaining
                .drain(..)
                .map(|ts| Event::new(Vec::new(), ts))
                .collect();
            Box::new(events.into_iter())
        }
        fn open(&mut self, _event: &Event) -> Result<(), SourceError> {
            Ok(())
        }
        fn close(&mut self, _event: &Event) -> Result<(), SourceError> {
            Ok(())
        }
        fn extract(&mut self, event: &Event) -> Result<ExtractedData, DataExtractionError> {
            Ok(ExtractedData::new(event.timestamp))
        }
    }

    struct PassthroughProcessor;

    impl Processor for PassthroughProcessor {
        fn init_worker(&mut self, _rank: u32, _pool_size: u32) -> Result<(), ProcessorError> {
            Ok(())
        }
        fn init_collector(&mut self, _rank: u32, _pool_size: u32) -> Result<(), ProcessorError> {
            Ok(())
        }
        fn process_data(
            &mut self,
            rank: u32,
            _pool_size: u32,
            data: ExtractedData,
        ) -> Result<(ProcessedResult, u32), ProcessorError> {
            let mut result = ProcessedResult::new();
            result.insert("timestamp".to_string(), Value::Float(data.timestamp()));
            Ok((result, rank))
        }
        fn collect_data(
            &mut self,
            _rank: u32,
            _pool_size: u32,
            _processed: (ProcessedResult, u32),
        ) -> Option<beamline_events::FeedbackDict> {
            None
        }
    }

    fn free_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[test]
    fn worker_pushes_a_result_per_event_then_an_end_sentinel() {
        let events_addr = free_addr();
        let feedback_addr = free_addr();

        let pull: PullSocket<ProcessedResult> = PullSocket::bind(&events_addr).unwrap();
        let _feedback_listener = PubSocket::bind(&feedback_addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let mut source = FiniteSource {
            remaining: vec![1.0, 2.0, 3.0],
        };
        let mut processor = PassthroughProcessor;
        run_worker(1, 2, &mut source, &mut processor, &events_addr, &feedback_addr).unwrap();

        let mut received = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while received.len() < 4 && Instant::now() < deadline {
            if let Some(msg) = pull.try_recv() {
                received.push(msg);
            } else {
                std::thread::sleep(Duration::from_millis(10));
            }
        }

        assert_eq!(received.len(), 4);
        for (msg, _) in &received[..3] {
            assert!(msg.contains_key("timestamp"));
        }
        assert!(is_flagged(&received[3].0, "end"));
    }

    #[test]
    fn worker_acknowledges_a_stop_message_with_stopped() {
        let events_addr = free_addr();
        let feedback_addr = free_addr();

        let pull: PullSocket<ProcessedResult> = PullSocket::bind(&events_addr).unwrap();
        let publ = PubSocket::bind(&feedback_addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        publ.publish(TOPIC_ALL, &crate::stop_message()).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let mut source = FiniteSource {
            remaining: vec![1.0, 2.0, 3.0],
        };
        let mut processor = PassthroughProcessor;
        run_worker(1, 2, &mut source, &mut processor, &events_addr, &feedback_addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut got = None;
        while got.is_none() && Instant::now() < deadline {
            if let Some(msg) = pull.try_recv() {
                got = Some(msg);
            } else {
                std::thread::sleep(Duration::from_millis(10));
            }
        }

        let (msg, _) = got.expect("worker should have pushed exactly one message");
        assert!(is_flagged(&msg, "stopped"));
        assert!(pull.try_recv().is_none());
    }
}
