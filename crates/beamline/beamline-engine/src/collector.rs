//! Collector loop (spec.md §4.6): pulls results from every worker,
//! aggregates them via the processor, and republishes feedback.

use crate::{EngineError, EventsPull, FeedbackPub, WireMessage, is_flagged};
use beamline_icc::{TOPIC_ALL, rank_topic};
use beamline_perf::{PerfRecorder, PerfStage};
use beamline_processor::Processor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Runs the collector's lifetime: `init_collector`, the aggregation loop,
/// then `finalize_collector`.
///
/// Exits once `pool_size - 1` workers have each reported `{"end": true}` —
/// every rank but the collector's own (rank 0), per spec.md §4.6. If
/// `shutdown` is observed set to `true` before that happens (the caller sets
/// it from a SIGINT handler, per spec.md §5), the collector instead
/// publishes `{"stop": true}` on topic `"all"` and waits for the same number
/// of workers to acknowledge with `{"stopped": true}`.
pub fn run_collector(
    rank: u32,
    pool_size: u32,
    processor: &mut dyn Processor,
    events_addr: &str,
    feedback_addr: &str,
    shutdown: Arc<AtomicBool>,
) -> Result<(), EngineError> {
    processor.init_collector(rank, pool_size)?;

    let pull: EventsPull = EventsPull::bind(events_addr)?;
    let publ: FeedbackPub = FeedbackPub::bind(feedback_addr)?;

    let mut perf = PerfRecorder::new();
    perf.begin(PerfStage::CollectorTotal);

    let target = pool_size.saturating_sub(1);
    let mut num_ended: u32 = 0;
    let mut num_stopped: u32 = 0;
    let mut shutdown_sent = false;

    while num_ended < target && !(shutdown_sent && num_stopped >= target) {
        if !shutdown_sent && shutdown.load(Ordering::SeqCst) {
            tracing::info!("shutdown requested, publishing stop to all workers");
            publ.publish(TOPIC_ALL, &crate::stop_message())?;
            shutdown_sent = true;
        }

        match pull.try_recv() {
            Some((msg, sender)) if is_flagged(&msg, "end") => {
                num_ended += 1;
                tracing::debug!(sender, num_ended, "worker reported end of stream");
            }
            Some((msg, sender)) if is_flagged(&msg, "stopped") => {
                num_stopped += 1;
                tracing::debug!(sender, num_stopped, "worker acknowledged stop");
            }
            Some((msg, sender)) => {
                perf.begin(PerfStage::CollectData);
                let feedback = processor.collect_data(rank, pool_size, (msg, sender));
                perf.end(PerfStage::CollectData);

                if let Some(feedback) = feedback {
                    perf.begin(PerfStage::Broadcast);
                    for (target_rank, payload) in feedback {
                        let topic = if target_rank == 0 {
                            TOPIC_ALL.to_string()
                        } else {
                            rank_topic(target_rank)
                        };
                        let payload: WireMessage = payload;
                        publ.publish(&topic, &payload)?;
                    }
                    perf.end(PerfStage::Broadcast);
                }
            }
            None => {
                processor.wait_for_data(rank, pool_size);
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    perf.end(PerfStage::CollectorTotal);
    for (stage, name) in [
        (PerfStage::CollectData, "collect_data"),
        (PerfStage::Broadcast, "broadcast"),
    ] {
        let samples = perf.samples(stage);
        if !samples.is_empty() {
            let mean_ns = samples.iter().sum::<u64>() / samples.len() as u64;
            tracing::debug!(rank, node = "collector", stage = name, mean_ns, count = samples.len(), "stage timing");
        }
    }

    if let Some(final_result) = processor.finalize_collector(rank, pool_size) {
        tracing::info!(rank, ?final_result, "collector finalized");
    }
    Ok(())
}

/// Publishes `{"stop": true}` on topic `"all"` — the message a shutdown
/// signal handler sends to begin an orderly shutdown (spec.md §5). Workers
/// acknowledge with `{"stopped": true}`; the caller decides how long to
/// wait for those acknowledgements before tearing down.
pub fn initiate_shutdown(publ: &FeedbackPub) -> std::io::Result<()> {
    publ.publish(TOPIC_ALL, &crate::stop_message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamline_events::{ExtractedData, FeedbackDict, ProcessedResult, Value};
    use beamline_icc::{PushSocket, SubSocket};
    use beamline_processor::ProcessorError;
    use std::net::TcpListener;
    use std::time::Instant;

    struct CountingProcessor {
        collected: u32,
    }

    impl Processor for CountingProcessor {
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
        ) -> Option<FeedbackDict> {
            self.collected += 1;
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
    fn collector_exits_once_every_worker_has_ended() {
        let events_addr = free_addr();
        let feedback_addr = free_addr();

        let events_addr_for_thread = events_addr.clone();
        let feedback_addr_for_thread = feedback_addr.clone();
        let handle = std::thread::spawn(move || {
            let mut processor = CountingProcessor { collected: 0 };
            run_collector(
                0,
                3,
                &mut processor,
                &events_addr_for_thread,
                &feedback_addr_for_thread,
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
            processor.collected
        });

        std::thread::sleep(Duration::from_millis(50));
        let push: PushSocket<ProcessedResult> = PushSocket::connect(&events_addr).unwrap();
        let _feedback_sub: SubSocket<ProcessedResult> =
            SubSocket::connect(&feedback_addr, vec![TOPIC_ALL.to_string()]).unwrap();

        let mut one_result = ProcessedResult::new();
        one_result.insert("timestamp".to_string(), Value::Float(1.0));
        push.send(one_result, 1).unwrap();

        let mut end1 = ProcessedResult::new();
        end1.insert("end".to_string(), Value::Bool(true));
        push.send(end1.clone(), 1).unwrap();
        push.send(end1, 2).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_finished(), "collector should exit after pool_size - 1 ends");
        let collected = handle.join().unwrap();
        assert_eq!(collected, 1);
    }

    #[test]
    fn collector_publishes_stop_and_exits_once_workers_acknowledge() {
        let events_addr = free_addr();
        let feedback_addr = free_addr();
        let shutdown = Arc::new(AtomicBool::new(false));

        let events_addr_for_thread = events_addr.clone();
        let feedback_addr_for_thread = feedback_addr.clone();
        let shutdown_for_thread = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || {
            let mut processor = CountingProcessor { collected: 0 };
            run_collector(
                0,
                3,
                &mut processor,
                &events_addr_for_thread,
                &feedback_addr_for_thread,
                shutdown_for_thread,
            )
            .unwrap();
        });

        std::thread::sleep(Duration::from_millis(50));
        let push: PushSocket<ProcessedResult> = PushSocket::connect(&events_addr).unwrap();
        let feedback_sub: SubSocket<ProcessedResult> =
            SubSocket::connect(&feedback_addr, vec![TOPIC_ALL.to_string()]).unwrap();

        shutdown.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut saw_stop = false;
        while !saw_stop && Instant::now() < deadline {
            if let Some((_, payload)) = feedback_sub.try_recv() {
                saw_stop = is_flagged(&payload, "stop");
            } else {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        assert!(saw_stop, "collector should publish stop on topic all");

        let mut stopped = ProcessedResult::new();
        stopped.insert("stopped".to_string(), Value::Bool(true));
        push.send(stopped.clone(), 1).unwrap();
        push.send(stopped, 2).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_finished(), "collector should exit once every worker acknowledges stop");
        handle.join().unwrap();
    }
}
