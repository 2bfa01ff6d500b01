//! PUSH/PULL event flow (spec.md §4.6, §6): workers push `(result,
//! sender_rank)` tuples to the collector's single pull endpoint.
//!
//! Backpressure is modeled with a `crossbeam_channel::bounded(1)` mailbox
//! between the socket and its consumer on both ends — the network
//! generalization of `shm_layout`/`ring`'s fixed-capacity slot, reinterpreted
//! as "high-water-mark = 1" (spec.md §4.6): once the mailbox holds one
//! unconsumed message, the next `send` blocks until it is drained.

use crate::framing::{read_value, write_value};
use crossbeam_channel::{Receiver, Sender, bounded};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// The worker side: connects once, then accepts one `(value, rank)` pair at
/// a time with the consumer on this process backpressuring further sends.
pub struct PushSocket<T> {
    tx: Sender<(T, u32)>,
    failure: Arc<Mutex<Option<String>>>,
}

impl<T: Serialize + Send + 'static> PushSocket<T> {
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let (tx, rx): (Sender<(T, u32)>, Receiver<(T, u32)>) = bounded(1);
        let failure = Arc::new(Mutex::new(None));
        let failure_writer = Arc::clone(&failure);
        thread::spawn(move || {
            let mut stream = stream;
            for (value, rank) in rx.iter() {
                if let Err(e) = write_value(&mut stream, &(value, rank)) {
                    *failure_writer.lock().unwrap() = Some(e.to_string());
                    return;
                }
            }
        });
        Ok(Self { tx, failure })
    }

    /// Sends one `(value, rank)` pair, blocking while the mailbox already
    /// holds an unconsumed message (HWM = 1 backpressure).
    pub fn send(&self, value: T, rank: u32) -> io::Result<()> {
        if let Some(msg) = self.failure.lock().unwrap().clone() {
            return Err(io::Error::other(msg));
        }
        self.tx
            .send((value, rank))
            .map_err(|_| io::Error::other("push socket writer thread has stopped"))
    }
}

/// The collector side: binds and accepts connections from every worker,
/// multiplexing all of them into a single HWM=1 mailbox — the whole point
/// of there being exactly one `EVENTS_IN` socket.
pub struct PullSocket<T> {
    rx: Receiver<(T, u32)>,
}

impl<T: DeserializeOwned + Send + 'static> PullSocket<T> {
    pub fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let (tx, rx): (Sender<(T, u32)>, Receiver<(T, u32)>) = bounded(1);
        thread::spawn(move || {
            for conn in listener.incoming() {
                let Ok(stream) = conn else { continue };
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut stream = stream;
                    loop {
                        match read_value::<_, (T, u32)>(&mut stream) {
                            Ok((value, rank)) => {
                                if tx.send((value, rank)).is_err() {
                                    return;
                                }
                            }
                            Err(_) => return,
                        }
                    }
                });
            }
        });
        Ok(Self { rx })
    }

    /// Non-blocking receive — mirrors the worker loop's zero-wait poll of
    /// its feedback socket and the collector loop's poll of `EVENTS_IN`.
    pub fn try_recv(&self) -> Option<(T, u32)> {
        self.rx.try_recv().ok()
    }
}
