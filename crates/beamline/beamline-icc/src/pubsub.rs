//! PUB/SUB feedback channel (spec.md §4.6, §6): the collector publishes
//! topic-tagged messages; each worker subscribes to its own rank's topic and
//! `"all"`.
//!
//! Unlike the push/pull mailbox, a publish to a subscriber whose outbound
//! queue is already full is dropped rather than blocking — spec.md is
//! explicit that "the collector's PUB socket ... drops undelivered feedback
//! silently."

use crate::framing::{read_raw_message, write_raw_message};
use crossbeam_channel::{Sender, bounded};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// The collector side. Accepts any number of subscriber connections and
/// fans every `publish` out to all of them.
pub struct PubSocket {
    subscribers: Arc<Mutex<Vec<Sender<(String, Vec<u8>)>>>>,
}

impl PubSocket {
    pub fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let subscribers: Arc<Mutex<Vec<Sender<(String, Vec<u8>)>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let subs_for_acceptor = Arc::clone(&subscribers);
        thread::spawn(move || {
            for conn in listener.incoming() {
                let Ok(stream) = conn else { continue };
                let (tx, rx) = bounded::<(String, Vec<u8>)>(1);
                subs_for_acceptor.lock().unwrap().push(tx);
                thread::spawn(move || {
                    let mut stream = stream;
                    for (topic, bytes) in rx.iter() {
                        if write_raw_message(&mut stream, &topic, &bytes).is_err() {
                            return;
                        }
                    }
                });
            }
        });
        Ok(Self { subscribers })
    }

    /// Publishes `payload` under `topic` to every currently connected
    /// subscriber. `topic` "all" is meant to be received by every worker;
    /// "<rank>" by that worker only — the filtering itself happens on the
    /// `SubSocket` side, matching how `socket_sub.setsockopt_string(zmq.SUBSCRIBE,
    /// ...)` filters client-side in the original ZeroMQ implementation.
    pub fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> io::Result<()> {
        let bytes = bincode::serialize(payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| {
            // A full or disconnected subscriber queue silently drops the
            // message rather than blocking the publisher.
            match tx.try_send((topic.to_string(), bytes.clone())) {
                Ok(()) => true,
                Err(crossbeam_channel::TrySendError::Full(_)) => true,
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
            }
        });
        Ok(())
    }
}

/// The worker side. Connects once and filters incoming messages against a
/// small set of subscribed topics (own rank and `"all"`).
pub struct SubSocket<T> {
    rx: crossbeam_channel::Receiver<(String, T)>,
}

impl<T: DeserializeOwned + Send + 'static> SubSocket<T> {
    pub fn connect(addr: &str, topics: Vec<String>) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::spawn(move || {
            let mut stream = stream;
            loop {
                let Ok((topic, bytes)) = read_raw_message(&mut stream) else {
                    return;
                };
                if !topics.iter().any(|t| t == &topic) {
                    continue;
                }
                let Ok(payload) = bincode::deserialize::<T>(&bytes) else {
                    continue;
                };
                if tx.send((topic, payload)).is_err() {
                    return;
                }
            }
        });
        Ok(Self { rx })
    }

    /// Non-blocking, zero-wait poll — a worker checks this once per loop
    /// iteration and honors `{"stop": true}` immediately (spec.md §5).
    pub fn try_recv(&self) -> Option<(String, T)> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn subscriber_only_receives_matching_topics() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let pub_socket = PubSocket::bind(&addr).unwrap();
        thread::sleep(Duration::from_millis(50));
        let sub: SubSocket<i64> =
            SubSocket::connect(&addr, vec!["2".to_string(), "all".to_string()]).unwrap();
        thread::sleep(Duration::from_millis(50));

        pub_socket.publish("1", &100i64).unwrap();
        pub_socket.publish("2", &200i64).unwrap();
        pub_socket.publish("all", &300i64).unwrap();

        let mut received = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while received.len() < 2 && std::time::Instant::now() < deadline {
            if let Some(msg) = sub.try_recv() {
                received.push(msg);
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|(topic, _)| topic == "2" || topic == "all"));
    }
}
