//! Optional request/reply feedback socket (spec.md §6): router-style, peer
//! identity as the first frame, an empty delimiter, then the request body.
//!
//! Out-of-band from the worker/collector data path; consumed by
//! `Processor::wait_for_data` (spec.md §4.5) when the collector has nothing
//! pending from `EVENTS_IN`.

use crate::framing::{read_frame, write_frame};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// Identifies the peer a reply must be routed back to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(String);

/// The collector side. Binds once; every accepted connection is tracked by
/// its socket address so a reply can be routed back to the right peer.
pub struct ReqRepSocket {
    requests_rx: Receiver<(ClientId, Vec<u8>)>,
    streams: Arc<Mutex<std::collections::HashMap<String, TcpStream>>>,
}

impl ReqRepSocket {
    pub fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let (tx, rx): (Sender<(ClientId, Vec<u8>)>, Receiver<(ClientId, Vec<u8>)>) = unbounded();
        let streams: Arc<Mutex<std::collections::HashMap<String, TcpStream>>> =
            Arc::new(Mutex::new(std::collections::HashMap::new()));
        let streams_for_acceptor = Arc::clone(&streams);
        thread::spawn(move || {
            for conn in listener.incoming() {
                let Ok(stream) = conn else { continue };
                let Ok(peer) = stream.peer_addr() else { continue };
                let id = ClientId(peer.to_string());
                let Ok(read_stream) = stream.try_clone() else { continue };
                streams_for_acceptor
                    .lock()
                    .unwrap()
                    .insert(id.0.clone(), stream);
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut stream = read_stream;
                    loop {
                        // identity frame (ignored — the connection's peer
                        // address is already the identity), then empty
                        // delimiter, then the request body.
                        if read_frame(&mut stream).is_err() {
                            return;
                        }
                        if read_frame(&mut stream).is_err() {
                            return;
                        }
                        let Ok(body) = read_frame(&mut stream) else {
                            return;
                        };
                        if tx.send((id.clone(), body)).is_err() {
                            return;
                        }
                    }
                });
            }
        });
        Ok(Self {
            requests_rx: rx,
            streams,
        })
    }

    /// Non-blocking poll for the next request, for use from
    /// `Processor::wait_for_data`'s idle-time work.
    pub fn try_recv_request(&self) -> Option<(ClientId, Vec<u8>)> {
        self.requests_rx.try_recv().ok()
    }

    /// Sends `body` back to `client`, echoing the identity and empty
    /// delimiter frames a router-style reply requires.
    pub fn reply(&self, client: &ClientId, body: &[u8]) -> io::Result<()> {
        let mut streams = self.streams.lock().unwrap();
        let Some(stream) = streams.get_mut(&client.0) else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "unknown client"));
        };
        write_frame(stream, client.0.as_bytes())?;
        write_frame(stream, b"")?;
        write_frame(stream, body)
    }
}
