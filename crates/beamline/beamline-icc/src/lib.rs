//! Inter-process communication transport for the distributed event pipeline
//! (spec components C8 and the transport half of C9).
//!
//! No ZeroMQ binding exists anywhere in the example pack this crate was
//! grown out of, so this is a from-scratch transport built the way the
//! teacher builds its own transport primitives — a header/framing module
//! plus focused socket types — over `std::net::{TcpListener, TcpStream}`
//! and `bincode` instead of a shared-memory ring.

pub mod framing;
pub mod pubsub;
pub mod pushpull;
pub mod reqrep;

pub use pubsub::{PubSocket, SubSocket};
pub use pushpull::{PullSocket, PushSocket};
pub use reqrep::{ClientId, ReqRepSocket};

use std::io;
use std::net::UdpSocket;

pub const DEFAULT_EVENTS_PORT: u16 = 12321;
pub const DEFAULT_FEEDBACK_PORT: u16 = 12322;

/// Autodetects the local machine's IP address the way
/// `get_current_machine_ip` does in the original implementation: opening a
/// UDP "connection" to a public address and reading back the local address
/// the OS picked for it. No packet is actually sent.
pub fn current_machine_ip() -> io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    let local_addr = socket.local_addr()?;
    Ok(local_addr.ip().to_string())
}

/// Topic a worker subscribes to for messages meant for every worker.
pub const TOPIC_ALL: &str = "all";

/// The feedback topic string for a specific worker rank.
pub fn rank_topic(rank: u32) -> String {
    rank.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autodetects_some_ip_address() {
        // Doesn't assert a specific address — just that the UDP trick
        // resolves to something parseable, on any machine running the test.
        let ip = current_machine_ip().unwrap();
        assert!(ip.parse::<std::net::IpAddr>().is_ok());
    }

    #[test]
    fn rank_topic_is_the_decimal_rank() {
        assert_eq!(rank_topic(3), "3");
    }
}
