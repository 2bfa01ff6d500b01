//! Wire layout shared by every socket kind: a 4-byte big-endian length
//! prefix followed by that many bytes of `bincode`-encoded payload.
//!
//! The network analogue of `shm_layout.rs`'s header-and-slot layout, except
//! there is no fixed capacity or element size to validate up front — a TCP
//! stream carries one frame at a time rather than a pre-sized ring.

use serde::{Serialize, de::DeserializeOwned};
use std::io::{self, Read, Write};

/// Writes one length-prefixed frame of raw bytes.
pub fn write_frame<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = bytes.len() as u32;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(bytes)?;
    w.flush()
}

/// Reads one length-prefixed frame of raw bytes.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serializes `value` with `bincode` and writes it as a single frame.
pub fn write_value<W: Write, T: Serialize>(w: &mut W, value: &T) -> io::Result<()> {
    let bytes =
        bincode::serialize(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_frame(w, &bytes)
}

/// Reads one frame and deserializes it with `bincode`.
pub fn read_value<R: Read, T: DeserializeOwned>(r: &mut R) -> io::Result<T> {
    let bytes = read_frame(r)?;
    bincode::deserialize(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes the two-frame `[topic, payload]` shape used by the publish socket
/// (spec.md §6): a UTF-8 topic frame followed by a `bincode`-encoded payload
/// frame.
pub fn write_message<W: Write, T: Serialize>(w: &mut W, topic: &str, payload: &T) -> io::Result<()> {
    write_frame(w, topic.as_bytes())?;
    write_value(w, payload)
}

/// Reads a two-frame `[topic, payload]` message.
pub fn read_message<R: Read, T: DeserializeOwned>(r: &mut R) -> io::Result<(String, T)> {
    let topic_bytes = read_frame(r)?;
    let topic = String::from_utf8(topic_bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let payload = read_value(r)?;
    Ok((topic, payload))
}

/// Writes a `[topic, payload]` message where `payload` is already
/// `bincode`-encoded — used by the publish socket's fan-out path, which
/// encodes a message once and then writes the same bytes to every
/// subscriber.
pub fn write_raw_message<W: Write>(w: &mut W, topic: &str, payload: &[u8]) -> io::Result<()> {
    write_frame(w, topic.as_bytes())?;
    write_frame(w, payload)
}

/// Reads a `[topic, payload]` message without decoding the payload.
pub fn read_raw_message<R: Read>(r: &mut R) -> io::Result<(String, Vec<u8>)> {
    let topic_bytes = read_frame(r)?;
    let topic = String::from_utf8(topic_bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let payload = read_frame(r)?;
    Ok((topic, payload))
}
