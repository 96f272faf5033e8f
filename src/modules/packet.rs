//! Binary packet framing for the master control protocol.
//!
//! Every message exchanged with the cluster master is a packet: a 4-byte
//! big-endian type code, a 4-byte big-endian payload length, then the
//! payload. Packets are built fresh for each request, sent, and discarded;
//! nothing here holds connection state.
//!
//! Scalar readers consume from a cursor that starts just past the header.
//! Reading past the allocated payload panics: the declared length already
//! told us how many bytes the peer sent, so an overrun is a desynchronized
//! parser, not a recoverable IO condition.

use std::io::{Read, Write};

use log::debug;

use super::constants::MAX_PAYLOAD_LEN;
use super::error::{Error, Result};

/// Size of the type + length packet header.
pub const HEADER_LEN: usize = 8;

/// One framed protocol message, outbound or inbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    pos: usize,
}

impl Packet {
    /// New outbound packet of the given type with an empty, growable
    /// payload. The length field is a placeholder until
    /// [`prepare_for_send`](Self::prepare_for_send) runs.
    pub fn for_write(packet_type: u32) -> Self {
        let mut data = Vec::with_capacity(HEADER_LEN + 1024);
        data.extend_from_slice(&packet_type.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        Self {
            data,
            pos: HEADER_LEN,
        }
    }

    /// New inbound packet of the given type with exactly `payload_len`
    /// zeroed payload bytes, ready to be filled and then read.
    pub fn for_read(packet_type: u32, payload_len: u32) -> Self {
        let mut data = vec![0u8; HEADER_LEN + payload_len as usize];
        data[..4].copy_from_slice(&packet_type.to_be_bytes());
        data[4..8].copy_from_slice(&payload_len.to_be_bytes());
        Self {
            data,
            pos: HEADER_LEN,
        }
    }

    /// Type code from the header.
    pub fn packet_type(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    /// Payload length from the header. For outbound packets this is only
    /// meaningful after [`prepare_for_send`](Self::prepare_for_send).
    pub fn payload_len(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    /// Mutable view of the payload region.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_LEN..]
    }

    /// Slide the read cursor forward by `n` bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    /// Read one byte at the cursor.
    pub fn get_u8(&mut self) -> u8 {
        let [b] = self.take::<1>();
        b
    }

    /// Read a big-endian u16 at the cursor.
    pub fn get_u16(&mut self) -> u16 {
        u16::from_be_bytes(self.take())
    }

    /// Read a big-endian u32 at the cursor.
    pub fn get_u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    /// Read a big-endian u64 at the cursor.
    pub fn get_u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take())
    }

    /// Append one byte to the payload.
    pub fn put_u8(&mut self, val: u8) {
        self.data.push(val);
    }

    /// Append a big-endian u16 to the payload.
    pub fn put_u16(&mut self, val: u16) {
        self.data.extend_from_slice(&val.to_be_bytes());
    }

    /// Append a big-endian u32 to the payload.
    pub fn put_u32(&mut self, val: u32) {
        self.data.extend_from_slice(&val.to_be_bytes());
    }

    /// Append a big-endian u64 to the payload.
    pub fn put_u64(&mut self, val: u64) {
        self.data.extend_from_slice(&val.to_be_bytes());
    }

    /// Append raw bytes to the payload, without a length prefix.
    pub fn put_bytes(&mut self, val: &[u8]) {
        self.data.extend_from_slice(val);
    }

    /// Rewrite the header length field from the actual buffer size, so the
    /// header matches the payload no matter how many writers ran.
    pub fn prepare_for_send(&mut self) {
        let payload_len = (self.data.len() - HEADER_LEN) as u32;
        self.data[4..8].copy_from_slice(&payload_len.to_be_bytes());
    }

    /// Finalize the length field and write the whole packet.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        self.prepare_for_send();
        writer.write_all(&self.data)?;
        Ok(())
    }

    /// Read one framed packet: header first, then exactly the declared
    /// payload. A truncated stream or an absurd declared length is a
    /// protocol error.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Packet> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).map_err(|e| {
            Error::Protocol(format!("couldn't read packet header (8 bytes): {e}"))
        })?;
        let packet_type = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let payload_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        debug!("read packet type {packet_type} with length {payload_len}");

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::Protocol(format!(
                "declared payload length {payload_len} exceeds limit {MAX_PAYLOAD_LEN}"
            )));
        }

        let mut packet = Packet::for_read(packet_type, payload_len);
        if payload_len > 0 {
            reader.read_exact(packet.payload_mut()).map_err(|e| {
                Error::Protocol(format!(
                    "couldn't read packet payload ({payload_len} bytes): {e}"
                ))
            })?;
        }
        Ok(packet)
    }
}
