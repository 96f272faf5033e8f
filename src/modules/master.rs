//! Session client for the cluster master server.
//!
//! The master speaks a length-prefixed big-endian packet protocol over
//! TCP. Every operation here follows the same shape: resolve the master's
//! address and our session id from the reserved metadata file inside an
//! already-mounted filesystem, dial, register the session, run one
//! request/response exchange, drop the connection. Connections are never
//! pooled or shared; scoped ownership of the [`TcpStream`] guarantees the
//! socket closes on every path, error or not.

use std::fs;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;

use log::{info, warn};

use super::config::ClusterConfig;
use super::constants::*;
use super::error::{Error, Result};
use super::packet::Packet;

/// Master coordinates parsed from the reserved session-metadata file.
///
/// The file is 10 bytes, `[ipv4][port:u16][session_id:u32]`, or 14 bytes
/// with a trailing `[version:u32]`; all fields big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Resolved master endpoint.
    pub master_addr: SocketAddr,
    /// Session id registered for this mount by the filesystem client.
    pub session_id: u32,
    /// Master protocol version, present only in the 14-byte layout.
    pub master_version: Option<u32>,
}

impl SessionInfo {
    /// Parse the raw session-metadata bytes. Any size other than 10 or 14
    /// is a protocol error.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() != 10 && raw.len() != 14 {
            return Err(Error::Protocol(format!(
                "session metadata is {} bytes, expected 10 or 14",
                raw.len()
            )));
        }
        let ip = Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]);
        let port = u16::from_be_bytes([raw[4], raw[5]]);
        let session_id = u32::from_be_bytes([raw[6], raw[7], raw[8], raw[9]]);
        let master_version = if raw.len() == 14 {
            Some(u32::from_be_bytes([raw[10], raw[11], raw[12], raw[13]]))
        } else {
            None
        };
        Ok(Self {
            master_addr: SocketAddr::from((ip, port)),
            session_id,
            master_version,
        })
    }

    /// Read and parse the metadata file under a mounted directory. The
    /// size is checked before the read, so a file the filesystem client
    /// is still filling in is rejected rather than half-read.
    pub fn read_from_dir(mounted_path: &Path) -> Result<Self> {
        let info_path = mounted_path.join(SESSION_INFO_FILE);
        let meta = fs::metadata(&info_path).map_err(|e| {
            Error::Protocol(format!("couldn't stat {}: {e}", info_path.display()))
        })?;
        if meta.len() != 10 && meta.len() != 14 {
            return Err(Error::Protocol(format!(
                "{} is {} bytes, expected 10 or 14",
                info_path.display(),
                meta.len()
            )));
        }
        let raw = fs::read(&info_path)
            .map_err(|e| Error::Protocol(format!("couldn't read {}: {e}", info_path.display())))?;
        Self::parse(&raw)
    }
}

/// Known layouts of a successful quota-control response, keyed by the
/// observed payload length. Masters differ in whether the grace-period
/// field is present; each variant carries its own offset to the effective
/// hard size (41 or 45 bytes past the echoed message id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLayout {
    /// 89-byte payload: no grace-period field.
    Short,
    /// 93-byte payload: grace-period field present.
    Long,
}

impl ResponseLayout {
    /// Select the layout for an observed payload length, if it is one of
    /// the known success sizes.
    pub fn of_payload_len(len: u32) -> Option<Self> {
        match len {
            89 => Some(ResponseLayout::Short),
            93 => Some(ResponseLayout::Long),
            _ => None,
        }
    }

    /// Bytes between the echoed message id and the hard-size field.
    fn hard_size_gap(self) -> usize {
        match self {
            ResponseLayout::Short => 41,
            ResponseLayout::Long => 45,
        }
    }
}

/// Send a request and read responses until one of the expected type
/// arrives. Keepalive packets (type 0) may show up at any point and are
/// skipped; any other unexpected type means the connection is
/// desynchronized and must be discarded by the caller.
pub fn exchange<S: Read + Write>(
    conn: &mut S,
    request: &mut Packet,
    expected_type: u32,
) -> Result<Packet> {
    request.write_to(conn)?;
    loop {
        let response = Packet::read_from(conn)?;
        let packet_type = response.packet_type();
        if packet_type == NOP_PACKET {
            continue;
        }
        if packet_type != expected_type {
            return Err(Error::Protocol(format!(
                "expected packet type {expected_type}, got {packet_type}"
            )));
        }
        return Ok(response);
    }
}

/// Register a tools-class session: authentication blob, tool marker,
/// session id, client version triple. The master answers with a single
/// status byte; zero means registered.
pub fn register<S: Read + Write>(conn: &mut S, session_id: u32) -> Result<()> {
    let mut request = Packet::for_write(REGISTER_REQUEST);
    request.put_bytes(REGISTER_BLOB);
    request.put_u8(REGISTER_TOOL_MARKER);
    request.put_u32(session_id);
    request.put_u16(CLIENT_VERSION_MAJOR);
    request.put_u8(CLIENT_VERSION_MID);
    request.put_u8(CLIENT_VERSION_MINOR);

    let mut response = exchange(conn, &mut request, REGISTER_RESPONSE)?;
    if response.payload_len() != 1 {
        return Err(Error::Protocol(format!(
            "registration response has {} payload bytes, expected 1",
            response.payload_len()
        )));
    }
    let status = response.get_u8();
    if status != 0 {
        return Err(Error::Protocol(format!(
            "master refused registration with status {status}"
        )));
    }
    Ok(())
}

/// Build, send and parse one quota-control exchange on an established
/// session. `size == 0` queries the current quota; a positive size
/// requests a hard on-disk-size limit.
pub fn quota_exchange<S: Read + Write>(conn: &mut S, inode: u32, size: u64) -> Result<u64> {
    let mut request = Packet::for_write(QUOTA_CONTROL_REQUEST);
    request.put_u32(0); // message id
    request.put_u32(inode);
    if size == 0 {
        request.put_u8(0);
    } else {
        request.put_u8(QUOTA_FLAG_HARD_SIZE);
        request.put_u32(0); // grace period
        request.put_u32(0); // soft inodes
        request.put_u64(0); // soft length
        request.put_u64(0); // soft size
        request.put_u64(0); // soft realsize
        request.put_u32(0); // hard inodes
        request.put_u64(0); // hard length
        request.put_u64(size); // hard size
        request.put_u64(0); // hard realsize
    }

    let mut response = exchange(conn, &mut request, QUOTA_CONTROL_RESPONSE)?;
    let payload_len = response.payload_len();
    if payload_len == 1 {
        return Err(Error::Protocol(format!(
            "quota control failed with master status {}",
            response.get_u8()
        )));
    }
    let layout = ResponseLayout::of_payload_len(payload_len).ok_or_else(|| {
        Error::Protocol(format!(
            "quota control response has unexpected length {payload_len}"
        ))
    })?;
    if response.get_u32() != 0 {
        return Err(Error::Protocol(
            "quota control response message id is not 0".to_string(),
        ));
    }
    response.skip(layout.hard_size_gap());
    let hard_size = response.get_u64();
    if size > 0 && hard_size != size {
        warn!("requested {size} byte hard quota, master acquired {hard_size}");
    }
    Ok(hard_size)
}

/// Resolve the inode number of a path on the mounted filesystem.
pub fn inode_of(path: &Path) -> Result<u32> {
    let stat = nix::sys::stat::stat(path)
        .map_err(|e| Error::Internal(format!("couldn't stat {}: {e}", path.display())))?;
    Ok(stat.st_ino as u32)
}

/// Quota client for the master control protocol. One TCP connection per
/// call; no state survives between calls.
#[derive(Debug, Clone, Default)]
pub struct MasterClient {
    timeout: Option<Duration>,
}

impl MasterClient {
    /// Client with no socket timeout: a hung master blocks the calling
    /// thread until the kernel gives up on the connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client honoring the configured master timeout, if any.
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            timeout: config.master_timeout,
        }
    }

    /// Resolve session metadata under `mounted_path`, dial the master and
    /// complete the registration handshake.
    pub fn connect(&self, mounted_path: &Path) -> Result<TcpStream> {
        let session = SessionInfo::read_from_dir(mounted_path)?;
        let mut stream = match self.timeout {
            Some(timeout) => TcpStream::connect_timeout(&session.master_addr, timeout)?,
            None => TcpStream::connect(session.master_addr)?,
        };
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        register(&mut stream, session.session_id)?;
        Ok(stream)
    }

    /// Query the hard-size quota currently effective on `path`.
    pub fn get_quota(&self, path: &Path) -> Result<u64> {
        self.quota_control(path, 0)
    }

    /// Request a hard-size quota of `size` bytes on `path` and return the
    /// size the master actually acquired. The master may round or cap;
    /// its answer is authoritative.
    pub fn set_quota(&self, path: &Path, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(Error::InvalidArgument(
                "quota size must be positive".to_string(),
            ));
        }
        self.quota_control(path, size)
    }

    fn quota_control(&self, path: &Path, size: u64) -> Result<u64> {
        info!("quota control (path {}, size {size})", path.display());
        let mut conn = self.connect(path)?;
        let inode = inode_of(path)?;
        quota_exchange(&mut conn, inode, size)
    }
}
