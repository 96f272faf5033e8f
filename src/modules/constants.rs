//! Protocol constants and filesystem defaults.
//!
//! The wire-protocol values are dictated by the cluster master server and
//! are not tunable: both the type codes and the registration blob must
//! match the server byte for byte.

/// Keepalive/no-op packet type, skipped while waiting for a response.
pub const NOP_PACKET: u32 = 0;
/// Client-to-master session registration request.
pub const REGISTER_REQUEST: u32 = 400;
/// Master-to-client session registration response.
pub const REGISTER_RESPONSE: u32 = 401;
/// Client-to-master quota query/update request.
pub const QUOTA_CONTROL_REQUEST: u32 = 476;
/// Master-to-client quota query/update response.
pub const QUOTA_CONTROL_RESPONSE: u32 = 477;

/// Quota flag selecting a hard limit on logical length.
pub const QUOTA_FLAG_HARD_LENGTH: u8 = 0x20;
/// Quota flag selecting a hard limit on on-disk size.
pub const QUOTA_FLAG_HARD_SIZE: u8 = 0x40;

/// Authentication blob sent in the registration packet.
pub const REGISTER_BLOB: &[u8] = b"DjI1GAQDULI5d2YjA26ypc3ovkhjvhciTQVx3CS4nYgtBoUcsljiVpsErJENHaw0";
/// Marker identifying this client as a tools-class session.
pub const REGISTER_TOOL_MARKER: u8 = 4;
/// Client version advertised during registration: major.
pub const CLIENT_VERSION_MAJOR: u16 = 3;
/// Client version advertised during registration: mid.
pub const CLIENT_VERSION_MID: u8 = 0;
/// Client version advertised during registration: minor.
pub const CLIENT_VERSION_MINOR: u8 = 113;

/// Upper bound on a declared payload length accepted from the wire.
/// Control packets are tens of bytes; anything near this is a desync.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

/// Reserved file exposing the master address and session id inside a
/// mounted filesystem.
pub const SESSION_INFO_FILE: &str = ".masterinfo";

/// Subdirectory of the plugin-private area holding provisioned volumes.
pub const VOLUMES_DIR: &str = "volumes";
/// Subdirectory of the plugin-private area holding statically published
/// mount targets.
pub const MOUNT_VOLUMES_DIR: &str = "mount_volumes";
/// Base directory for host-side mount points.
pub const MOUNT_BASE: &str = "/mnt";

/// Mode for freshly created mount target directories.
pub const MOUNT_DIR_MODE: u32 = 0o750;
/// Mode for freshly created volume directories.
pub const VOLUME_DIR_MODE: u32 = 0o755;
