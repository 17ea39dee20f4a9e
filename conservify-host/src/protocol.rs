//! Discovery wire protocol: multicast announcements and their encoding.

use conservify_core::Token;
use serde::{Deserialize, Serialize};

/// Current protocol version. Announcements from other versions are treated as foreign datagrams.
pub const PROTOCOL_VERSION: u8 = 1;

/// Every announcement starts with this, so foreign traffic on the port is cheap to reject.
const MAGIC: &[u8; 4] = b"CFY1";

/// Multicast announcement. Encoding is `MAGIC` followed by bincode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Announcement {
    /// Periodic presence beacon.
    Hello {
        protocol_version: u8,
        /// Random per-process id, used to skip our own beacons.
        instance: Token,
        name: String,
        service_type: String,
        port: u16,
    },
    /// Sent once when advertising stops.
    Goodbye {
        protocol_version: u8,
        instance: Token,
        name: String,
        service_type: String,
    },
}

impl Announcement {
    pub fn instance(&self) -> Token {
        match self {
            Announcement::Hello { instance, .. } | Announcement::Goodbye { instance, .. } => *instance,
        }
    }

    pub fn service_type(&self) -> &str {
        match self {
            Announcement::Hello { service_type, .. } | Announcement::Goodbye { service_type, .. } => {
                service_type
            }
        }
    }

    fn protocol_version(&self) -> u8 {
        match self {
            Announcement::Hello { protocol_version, .. }
            | Announcement::Goodbye { protocol_version, .. } => *protocol_version,
        }
    }
}

pub fn encode(announcement: &Announcement) -> Result<Vec<u8>, ProtocolError> {
    let payload = bincode::serialize(announcement)?;
    let mut out = Vec::with_capacity(MAGIC.len() + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode one datagram.
pub fn decode(datagram: &[u8]) -> Result<Announcement, ProtocolError> {
    let payload = datagram.strip_prefix(MAGIC.as_slice()).ok_or(ProtocolError::Foreign)?;
    let announcement: Announcement = bincode::deserialize(payload)?;
    if announcement.protocol_version() != PROTOCOL_VERSION {
        return Err(ProtocolError::Version(announcement.protocol_version()));
    }
    Ok(announcement)
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("not an announcement")]
    Foreign,
    #[error("unsupported protocol version {0}")]
    Version(u8),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}
