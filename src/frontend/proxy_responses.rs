// Proxy responses are server packets emitted by the proxy itself (greeting and
// auth OK) rather than forwarded from the backend. Builders return payloads;
// the session frames them.

use bytes::{BufMut, Bytes, BytesMut};

use crate::backend::BackendLink;
use crate::backend::auth::CACHING_SHA2_PASSWORD;
use crate::wire::CapabilityFlags;
use crate::wire::capabilities::SERVER_STATUS_AUTOCOMMIT;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const PROTOCOL_VERSION: u8 = 10;
pub const FORGED_CONNECTION_ID: u32 = 1;

/// Fixed nonce `1..=20`. Nothing is ever verified against it.
pub const FORGED_SCRAMBLE: [u8; 20] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20,
];

pub const DEFAULT_SERVER_VERSION: &str = "8.0.36";
const UTF8MB4_GENERAL_CI: u8 = 45;

// -----------------------------------------------------------------------------
// ----- ServerIdentity --------------------------------------------------------

/// What the forged greeting claims about the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub server_version: String,
    pub charset: u8,
    pub status_flags: u16,
    pub capabilities: CapabilityFlags,
}

impl ServerIdentity {
    /// Mirror the backend session so the client negotiates what the backend has.
    pub fn from_link(link: &BackendLink) -> Self {
        Self {
            server_version: link.greeting.server_version.clone(),
            charset: link.greeting.charset,
            status_flags: link.status_flags,
            capabilities: link.capabilities.forged(),
        }
    }
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            charset: UTF8MB4_GENERAL_CI,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            capabilities: (CapabilityFlags::LONG_PASSWORD
                | CapabilityFlags::LONG_FLAG
                | CapabilityFlags::PROTOCOL_41
                | CapabilityFlags::TRANSACTIONS)
                .forged(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Local Server Responses ------------------------------------------------

/// HandshakeV10 advertising `caching_sha2_password` with the fixed scramble.
pub(crate) fn handshake_greeting(identity: &ServerIdentity) -> Bytes {
    let caps = identity.capabilities.forged();
    let version = identity.server_version.as_bytes();

    let mut b = BytesMut::with_capacity(64 + version.len());
    b.put_u8(PROTOCOL_VERSION);
    b.extend_from_slice(version);
    b.put_u8(0);
    b.put_u32_le(FORGED_CONNECTION_ID);
    b.extend_from_slice(&FORGED_SCRAMBLE[..8]);
    b.put_u8(0);
    b.put_u16_le(caps.low());
    b.put_u8(identity.charset);
    b.put_u16_le(identity.status_flags);
    b.put_u16_le(caps.high());
    b.put_u8(FORGED_SCRAMBLE.len() as u8);
    b.put_bytes(0, 10);
    b.extend_from_slice(&FORGED_SCRAMBLE[8..]);
    b.put_u8(0);
    b.extend_from_slice(CACHING_SHA2_PASSWORD.as_bytes());
    b.put_u8(0);
    b.freeze()
}

/// OK with zero affected rows, zero insert id and no warnings.
pub(crate) fn auth_ok(status_flags: u16) -> Bytes {
    let mut b = BytesMut::with_capacity(7);
    b.put_u8(0x00);
    b.put_u8(0);
    b.put_u8(0);
    b.put_u16_le(status_flags);
    b.put_u16_le(0);
    b.freeze()
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
