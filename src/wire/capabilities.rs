use std::fmt;
use std::ops::{BitAnd, BitOr};

// -----------------------------------------------------------------------------
// ----- CapabilityFlags -------------------------------------------------------

/// Protocol capability bitset exchanged during the handshake.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilityFlags(u32);

impl CapabilityFlags {
    pub const LONG_PASSWORD: Self = Self(0x0000_0001);
    pub const FOUND_ROWS: Self = Self(0x0000_0002);
    pub const LONG_FLAG: Self = Self(0x0000_0004);
    pub const CONNECT_WITH_DB: Self = Self(0x0000_0008);
    pub const COMPRESS: Self = Self(0x0000_0020);
    pub const LOCAL_FILES: Self = Self(0x0000_0080);
    pub const PROTOCOL_41: Self = Self(0x0000_0200);
    pub const SSL: Self = Self(0x0000_0800);
    pub const TRANSACTIONS: Self = Self(0x0000_2000);
    pub const SECURE_CONNECTION: Self = Self(0x0000_8000);
    pub const MULTI_STATEMENTS: Self = Self(0x0001_0000);
    pub const MULTI_RESULTS: Self = Self(0x0002_0000);
    pub const PS_MULTI_RESULTS: Self = Self(0x0004_0000);
    pub const PLUGIN_AUTH: Self = Self(0x0008_0000);
    pub const CONNECT_ATTRS: Self = Self(0x0010_0000);
    pub const PLUGIN_AUTH_LENENC_CLIENT_DATA: Self = Self(0x0020_0000);
    pub const SESSION_TRACK: Self = Self(0x0080_0000);
    pub const DEPRECATE_EOF: Self = Self(0x0100_0000);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn from_halves(low: u16, high: u16) -> Self {
        Self(u32::from(low) | (u32::from(high) << 16))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn low(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn high(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Flags presented to the client by the forged greeting: plugin auth and
    /// 4.1 secure auth always on, TLS always off.
    pub fn forged(self) -> Self {
        self.with(Self::SECURE_CONNECTION)
            .with(Self::PLUGIN_AUTH)
            .without(Self::SSL)
    }
}

impl BitOr for CapabilityFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl BitAnd for CapabilityFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for CapabilityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityFlags({:#010x})", self.0)
    }
}

// -----------------------------------------------------------------------------
// ----- Status flags ----------------------------------------------------------

pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
