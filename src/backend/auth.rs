//! Client-side auth responses for the plugins the backend may ask for.

use sha1::{Digest as Sha1Digest, Sha1};
use sha2::{Digest as Sha2Digest, Sha256};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";

/// caching_sha2_password "more data" status bytes.
pub const FAST_AUTH_SUCCESS: u8 = 0x03;
pub const PERFORM_FULL_AUTH: u8 = 0x04;

// -----------------------------------------------------------------------------
// ----- AuthPlugin ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
    ClearPassword,
}

impl AuthPlugin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            MYSQL_NATIVE_PASSWORD => Some(AuthPlugin::NativePassword),
            CACHING_SHA2_PASSWORD => Some(AuthPlugin::CachingSha2Password),
            MYSQL_CLEAR_PASSWORD => Some(AuthPlugin::ClearPassword),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => MYSQL_NATIVE_PASSWORD,
            AuthPlugin::CachingSha2Password => CACHING_SHA2_PASSWORD,
            AuthPlugin::ClearPassword => MYSQL_CLEAR_PASSWORD,
        }
    }

    pub fn response(self, password: &str, scramble: &[u8]) -> Vec<u8> {
        match self {
            AuthPlugin::NativePassword => scramble_native(password, scramble),
            AuthPlugin::CachingSha2Password => scramble_sha256(password, scramble),
            AuthPlugin::ClearPassword => clear_password(password),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Scrambles -------------------------------------------------------------

/// SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))
pub fn scramble_native(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    Sha1Digest::update(&mut hasher, scramble);
    Sha1Digest::update(&mut hasher, stage2);
    let stage3 = hasher.finalize();

    xor(&stage1, &stage3)
}

/// SHA256(password) XOR SHA256(SHA256(SHA256(password)) + scramble)
pub fn scramble_sha256(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    Sha2Digest::update(&mut hasher, stage2);
    Sha2Digest::update(&mut hasher, scramble);
    let stage3 = hasher.finalize();

    xor(&stage1, &stage3)
}

pub fn clear_password(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
