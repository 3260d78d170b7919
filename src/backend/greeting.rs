// Server-originated packets the backend connector has to understand before the
// link is handed to the relay: the initial greeting, ERR and OK.

use bytes::Buf;

use crate::wire::{CapabilityFlags, FramingError, read_cstr, read_lenenc_int};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const PROTOCOL_VERSION: u8 = 10;

pub const OK_HEADER: u8 = 0x00;
pub const MORE_DATA_HEADER: u8 = 0x01;
pub const AUTH_SWITCH_HEADER: u8 = 0xFE;
pub const ERR_HEADER: u8 = 0xFF;

// -----------------------------------------------------------------------------
// ----- ServerGreeting --------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGreeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: CapabilityFlags,
    pub charset: u8,
    pub status_flags: u16,
    /// 20-byte nonce (parts 1 and 2 joined, trailing NUL dropped).
    pub scramble: Vec<u8>,
    pub auth_plugin: Option<String>,
}

impl ServerGreeting {
    pub fn parse(payload: &[u8]) -> Result<Self, FramingError> {
        let mut input = payload;

        if input.remaining() < 1 {
            return Err(FramingError::Malformed("empty greeting"));
        }
        let protocol_version = input.get_u8();
        if protocol_version != PROTOCOL_VERSION {
            return Err(FramingError::Malformed("unsupported protocol version"));
        }

        let server_version = read_cstr(&mut input)?.to_string();

        // connection id + scramble part 1 + filler + low caps
        if input.remaining() < 4 + 8 + 1 + 2 {
            return Err(FramingError::Malformed("greeting truncated"));
        }
        let connection_id = input.get_u32_le();
        let mut scramble = input[..8].to_vec();
        input.advance(8);
        input.advance(1);
        let caps_low = input.get_u16_le();

        let mut greeting = ServerGreeting {
            protocol_version,
            server_version,
            connection_id,
            capabilities: CapabilityFlags::from_halves(caps_low, 0),
            charset: 0,
            status_flags: 0,
            scramble: Vec::new(),
            auth_plugin: None,
        };

        // Pre-4.1 servers stop here.
        if input.remaining() < 1 + 2 + 2 + 1 + 10 {
            greeting.scramble = scramble;
            return Ok(greeting);
        }

        greeting.charset = input.get_u8();
        greeting.status_flags = input.get_u16_le();
        let caps_high = input.get_u16_le();
        greeting.capabilities = CapabilityFlags::from_halves(caps_low, caps_high);
        let auth_data_len = input.get_u8() as usize;
        input.advance(10);

        if greeting.capabilities.contains(CapabilityFlags::SECURE_CONNECTION) {
            let part2_len = auth_data_len.saturating_sub(8).max(13).min(input.remaining());
            let (part2, rest) = input.split_at(part2_len);
            input = rest;
            let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
            scramble.extend_from_slice(part2);
        }
        greeting.scramble = scramble;

        if greeting.capabilities.contains(CapabilityFlags::PLUGIN_AUTH) && input.has_remaining() {
            // Some servers omit the terminating NUL on the plugin name.
            let name = input.split(|&b| b == 0).next().unwrap_or_default();
            let name = std::str::from_utf8(name)
                .map_err(|_| FramingError::Malformed("auth plugin name is not utf-8"))?;
            if !name.is_empty() {
                greeting.auth_plugin = Some(name.to_string());
            }
        }

        Ok(greeting)
    }
}

// -----------------------------------------------------------------------------
// ----- ServerError -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u16,
    pub sql_state: Option<String>,
    pub message: String,
}

impl ServerError {
    pub fn parse(payload: &[u8]) -> Result<Self, FramingError> {
        let mut input = payload;
        if input.remaining() < 3 || input.get_u8() != ERR_HEADER {
            return Err(FramingError::Malformed("not an ERR packet"));
        }
        let code = input.get_u16_le();

        let sql_state = if input.first() == Some(&b'#') && input.remaining() >= 6 {
            let state = String::from_utf8_lossy(&input[1..6]).into_owned();
            input.advance(6);
            Some(state)
        } else {
            None
        };

        Ok(ServerError {
            code,
            sql_state,
            message: String::from_utf8_lossy(input).into_owned(),
        })
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "{} ({}): {}", self.code, state, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- OK --------------------------------------------------------------------

/// Status flags carried by an OK packet (4.1 layout).
pub fn ok_status_flags(payload: &[u8]) -> Result<u16, FramingError> {
    let mut input = payload;
    if input.remaining() < 1 || input.get_u8() != OK_HEADER {
        return Err(FramingError::Malformed("not an OK packet"));
    }

    let _affected_rows = read_lenenc_int(&mut input)?;
    let _last_insert_id = read_lenenc_int(&mut input)?;

    if input.remaining() < 2 {
        return Err(FramingError::Malformed("OK packet missing status flags"));
    }
    Ok(input.get_u16_le())
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
