use bytes::Buf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::debug;

use super::proxy_responses::{self, ServerIdentity};
use super::session::{AuthStage, ConnectionSession};
use crate::config::ProxySettings;
use crate::errors::ProxyError;
use crate::wire::{CapabilityFlags, Frame, FramingError, read_cstr, read_frame};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

// caps(4) + max packet(4) + charset(1) + reserved(23)
const RESPONSE41_FIXED_LEN: usize = 32;

// -----------------------------------------------------------------------------
// ----- Forger ----------------------------------------------------------------

/// Complete a login with the client without checking anything it sends.
///
/// Sends the greeting, reads exactly one frame (the handshake response) and
/// answers it with an OK numbered one past the client's frame. Never talks to
/// the backend.
pub async fn forge_login<S>(
    client: &mut S,
    session: &mut ConnectionSession,
    identity: &ServerIdentity,
    settings: &ProxySettings,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = session.peer();
    let forgery = |reason: String| ProxyError::AuthForgery { peer, reason };

    session
        .queue(&proxy_responses::handshake_greeting(identity))
        .map_err(|e| forgery(e.to_string()))?;
    session
        .flush(client)
        .await
        .map_err(|e| forgery(format!("sending greeting: {e}")))?;
    session.advance_to(AuthStage::AwaitingResponse);

    let response = read_response(client, settings)
        .await
        .map_err(forgery)?;

    let client_caps = client_capabilities(&response.payload);
    if response.payload.len() == RESPONSE41_FIXED_LEN && client_caps.contains(CapabilityFlags::SSL)
    {
        return Err(forgery("client requested TLS, which the proxy never offers".into()));
    }
    session.set_capabilities(client_caps & identity.capabilities.forged());

    debug!(
        peer = %peer,
        user = username(&response.payload).as_deref().unwrap_or("?"),
        sequence = response.sequence,
        capabilities = ?session.capabilities(),
        "client handshake response accepted unchecked"
    );

    session.observe(response.sequence);
    session
        .queue(&proxy_responses::auth_ok(identity.status_flags))
        .map_err(|e| forgery(e.to_string()))?;
    session
        .flush(client)
        .await
        .map_err(|e| forgery(format!("sending OK: {e}")))?;
    session.advance_to(AuthStage::Authenticated);

    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

async fn read_response<S>(client: &mut S, settings: &ProxySettings) -> Result<Frame, String>
where
    S: AsyncRead + Unpin,
{
    let reading = read_frame(client, settings.max_handshake_packet);
    let read = match settings.handshake_timeout {
        Some(limit) => timeout(limit, reading)
            .await
            .map_err(|_| format!("no handshake response within {limit:?}"))?,
        None => reading.await,
    };

    read.map_err(|e| match e {
        FramingError::Closed => "client closed before sending a handshake response".to_string(),
        other => format!("reading handshake response: {other}"),
    })
}

fn client_capabilities(payload: &[u8]) -> CapabilityFlags {
    match payload.get(..4) {
        Some(raw) => CapabilityFlags::from_bits(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        None => CapabilityFlags::empty(),
    }
}

/// Best effort; only used for logging.
fn username(payload: &[u8]) -> Option<String> {
    let caps = client_capabilities(payload);

    let mut input = payload;
    if caps.contains(CapabilityFlags::PROTOCOL_41) {
        if input.remaining() < RESPONSE41_FIXED_LEN {
            return None;
        }
        input.advance(RESPONSE41_FIXED_LEN);
    } else {
        // 3.20 layout: caps(2) + max packet(3)
        if input.remaining() < 5 {
            return None;
        }
        input.advance(5);
    }

    read_cstr(&mut input).ok().map(str::to_string)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
