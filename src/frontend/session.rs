use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::wire::{CapabilityFlags, FramingError, put_frame};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const OUTBOX_CAPACITY_HINT: usize = 256;

// -----------------------------------------------------------------------------
// ----- AuthStage -------------------------------------------------------------

/// Where a client connection is in the forged login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Nothing sent yet.
    Greeting,

    /// Greeting sent, waiting for the client's handshake response.
    AwaitingResponse,

    /// OK sent; the connection belongs to the relay from here on.
    Authenticated,
}

// -----------------------------------------------------------------------------
// ----- ConnectionSession -----------------------------------------------------

/// Per-connection state, owned by the connection's task for its lifetime.
#[derive(Debug)]
pub struct ConnectionSession {
    peer: SocketAddr,
    stage: AuthStage,
    sequence: u8,
    capabilities: CapabilityFlags,
    outbox: BytesMut,
}

// -----------------------------------------------------------------------------
// ----- ConnectionSession: Static ---------------------------------------------

impl ConnectionSession {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            stage: AuthStage::Greeting,
            sequence: 0,
            capabilities: CapabilityFlags::empty(),
            outbox: BytesMut::with_capacity(OUTBOX_CAPACITY_HINT),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionSession: Public ---------------------------------------------

impl ConnectionSession {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stage(&self) -> AuthStage {
        self.stage
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    pub(crate) fn advance_to(&mut self, stage: AuthStage) {
        self.stage = stage;
    }

    pub(crate) fn set_capabilities(&mut self, capabilities: CapabilityFlags) {
        self.capabilities = capabilities;
    }

    /// Record the sequence of a frame received from the client; our next
    /// frame answers it with the following number.
    pub(crate) fn observe(&mut self, received: u8) {
        self.sequence = received.wrapping_add(1);
    }

    /// Frame `payload` with the current sequence into the outbox.
    pub(crate) fn queue(&mut self, payload: &[u8]) -> Result<(), FramingError> {
        put_frame(&mut self.outbox, payload, self.sequence)?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    pub(crate) async fn flush<W>(&mut self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all_buf(&mut self.outbox).await?;
        writer.flush().await
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
