use bytes::{BufMut, BytesMut};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::auth::{self, AuthPlugin, FAST_AUTH_SUCCESS, PERFORM_FULL_AUTH};
use super::connector::BackendLink;
use super::greeting::{
    AUTH_SWITCH_HEADER, ERR_HEADER, MORE_DATA_HEADER, OK_HEADER, ServerError, ServerGreeting,
    ok_status_flags,
};
use super::stream::BackendStream;
use crate::config::{BackendConfig, TlsMode};
use crate::errors::ProxyError;
use crate::tls;
use crate::wire::{CapabilityFlags, Frame, put_lenenc_bytes, read_cstr_bytes, read_frame, write_frame};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;
const UTF8MB4_GENERAL_CI: u8 = 45;

// Greeting and auth packets are small; anything bigger is not a MySQL server.
const MAX_AUTH_PACKET: usize = 64 * 1024;

// Auth switch + more-data exchanges never need more than a handful of rounds.
const MAX_AUTH_ROUNDS: usize = 8;

// -----------------------------------------------------------------------------
// ----- BackendConnection -----------------------------------------------------

/// A backend connection that is still inside its login handshake.
#[derive(Debug)]
pub(crate) struct BackendConnection {
    stream: BackendStream,
    greeting: ServerGreeting,
    capabilities: CapabilityFlags,
    sequence: u8,
}

// -----------------------------------------------------------------------------
// ----- BackendConnection: Static ---------------------------------------------

impl BackendConnection {
    /// TCP connect, read the greeting, upgrade to TLS through `tls_connector`
    /// if the mode asks for it.
    pub(crate) async fn connect(
        config: &BackendConfig,
        tls_connector: Option<&TlsConnector>,
    ) -> Result<Self, ProxyError> {
        let addr = config.address();

        let connecting = TcpStream::connect(&addr);
        let connected = match config.connect_timeout {
            Some(limit) => timeout(limit, connecting).await.map_err(|_| {
                ProxyError::unavailable(format!("connect to {addr} timed out after {limit:?}"))
            })?,
            None => connecting.await,
        };
        let mut tcp =
            connected.map_err(|e| ProxyError::unavailable(format!("connect to {addr}: {e}")))?;
        tcp.set_nodelay(true)
            .map_err(|e| ProxyError::unavailable(format!("set TCP_NODELAY on {addr}: {e}")))?;

        let frame = read_frame(&mut tcp, MAX_AUTH_PACKET)
            .await
            .map_err(|e| ProxyError::unavailable(format!("reading greeting from {addr}: {e}")))?;

        if frame.payload.first() == Some(&ERR_HEADER) {
            let reason = ServerError::parse(&frame.payload)
                .map(|err| err.to_string())
                .unwrap_or_else(|_| "malformed ERR packet".to_string());
            return Err(ProxyError::unavailable(format!("{addr} refused connection: {reason}")));
        }

        let greeting = ServerGreeting::parse(&frame.payload)
            .map_err(|e| ProxyError::unavailable(format!("bad greeting from {addr}: {e}")))?;
        if !greeting.capabilities.contains(CapabilityFlags::PROTOCOL_41) {
            return Err(ProxyError::unavailable(format!(
                "{addr} ({}) does not speak protocol 4.1",
                greeting.server_version
            )));
        }

        debug!(
            backend = %addr,
            version = %greeting.server_version,
            connection_id = greeting.connection_id,
            plugin = greeting.auth_plugin.as_deref().unwrap_or("-"),
            "backend greeting"
        );

        let mut capabilities = requested_capabilities(config) & greeting.capabilities;
        let mut sequence = frame.sequence.wrapping_add(1);

        let connector = tls_connector.filter(|_| config.tls != TlsMode::Disabled);

        let stream = match connector {
            Some(connector) if greeting.capabilities.contains(CapabilityFlags::SSL) => {
                capabilities = capabilities.with(CapabilityFlags::SSL);
                write_frame(&mut tcp, &ssl_request(capabilities), sequence)
                    .await
                    .map_err(|e| ProxyError::unavailable(format!("ssl request to {addr}: {e}")))?;
                sequence = sequence.wrapping_add(1);

                let server_name = tls::server_name(config.server_name())
                    .map_err(|e| ProxyError::unavailable(e.to_string()))?;
                let tls_stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ProxyError::unavailable(format!("tls handshake with {addr}: {e}")))?;

                debug!(backend = %addr, "backend link upgraded to TLS");
                BackendStream::Tls(Box::new(tls_stream))
            }
            None if config.tls.is_mandatory() => {
                return Err(ProxyError::unavailable(format!(
                    "tls mode requires TLS to {addr} but no connector was configured"
                )));
            }
            Some(_) if config.tls.is_mandatory() => {
                return Err(ProxyError::unavailable(format!(
                    "{addr} does not support TLS but tls mode requires it"
                )));
            }
            Some(_) => {
                warn!(backend = %addr, "backend does not offer TLS; continuing unencrypted");
                BackendStream::Plain(tcp)
            }
            None => BackendStream::Plain(tcp),
        };

        Ok(Self {
            stream,
            greeting,
            capabilities,
            sequence,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- BackendConnection: Public ---------------------------------------------

impl BackendConnection {
    /// Run the login exchange. On success the stream sits right after the OK.
    pub(crate) async fn authenticate(
        mut self,
        config: &BackendConfig,
    ) -> Result<BackendLink, ProxyError> {
        let password = config.password_exposed();

        let mut plugin = self.initial_plugin();
        self.check_cleartext(plugin, config)?;

        let response = plugin.response(password, &self.greeting.scramble);
        let packet = handshake_response(config, self.capabilities, plugin, &response);
        self.write_packet(&packet).await?;

        for _ in 0..MAX_AUTH_ROUNDS {
            let frame = self.read_packet().await?;
            let payload = &frame.payload[..];

            match payload.first().copied() {
                Some(OK_HEADER) => {
                    let status_flags = ok_status_flags(payload)
                        .map_err(|e| ProxyError::auth_failed(format!("bad OK packet: {e}")))?;

                    debug!(
                        user = %config.user,
                        plugin = plugin.name(),
                        tls = self.stream.is_tls(),
                        "backend login complete"
                    );

                    return Ok(BackendLink {
                        stream: self.stream,
                        greeting: self.greeting,
                        capabilities: self.capabilities,
                        status_flags,
                    });
                }

                Some(ERR_HEADER) => {
                    let reason = ServerError::parse(payload)
                        .map(|err| err.to_string())
                        .unwrap_or_else(|_| "malformed ERR packet".to_string());
                    return Err(ProxyError::auth_failed(reason));
                }

                Some(AUTH_SWITCH_HEADER) => {
                    let (name, scramble) = parse_auth_switch(payload)?;
                    plugin = AuthPlugin::from_name(&name).ok_or_else(|| {
                        ProxyError::auth_failed(format!("unsupported auth plugin '{name}'"))
                    })?;
                    self.check_cleartext(plugin, config)?;

                    debug!(plugin = plugin.name(), "backend requested auth switch");
                    let response = plugin.response(password, &scramble);
                    self.write_packet(&response).await?;
                }

                Some(MORE_DATA_HEADER) if plugin == AuthPlugin::CachingSha2Password => {
                    match payload.get(1).copied() {
                        Some(FAST_AUTH_SUCCESS) => debug!("caching_sha2_password fast auth"),
                        Some(PERFORM_FULL_AUTH) => {
                            if !self.stream.is_tls() {
                                return Err(ProxyError::auth_failed(
                                    "caching_sha2_password full authentication requires TLS to the backend",
                                ));
                            }
                            debug!("caching_sha2_password full auth over TLS");
                            self.write_packet(&auth::clear_password(password)).await?;
                        }
                        _ => {
                            return Err(ProxyError::auth_failed(
                                "unexpected caching_sha2_password status",
                            ));
                        }
                    }
                }

                _ => {
                    return Err(ProxyError::auth_failed(
                        "unexpected packet during authentication",
                    ));
                }
            }
        }

        Err(ProxyError::auth_failed("too many authentication rounds"))
    }
}

// -----------------------------------------------------------------------------
// ----- BackendConnection: Private --------------------------------------------

impl BackendConnection {
    fn initial_plugin(&self) -> AuthPlugin {
        self.greeting
            .auth_plugin
            .as_deref()
            .and_then(AuthPlugin::from_name)
            .unwrap_or(AuthPlugin::NativePassword)
    }

    fn check_cleartext(&self, plugin: AuthPlugin, config: &BackendConfig) -> Result<(), ProxyError> {
        if plugin == AuthPlugin::ClearPassword
            && !self.stream.is_tls()
            && !config.allow_cleartext_passwords
        {
            return Err(ProxyError::auth_failed(
                "backend asked for mysql_clear_password on an unencrypted link",
            ));
        }
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Frame, ProxyError> {
        let frame = read_frame(&mut self.stream, MAX_AUTH_PACKET)
            .await
            .map_err(|e| ProxyError::unavailable(format!("backend link during login: {e}")))?;
        self.sequence = frame.sequence.wrapping_add(1);
        Ok(frame)
    }

    async fn write_packet(&mut self, payload: &[u8]) -> Result<(), ProxyError> {
        write_frame(&mut self.stream, payload, self.sequence)
            .await
            .map_err(|e| ProxyError::unavailable(format!("backend link during login: {e}")))?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Packet builders -------------------------------------------------------

fn requested_capabilities(config: &BackendConfig) -> CapabilityFlags {
    let mut caps = CapabilityFlags::LONG_PASSWORD
        | CapabilityFlags::LONG_FLAG
        | CapabilityFlags::PROTOCOL_41
        | CapabilityFlags::TRANSACTIONS
        | CapabilityFlags::SECURE_CONNECTION
        | CapabilityFlags::MULTI_RESULTS
        | CapabilityFlags::PS_MULTI_RESULTS
        | CapabilityFlags::PLUGIN_AUTH
        | CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA;

    if config.database.is_some() {
        caps = caps | CapabilityFlags::CONNECT_WITH_DB;
    }
    if config.multi_statements {
        caps = caps | CapabilityFlags::MULTI_STATEMENTS;
    }
    if config.found_rows {
        caps = caps | CapabilityFlags::FOUND_ROWS;
    }
    if config.local_infile {
        caps = caps | CapabilityFlags::LOCAL_FILES;
    }
    caps
}

fn ssl_request(capabilities: CapabilityFlags) -> BytesMut {
    let mut b = BytesMut::with_capacity(32);
    b.put_u32_le(capabilities.bits());
    b.put_u32_le(MAX_PACKET_SIZE);
    b.put_u8(UTF8MB4_GENERAL_CI);
    b.put_bytes(0, 23);
    b
}

fn handshake_response(
    config: &BackendConfig,
    capabilities: CapabilityFlags,
    plugin: AuthPlugin,
    auth_response: &[u8],
) -> BytesMut {
    let mut b = ssl_request(capabilities);

    b.extend_from_slice(config.user.as_bytes());
    b.put_u8(0);

    if capabilities.contains(CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA) {
        put_lenenc_bytes(&mut b, auth_response);
    } else {
        // SECURE_CONNECTION is always negotiated (4.1 servers), so a length byte.
        b.put_u8(auth_response.len() as u8);
        b.extend_from_slice(auth_response);
    }

    if capabilities.contains(CapabilityFlags::CONNECT_WITH_DB) {
        if let Some(database) = &config.database {
            b.extend_from_slice(database.as_bytes());
        }
        b.put_u8(0);
    }

    if capabilities.contains(CapabilityFlags::PLUGIN_AUTH) {
        b.extend_from_slice(plugin.name().as_bytes());
        b.put_u8(0);
    }

    b
}

/// `0xFE` + plugin name + NUL + plugin data (trailing NUL dropped).
fn parse_auth_switch(payload: &[u8]) -> Result<(String, Vec<u8>), ProxyError> {
    let mut input = payload.get(1..).unwrap_or_default();
    if input.is_empty() {
        return Err(ProxyError::auth_failed(
            "backend requested the pre-4.1 password protocol",
        ));
    }

    let name = read_cstr_bytes(&mut input)
        .map_err(|e| ProxyError::auth_failed(format!("bad auth switch request: {e}")))?;
    let data = input.strip_suffix(&[0]).unwrap_or(input);

    Ok((String::from_utf8_lossy(name).into_owned(), data.to_vec()))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
