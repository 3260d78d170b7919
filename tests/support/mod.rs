#![allow(dead_code)]

use std::{
    net::SocketAddr,
    process::Command,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::{BufMut, BytesMut};
use mysql_auth_proxy::{
    BackendConfig, MysqlConnector, Proxy, ProxySettings,
    backend::auth::scramble_native,
    config::TlsMode,
    wire::{CapabilityFlags, Frame, read_frame, write_frame},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{oneshot, watch},
    time::sleep,
};

pub const BACKEND_USER: &str = "app";
pub const BACKEND_PASSWORD: &str = "s3cret";
pub const BACKEND_DATABASE: &str = "shop";

const BACKEND_SCRAMBLE: &[u8; 20] = b"0123456789abcdefghij";

// -----------------------------------------------------------------------------
// ----- Fake backend ----------------------------------------------------------

/// Scripted MySQL server: greets with `mysql_native_password`, checks the
/// proxy's credentials for real, then echoes every byte it receives.
pub struct FakeBackend {
    pub addr: SocketAddr,
    logins: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake backend");
        let addr = listener.local_addr().unwrap();
        let logins = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&logins);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    if serve_login(socket, &counter).await.is_err() {
                        eprintln!("fake backend: session ended with error");
                    }
                });
            }
        });

        Self { addr, logins }
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> BackendConfig {
        self.config_with_password(BACKEND_PASSWORD)
    }

    pub fn config_with_password(&self, password: &str) -> BackendConfig {
        let mut cfg = BackendConfig::new(
            self.addr.ip().to_string(),
            self.addr.port(),
            BACKEND_USER,
            password,
        );
        cfg.database = Some(BACKEND_DATABASE.to_string());
        cfg.tls = TlsMode::Disabled;
        cfg
    }

    pub fn dsn(&self) -> String {
        format!(
            "{BACKEND_USER}:{BACKEND_PASSWORD}@{}/{BACKEND_DATABASE}?tls=disabled",
            self.addr
        )
    }
}

async fn serve_login(mut socket: TcpStream, logins: &AtomicUsize) -> std::io::Result<()> {
    write_frame(&mut socket, &backend_greeting(), 0)
        .await
        .map_err(std::io::Error::other)?;

    let response = read_frame(&mut socket, 1 << 16)
        .await
        .map_err(std::io::Error::other)?;

    let expected = scramble_native(BACKEND_PASSWORD, BACKEND_SCRAMBLE);
    let body = &response.payload[32..];
    let user_end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    let user = &body[..user_end];
    let auth_len = body[user_end + 1] as usize;
    let auth = &body[user_end + 2..user_end + 2 + auth_len];

    let reply_seq = response.sequence.wrapping_add(1);
    if user != BACKEND_USER.as_bytes() || auth != expected.as_slice() {
        let mut err = vec![0xFF, 0x15, 0x04];
        err.extend_from_slice(b"#28000Access denied for user 'app'");
        write_frame(&mut socket, &err, reply_seq)
            .await
            .map_err(std::io::Error::other)?;
        return Ok(());
    }

    logins.fetch_add(1, Ordering::SeqCst);
    write_frame(&mut socket, &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00], reply_seq)
        .await
        .map_err(std::io::Error::other)?;

    let (mut reader, mut writer) = socket.split();
    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await
}

fn backend_greeting() -> Vec<u8> {
    let caps = CapabilityFlags::LONG_PASSWORD
        | CapabilityFlags::CONNECT_WITH_DB
        | CapabilityFlags::PROTOCOL_41
        | CapabilityFlags::TRANSACTIONS
        | CapabilityFlags::SECURE_CONNECTION
        | CapabilityFlags::PLUGIN_AUTH;

    let mut b = BytesMut::new();
    b.put_u8(10);
    b.extend_from_slice(b"8.0.36-fake\0");
    b.put_u32_le(77);
    b.extend_from_slice(&BACKEND_SCRAMBLE[..8]);
    b.put_u8(0);
    b.put_u16_le(caps.low());
    b.put_u8(45);
    b.put_u16_le(0x0002);
    b.put_u16_le(caps.high());
    b.put_u8(21);
    b.put_bytes(0, 10);
    b.extend_from_slice(&BACKEND_SCRAMBLE[8..]);
    b.put_u8(0);
    b.extend_from_slice(b"mysql_native_password\0");
    b.to_vec()
}

// -----------------------------------------------------------------------------
// ----- In-process proxy ------------------------------------------------------

pub struct RunningProxy {
    pub port: u16,
    _stop: watch::Sender<bool>,
}

pub async fn start_proxy(backend: BackendConfig) -> RunningProxy {
    start_proxy_with(backend, ProxySettings::default()).await
}

pub async fn start_proxy_with(backend: BackendConfig, settings: ProxySettings) -> RunningProxy {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (port_tx, port_rx) = oneshot::channel();

    let connector = MysqlConnector::new(&backend).expect("backend tls settings");
    let mut proxy = Proxy::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(backend),
        Arc::new(connector),
        settings,
    );
    tokio::spawn(async move { proxy.listen_and_serve(stop_rx, Some(port_tx)).await });

    let port = port_rx.await.expect("proxy reports its port");
    RunningProxy {
        port,
        _stop: stop_tx,
    }
}

// -----------------------------------------------------------------------------
// ----- Raw client ------------------------------------------------------------

/// A HandshakeResponse41 with whatever credentials the caller likes.
pub fn handshake_response(user: &str, auth: &[u8]) -> Vec<u8> {
    let caps = CapabilityFlags::PROTOCOL_41
        | CapabilityFlags::SECURE_CONNECTION
        | CapabilityFlags::PLUGIN_AUTH
        | CapabilityFlags::CONNECT_WITH_DB;

    let mut b = BytesMut::new();
    b.put_u32_le(caps.bits());
    b.put_u32_le(16 * 1024 * 1024);
    b.put_u8(45);
    b.put_bytes(0, 23);
    b.extend_from_slice(user.as_bytes());
    b.put_u8(0);
    b.put_u8(auth.len() as u8);
    b.extend_from_slice(auth);
    b.extend_from_slice(b"nonexistent_db\0");
    b.extend_from_slice(b"caching_sha2_password\0");
    b.to_vec()
}

/// Connect, take the greeting, send `response` with `sequence`, return the
/// greeting and the proxy's answer.
pub async fn raw_login(port: u16, response: &[u8], sequence: u8) -> (TcpStream, Frame, Frame) {
    let mut client = TcpStream::connect(("127.0.0.1", port)).await.expect("connect to proxy");
    let greeting = read_frame(&mut client, 1 << 16).await.expect("greeting");
    write_frame(&mut client, response, sequence).await.expect("send response");
    let answer = read_frame(&mut client, 1 << 16).await.expect("auth answer");
    (client, greeting, answer)
}

/// Read until EOF, failing the test if it takes too long.
pub async fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(15), stream.read_to_end(&mut buf))
        .await
        .expect("peer closed in time")
        .expect("read to eof");
    buf
}

// -----------------------------------------------------------------------------
// ----- Binary ----------------------------------------------------------------

pub fn reserve_port(host: &str) -> u16 {
    let listener = std::net::TcpListener::bind(format!("{host}:0")).expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

pub fn spawn_proxy_binary(host: &str, port: u16, backend_dsn: &str) -> std::process::Child {
    let exe = env!("CARGO_BIN_EXE_mysql-auth-proxy");

    Command::new(exe)
        .env("MYSQL_AUTH_PROXY_HOST", host)
        .env("MYSQL_AUTH_PROXY_PORT", port.to_string())
        .env("MYSQL_AUTH_PROXY_BACKEND", backend_dsn)
        .spawn()
        .expect("spawn mysql-auth-proxy")
}

pub async fn wait_for_listen(host: &str, port: u16) {
    let addr = format!("{host}:{port}");
    for _ in 0..100 {
        if std::net::TcpStream::connect(&addr).is_ok() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("mysql-auth-proxy did not start listening on {addr}");
}

// -----------------------------------------------------------------------------
// ----- Real backend ----------------------------------------------------------

/// DSN of a real MySQL server for end-to-end tests, if one is configured.
pub fn real_backend_dsn() -> Option<String> {
    std::env::var("MYSQL_AUTH_PROXY_TEST_BACKEND")
        .ok()
        .filter(|dsn| !dsn.trim().is_empty())
}
