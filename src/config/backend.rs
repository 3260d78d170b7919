use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{path::Path, path::PathBuf, time::Duration};
use thiserror::Error;
use tokio::fs;

use super::types::TlsMode;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// -----------------------------------------------------------------------------
// ----- BackendConfig ---------------------------------------------------------

/// Where and how to open the real, credentialed backend connection.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub database: Option<String>,

    pub tls: TlsMode,
    pub tls_ca_file: Option<PathBuf>,
    pub tls_server_name: Option<String>,

    pub connect_timeout: Option<Duration>,

    pub multi_statements: bool,
    pub found_rows: bool,
    pub local_infile: bool,
    pub allow_cleartext_passwords: bool,
}

// -----------------------------------------------------------------------------
// ----- BackendConfig: Static -------------------------------------------------

impl BackendConfig {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: &str) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: SecretString::new(password.to_owned().into_boxed_str()),
            database: None,
            tls: TlsMode::default(),
            tls_ca_file: None,
            tls_server_name: None,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            multi_statements: false,
            found_rows: false,
            local_infile: false,
            allow_cleartext_passwords: false,
        }
    }

    /// Parse `user:password@host:port/database?key=value&...`.
    ///
    /// `host:port` may also be written `tcp(host:port)`.
    pub fn from_dsn(dsn: &str) -> Result<Self, BackendConfigError> {
        // Passwords may contain '@' or '?', hosts may not.
        let (credentials, location) = dsn.rsplit_once('@').ok_or(BackendConfigError::MissingAt)?;

        let (location, query) = match location.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (location, None),
        };

        let (user, password) = credentials.split_once(':').unwrap_or((credentials, ""));
        if user.is_empty() {
            return Err(BackendConfigError::InvalidField("user".into()));
        }

        let (address, database) = match location.split_once('/') {
            Some((address, db)) if !db.is_empty() => (address, Some(db.to_string())),
            Some((address, _)) => (address, None),
            None => (location, None),
        };

        let address = address
            .strip_prefix("tcp(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(address);

        let (host, port) = split_host_port(address)?;

        let mut config = Self::new(host, port, user, password);
        config.database = database;

        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, "true"));
                config.apply_option(key, value)?;
            }
        }

        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self, BackendConfigError> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| BackendConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::parse_toml(&raw)
    }

    pub fn parse_toml(raw: &str) -> Result<Self, BackendConfigError> {
        let doc: BackendFile = toml::from_str(raw).map_err(|e| BackendConfigError::Toml { source: e })?;
        let entry = doc.backend;

        if entry.host.trim().is_empty() {
            return Err(BackendConfigError::InvalidField("host".into()));
        }
        if entry.user.trim().is_empty() {
            return Err(BackendConfigError::InvalidField("user".into()));
        }

        let mut config = Self::new(entry.host, entry.port, entry.user, &entry.password);
        config.database = entry.database.filter(|db| !db.is_empty());
        config.tls = entry.tls;
        config.tls_ca_file = entry.tls_ca_file;
        config.tls_server_name = entry.tls_server_name;
        config.multi_statements = entry.multi_statements;
        config.found_rows = entry.found_rows;
        config.local_infile = entry.local_infile;
        config.allow_cleartext_passwords = entry.allow_cleartext_passwords;

        if let Some(timeout) = entry.connect_timeout {
            config.connect_timeout = Some(timeout).filter(|t| !t.is_zero());
        }

        Ok(config)
    }
}

// -----------------------------------------------------------------------------
// ----- BackendConfig: Public -------------------------------------------------

impl BackendConfig {
    pub fn password_exposed(&self) -> &str {
        self.password.expose_secret()
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Name presented for SNI and certificate checks.
    pub fn server_name(&self) -> &str {
        self.tls_server_name.as_deref().unwrap_or(&self.host)
    }
}

// -----------------------------------------------------------------------------
// ----- BackendConfig: Private ------------------------------------------------

impl BackendConfig {
    fn apply_option(&mut self, key: &str, value: &str) -> Result<(), BackendConfigError> {
        let invalid = || BackendConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "tls" | "ssl-mode" | "ssl_mode" => {
                self.tls = TlsMode::parse(value).ok_or_else(invalid)?;
            }
            "tls-ca" | "tls_ca" | "ssl-ca" => self.tls_ca_file = Some(PathBuf::from(value)),
            "tls-server-name" | "tls_server_name" => self.tls_server_name = Some(value.to_string()),
            "connect-timeout" | "connect_timeout" | "timeout" => {
                let timeout = humantime::parse_duration(value).map_err(|_| invalid())?;
                self.connect_timeout = Some(timeout).filter(|t| !t.is_zero());
            }
            "multi_statements" | "multiStatements" => {
                self.multi_statements = parse_bool(value).ok_or_else(invalid)?
            }
            "found_rows" | "clientFoundRows" => {
                self.found_rows = parse_bool(value).ok_or_else(invalid)?
            }
            "local_infile" | "allowAllFiles" => {
                self.local_infile = parse_bool(value).ok_or_else(invalid)?
            }
            "allow_cleartext_passwords" | "allowCleartextPasswords" => {
                self.allow_cleartext_passwords = parse_bool(value).ok_or_else(invalid)?
            }
            _ => return Err(BackendConfigError::UnknownOption(key.to_string())),
        }

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct BackendFile {
    backend: BackendFileEntry,
}

#[derive(Debug, Clone, Deserialize)]
struct BackendFileEntry {
    host: String,

    #[serde(default = "default_port")]
    port: u16,

    #[serde(alias = "username")]
    user: String,

    #[serde(default)]
    password: String,

    #[serde(default, alias = "dbname")]
    database: Option<String>,

    #[serde(default)]
    tls: TlsMode,

    #[serde(default)]
    tls_ca_file: Option<PathBuf>,

    #[serde(default)]
    tls_server_name: Option<String>,

    #[serde(default, deserialize_with = "de_duration")]
    connect_timeout: Option<Duration>,

    #[serde(default)]
    multi_statements: bool,

    #[serde(default)]
    found_rows: bool,

    #[serde(default)]
    local_infile: bool,

    #[serde(default)]
    allow_cleartext_passwords: bool,
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn split_host_port(address: &str) -> Result<(String, u16), BackendConfigError> {
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| BackendConfigError::InvalidField("host".into()))?;
        (host, after.strip_prefix(':'))
    } else {
        match address.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(BackendConfigError::InvalidField("host".into()));
    }

    let port = match port {
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|_| BackendConfigError::InvalidPort(raw.to_string()))?,
        None => DEFAULT_MYSQL_PORT,
    };

    Ok((host.to_string(), port))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Accepts a humantime string ("5s", "1m 30s") or integer milliseconds.
fn de_duration<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Unexpected, Visitor};
    use std::fmt;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration such as \"5s\" or integer milliseconds")
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::invalid_value(Unexpected::Signed(v), &self));
            }
            Ok(Some(Duration::from_millis(v as u64)))
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    d.deserialize_any(DurationVisitor)
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BackendConfigError {
    #[error("connection string must look like user:password@host:port/database")]
    MissingAt,

    #[error("invalid or missing field '{0}'")]
    InvalidField(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("invalid value '{value}' for option '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_full_dsn() {
        let cfg = BackendConfig::from_dsn(
            "admin:s3cr3t@db.internal:3307/orders?tls=required&multi_statements=true&connect_timeout=2s",
        )
        .unwrap();

        assert_eq!(cfg.user, "admin");
        assert_eq!(cfg.password_exposed(), "s3cr3t");
        assert_eq!(cfg.host, "db.internal");
        assert_eq!(cfg.port, 3307);
        assert_eq!(cfg.database.as_deref(), Some("orders"));
        assert_eq!(cfg.tls, TlsMode::Required);
        assert!(cfg.multi_statements);
        assert_eq!(cfg.connect_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn password_may_contain_at_and_colon() {
        let cfg = BackendConfig::from_dsn("app:p@ss:word@127.0.0.1/db").unwrap();

        assert_eq!(cfg.user, "app");
        assert_eq!(cfg.password_exposed(), "p@ss:word");
        assert_eq!(cfg.port, DEFAULT_MYSQL_PORT);
    }

    #[test]
    fn password_may_contain_question_mark() {
        let cfg = BackendConfig::from_dsn("app:pa?ss@127.0.0.1:3306/db").unwrap();
        assert_eq!(cfg.password_exposed(), "pa?ss");
        assert_eq!(cfg.database.as_deref(), Some("db"));

        let cfg = BackendConfig::from_dsn("app:pa?ss@127.0.0.1/db?tls=disabled").unwrap();
        assert_eq!(cfg.password_exposed(), "pa?ss");
        assert_eq!(cfg.database.as_deref(), Some("db"));
        assert_eq!(cfg.tls, TlsMode::Disabled);
    }

    #[test]
    fn accepts_tcp_wrapped_address_and_no_database() {
        let cfg = BackendConfig::from_dsn("admin:admin@tcp(127.0.0.1:3306)/").unwrap();

        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 3306);
        assert_eq!(cfg.database, None);
        assert_eq!(cfg.tls, TlsMode::Preferred);
    }

    #[test]
    fn ipv6_literal() {
        let cfg = BackendConfig::from_dsn("root@[::1]:3310").unwrap();

        assert_eq!(cfg.host, "::1");
        assert_eq!(cfg.port, 3310);
        assert_eq!(cfg.password_exposed(), "");
        assert_eq!(cfg.address(), "[::1]:3310");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            BackendConfig::from_dsn("no-at-sign"),
            Err(BackendConfigError::MissingAt)
        ));
        assert!(matches!(
            BackendConfig::from_dsn("u:p@host:notaport"),
            Err(BackendConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            BackendConfig::from_dsn("u:p@host?tls=sometimes"),
            Err(BackendConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            BackendConfig::from_dsn("u:p@host?frobnicate=1"),
            Err(BackendConfigError::UnknownOption(_))
        ));
        assert!(matches!(
            BackendConfig::from_dsn(":p@host"),
            Err(BackendConfigError::InvalidField(_))
        ));
    }

    #[tokio::test]
    async fn loads_toml_file() {
        let toml = r#"
            [backend]
            host = "10.0.0.5"
            user = "svc"
            password = "hunter2"
            database = "inventory"
            tls = "verify-ca"
            tls_ca_file = "/etc/ssl/db-ca.pem"
            connect_timeout = "750ms"
            found_rows = true
        "#;

        let tmp = write_tmp(toml);
        let cfg = BackendConfig::from_file(tmp.path()).await.unwrap();

        assert_eq!(cfg.host, "10.0.0.5");
        assert_eq!(cfg.port, DEFAULT_MYSQL_PORT);
        assert_eq!(cfg.password_exposed(), "hunter2");
        assert_eq!(cfg.database.as_deref(), Some("inventory"));
        assert_eq!(cfg.tls, TlsMode::VerifyCa);
        assert_eq!(cfg.tls_ca_file, Some(PathBuf::from("/etc/ssl/db-ca.pem")));
        assert_eq!(cfg.connect_timeout, Some(Duration::from_millis(750)));
        assert!(cfg.found_rows);
        assert!(!cfg.multi_statements);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = BackendConfig::from_file(Path::new("/nonexistent/backend.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendConfigError::Io { .. }));
    }

    #[test]
    fn toml_timeout_in_millis_and_empty_user() {
        let cfg = BackendConfig::parse_toml(
            r#"
            [backend]
            host = "db"
            username = "alias"
            connect_timeout = 1500
        "#,
        )
        .unwrap();
        assert_eq!(cfg.user, "alias");
        assert_eq!(cfg.connect_timeout, Some(Duration::from_millis(1500)));

        let err = BackendConfig::parse_toml(
            r#"
            [backend]
            host = "db"
            user = "  "
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, BackendConfigError::InvalidField(_)));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
