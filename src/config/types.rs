// -------------------------------------------------------------------------------------------------
// ---- LogLevel -----------------------------------------------------------------------------------

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// -------------------------------------------------------------------------------------------------
// ---- TlsMode ------------------------------------------------------------------------------------

/// TLS policy for the proxy-to-backend hop.
#[derive(clap::ValueEnum, serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    Disabled,
    /// Upgrade when the backend offers TLS; certificates are not verified.
    #[default]
    Preferred,
    /// TLS is mandatory; certificates are not verified.
    Required,
    /// TLS is mandatory and the chain must verify.
    VerifyCa,
}

impl TlsMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "disabled" | "false" | "off" => Some(TlsMode::Disabled),
            "preferred" => Some(TlsMode::Preferred),
            "required" | "true" | "skip-verify" => Some(TlsMode::Required),
            "verify-ca" | "verify_ca" => Some(TlsMode::VerifyCa),
            _ => None,
        }
    }

    pub fn is_mandatory(self) -> bool {
        matches!(self, TlsMode::Required | TlsMode::VerifyCa)
    }
}

// -------------------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------
