use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "keygate",
    version,
    about = "Multi-tenant reverse proxy and key-management plane for LLM APIs"
)]
pub struct Cli {
    /// Database DSN (sqlite or postgres).
    #[arg(
        long,
        env = "KEYGATE_DSN",
        default_value = "sqlite://keygate.db?mode=rwc"
    )]
    pub dsn: String,

    /// Bind host.
    #[arg(long, env = "KEYGATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "KEYGATE_PORT", default_value_t = 8700)]
    pub port: u16,

    /// 64-character hex AES-256 master key for credentials at rest.
    /// A fresh key is generated (and printed) when omitted; stored
    /// ciphertexts are unreadable across restarts without a stable key.
    #[arg(long, env = "KEYGATE_ENCRYPTION_KEY")]
    pub encryption_key: Option<String>,
}
