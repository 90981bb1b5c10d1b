use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_SESSION_SECRET: &str = "wicket-ledger-development-secret";

#[derive(Debug, Deserialize)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct Session {
    pub secret: String,
    pub ttl_seconds: i64,
    pub enforce: bool,
}

#[derive(Debug, Deserialize)]
pub struct Spin {
    pub max_reward: i64,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: Database,
    pub server: Server,
    pub session: Session,
    pub spin: Spin,
}

impl Settings {
    /// Defaults, then the optional TOML file at `path`, then `LEDGER__SECTION__KEY` variables.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        Self::build(path, Environment::with_prefix("LEDGER").separator("__"))
    }

    fn build(path: &str, environment: Environment) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("database.url", "sqlite://wicket_ledger.db")?
            .set_default("database.max_connections", 5)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8002)?
            .set_default("session.secret", DEFAULT_SESSION_SECRET)?
            .set_default("session.ttl_seconds", 86_400)?
            .set_default("session.enforce", false)?
            .set_default("spin.max_reward", 200)?
            .add_source(File::with_name(path).required(false))
            .add_source(environment)
            .build()?;

        config.try_deserialize()
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
