use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

const DEFAULT_DATABASE_URL: &str = "sqlite://chat.db";
const DEFAULT_ROOM_PASSWORD: &str = "yl123456";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);
const DEFAULT_SEND_QUEUE: usize = 256;

/// Runtime settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub room_password: String,
    pub upload_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// Outbound frames a peer may have queued before it counts as failed.
    pub send_queue: usize,
    /// Drop a connection after this long without an inbound frame. `None` keeps peers open forever.
    pub idle_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            database_url: var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            room_password: var_or("ROOM_PASSWORD", DEFAULT_ROOM_PASSWORD),
            upload_dir: PathBuf::from(var_or("UPLOAD_DIR", DEFAULT_UPLOAD_DIR)),
            bind_addr: parse_var("BIND_ADDR")?.unwrap_or(SocketAddr::from(DEFAULT_BIND_ADDR)),
            send_queue: parse_var("SEND_QUEUE")?.unwrap_or(DEFAULT_SEND_QUEUE),
            idle_timeout: parse_var::<u64>("IDLE_TIMEOUT_SECS")?.map(Duration::from_secs),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            room_password: DEFAULT_ROOM_PASSWORD.to_owned(),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            bind_addr: SocketAddr::from(DEFAULT_BIND_ADDR),
            send_queue: DEFAULT_SEND_QUEUE,
            idle_timeout: None,
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    dotenv::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("parsing {key}={raw}")),
        Err(_) => Ok(None),
    }
}
