use async_mutex::Mutex;
use cached::stores::TimedCache;
use slog::o;
use slog::Drain;
use sqlx::postgres::PgPoolOptions;
use std::io::Read;
use std::sync::Arc;
use std::{env, fs};

mod analytics;
mod catalog;
mod crypto;
mod error;
mod logging;
mod models;
mod service;
mod session;
mod spotify;
mod store;
mod sync;
mod utils;

pub use error::{Error, Result};

/// Build an `Error::Internal` from format args
#[macro_export]
macro_rules! se {
    ($($arg:tt)*) => {{
        $crate::Error::Internal(format!($($arg)*))
    }};
}

/// Response builders shared by the handlers
#[macro_export]
macro_rules! resp {
    (json => $obj:expr) => {{
        tide::Response::builder(200)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (error => $err:expr) => {{
        let err: &$crate::Error = &$err;
        tide::Response::builder(err.status())
            .body(serde_json::json!({
                "error": err.to_string(),
                "code": err.code(),
            }))
            .build()
    }};
}

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

lazy_static::lazy_static! {
    pub static ref CONFIG: Config = Config::load();

    // The "base" logger that all crates should branch off of
    pub static ref BASE_LOG: slog::Logger = {
        let level: slog::Level = CONFIG.log_level
                .parse()
                .expect("invalid log_level");
        if CONFIG.log_format == "pretty" {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::CompactFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        } else {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        }
    };

    // Base logger
    pub static ref LOG: slog::Logger = BASE_LOG.new(slog::o!("app" => "spotstat"));

    // one-time login state tokens, valid for 5 minutes
    pub static ref ONE_TIME_TOKENS: Arc<Mutex<TimedCache<String, ()>>> = Arc::new(Mutex::new(TimedCache::with_lifespan(300)));
}

#[derive(serde::Deserialize)]
pub struct Config {
    pub version: String,
    pub ssl: bool,
    pub host: String,
    pub real_hostname: Option<String>,
    pub port: u16,
    pub log_format: String,
    pub log_level: String,
    pub spotify_client_id: String,
    pub spotify_secret_id: String,
    pub db_url: String,
    pub db_max_connections: u32,
    pub enc_key: String,
    pub frontend_url: String,
    pub top_artists_limit: u32,
    pub top_tracks_limit: u32,
    pub recently_played_limit: u32,
}
impl Config {
    pub fn load() -> Self {
        let version = fs::File::open("commit_hash.txt")
            .map(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s).expect("Error reading commit_hash");
                s.trim().to_string()
            })
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            version,
            ssl: env_or("SSL", "false") == "true",
            host: env_or("HOST", "localhost"),
            real_hostname: env::var("REAL_HOSTNAME").ok(),
            port: env_or("PORT", "3030").parse().expect("invalid port"),
            log_format: env_or("LOG_FORMAT", "json")
                .to_lowercase()
                .trim()
                .to_string(),
            log_level: env_or("LOG_LEVEL", "INFO"),
            spotify_client_id: env_or("SPOTIFY_CLIENT_ID", "fake"),
            spotify_secret_id: env_or("SPOTIFY_SECRET_ID", "fake"),
            db_url: env_or("DATABASE_URL", "error"),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", "5")
                .parse()
                .expect("invalid db_max_connections"),
            enc_key: env_or("ENC_KEY", "01234567890123456789012345678901"),
            frontend_url: env_or("FRONTEND_URL", "http://localhost:5173")
                .trim_end_matches('/')
                .to_string(),
            top_artists_limit: env_or("TOP_ARTISTS_LIMIT", "20")
                .parse()
                .expect("invalid top_artists_limit"),
            top_tracks_limit: env_or("TOP_TRACKS_LIMIT", "50")
                .parse()
                .expect("invalid top_tracks_limit"),
            recently_played_limit: env_or("RECENTLY_PLAYED_LIMIT", "50")
                .parse()
                .expect("invalid recently_played_limit"),
        }
    }
    pub fn initialize(&self) -> anyhow::Result<()> {
        if self.enc_key.len() != 32 {
            anyhow::bail!("ENC_KEY must be 32 bytes, got {}", self.enc_key.len());
        }
        slog::info!(
            LOG, "initialized config";
            "version" => &self.version,
            "ssl" => &self.ssl,
            "host" => &self.host,
            "port" => &self.port,
            "log_format" => &self.log_format,
            "log_level" => &self.log_level,
            "frontend_url" => &self.frontend_url,
            "db_max_connections" => self.db_max_connections,
            "top_artists_limit" => self.top_artists_limit,
            "top_tracks_limit" => self.top_tracks_limit,
            "recently_played_limit" => self.recently_played_limit,
        );
        Ok(())
    }
    pub fn host(&self) -> String {
        let p = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", p, self.host, self.port)
    }
    pub fn redirect_host(&self) -> String {
        self.real_hostname.clone().unwrap_or_else(|| self.host())
    }
    pub fn spotify_redirect_url(&self) -> String {
        format!("{}/spotify/callback", self.redirect_host())
    }
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env if one exists
    dotenv::dotenv().ok();
    CONFIG.initialize()?;

    let pool = PgPoolOptions::new()
        .max_connections(CONFIG.db_max_connections)
        .connect(&CONFIG.db_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    slog::info!(LOG, "applied migrations");

    let store = Arc::new(store::postgres::PgStore::new(pool));
    let catalog = Arc::new(spotify::SpotifyCatalog::from_config(&CONFIG));
    service::start(store, catalog).await?;
    Ok(())
}
