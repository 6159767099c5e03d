use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;

/// Session Gateway - authenticating proxy for the admin console API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8000")]
    pub port: u16,

    /// Base URL of the resource API
    #[arg(short = 'u', long, env = "UPSTREAM_API_URL")]
    pub upstream_url: Option<String>,

    /// Base URL of the identity service (defaults to the resource API)
    #[arg(short = 'i', long, env = "IDENTITY_URL")]
    pub identity_url: Option<String>,

    /// Login endpoint, relative to the identity service
    #[arg(long, env = "LOGIN_PATH", default_value = "auth/login")]
    pub login_path: String,

    /// Refresh endpoint, relative to the identity service
    #[arg(long, env = "REFRESH_PATH", default_value = "auth/refresh")]
    pub refresh_path: String,

    /// Path to the SQLite file that keeps the session across restarts
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub session_db: Option<String>,

    /// Identity service refresh timeout in seconds
    #[arg(long, env = "REFRESH_TIMEOUT", default_value = "10")]
    pub refresh_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Upstream services
    pub upstream_url: Url,
    pub identity_url: Url,
    pub login_path: String,
    pub refresh_path: String,

    // Session persistence
    pub session_db_file: Option<PathBuf>,

    // Timeouts
    pub refresh_timeout: u64,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub max_body_bytes: usize,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let upstream_url = args
            .upstream_url
            .context("UPSTREAM_API_URL is required (use -u or set UPSTREAM_API_URL env var)")?;
        let upstream_url = parse_base_url(&upstream_url)
            .with_context(|| format!("Invalid UPSTREAM_API_URL: {}", upstream_url))?;

        let identity_url = match args.identity_url {
            Some(url) => parse_base_url(&url)
                .with_context(|| format!("Invalid IDENTITY_URL: {}", url))?,
            None => upstream_url.clone(),
        };

        Ok(Config {
            server_host: args.host,
            server_port: args.port,

            upstream_url,
            identity_url,
            login_path: args.login_path,
            refresh_path: args.refresh_path,

            session_db_file: args.session_db.map(|s| expand_tilde(&s)),

            refresh_timeout: args.refresh_timeout,

            http_max_connections: env_or("HTTP_MAX_CONNECTIONS", 20),
            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),
            http_request_timeout: args.http_timeout,
            max_body_bytes: env_or("MAX_BODY_BYTES", 10 * 1024 * 1024),

            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.refresh_timeout == 0 {
            anyhow::bail!("REFRESH_TIMEOUT must be greater than zero");
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        self.login_url()?;
        self.refresh_url()?;

        Ok(())
    }

    pub fn login_url(&self) -> Result<Url> {
        join_endpoint(&self.identity_url, &self.login_path)
            .with_context(|| format!("Invalid LOGIN_PATH: {}", self.login_path))
    }

    pub fn refresh_url(&self) -> Result<Url> {
        join_endpoint(&self.identity_url, &self.refresh_path)
            .with_context(|| format!("Invalid REFRESH_PATH: {}", self.refresh_path))
    }
}

/// Parse a base URL, making sure relative joins append to its path
fn parse_base_url(s: &str) -> Result<Url> {
    let mut url = Url::parse(s)?;
    if url.cannot_be_a_base() {
        anyhow::bail!("URL cannot be used as a base");
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn join_endpoint(base: &Url, path: &str) -> Result<Url> {
    Ok(base.join(path.trim_start_matches('/'))?)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(upstream: Option<&str>, identity: Option<&str>) -> CliArgs {
        CliArgs {
            host: "127.0.0.1".to_string(),
            port: 8000,
            upstream_url: upstream.map(str::to_string),
            identity_url: identity.map(str::to_string),
            login_path: "auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            session_db: None,
            refresh_timeout: 10,
            http_timeout: 60,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_upstream_url_required() {
        let err = Config::from_args(args(None, None)).unwrap_err();
        assert!(err.to_string().contains("UPSTREAM_API_URL"));
    }

    #[test]
    fn test_identity_defaults_to_upstream() {
        let config = Config::from_args(args(Some("https://api.example.com/v2"), None)).unwrap();
        assert_eq!(config.upstream_url.as_str(), "https://api.example.com/v2/");
        assert_eq!(config.identity_url, config.upstream_url);
        assert_eq!(
            config.refresh_url().unwrap().as_str(),
            "https://api.example.com/v2/auth/refresh"
        );
        assert_eq!(
            config.login_url().unwrap().as_str(),
            "https://api.example.com/v2/auth/login"
        );
    }

    #[test]
    fn test_separate_identity_service() {
        let config = Config::from_args(args(
            Some("https://api.example.com/"),
            Some("https://id.example.com/oauth"),
        ))
        .unwrap();
        assert_eq!(
            config.refresh_url().unwrap().as_str(),
            "https://id.example.com/oauth/auth/refresh"
        );
    }

    #[test]
    fn test_invalid_upstream_url() {
        assert!(Config::from_args(args(Some("not a url"), None)).is_err());
        assert!(Config::from_args(args(Some("mailto:ops@example.com"), None)).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::from_args(args(Some("https://api.example.com/"), None)).unwrap();
        assert!(config.validate().is_ok());

        config.refresh_timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_args_parse() {
        let args = CliArgs::try_parse_from([
            "session-gateway",
            "-u",
            "https://api.example.com",
            "--refresh-timeout",
            "3",
        ])
        .unwrap();
        assert_eq!(args.upstream_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(args.refresh_timeout, 3);
    }
}
