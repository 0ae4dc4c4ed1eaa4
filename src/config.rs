//! Server configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

/// SMTP settings for outbound notification mail. Absent means email delivery
/// is disabled and notifications stay in-system only.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind: SocketAddr,
    /// Directory holding the SQLite database, generated report files and evidence uploads.
    pub storage_path: PathBuf,
    /// Base URL prepended to notification deep links in emails.
    pub site_url: String,
    pub smtp: Option<SmtpConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            storage_path: std::env::temp_dir().join("ppda-storage"),
            site_url: "http://localhost:8080".to_string(),
            smtp: None,
        }
    }
}

impl Config {
    /// Read configuration from `PPDA_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(bind) = std::env::var("PPDA_BIND") {
            if let Ok(addr) = bind.parse() {
                config.bind = addr;
            } else {
                tracing::warn!("PPDA_BIND is not a valid socket address, using default");
            }
        }

        if let Ok(path) = std::env::var("PPDA_STORAGE_PATH") {
            config.storage_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("PPDA_SITE_URL") {
            config.site_url = url;
        }

        if let Ok(host) = std::env::var("PPDA_SMTP_HOST") {
            let port = std::env::var("PPDA_SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(25);
            config.smtp = Some(SmtpConfig {
                host,
                port,
                username: std::env::var("PPDA_SMTP_USER").ok(),
                password: std::env::var("PPDA_SMTP_PASSWORD").ok(),
                from: std::env::var("PPDA_SMTP_FROM")
                    .unwrap_or_else(|_| "no-reply@ppda.local".to_string()),
            });
        }

        config
    }

    /// Directory where generated report files are written.
    pub fn reports_dir(&self) -> PathBuf {
        self.storage_path.join("reportes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind.port(), 8080);
        assert!(config.smtp.is_none());
    }

    #[test]
    fn test_reports_dir() {
        let config = Config {
            storage_path: PathBuf::from("/data/ppda"),
            ..Config::default()
        };
        assert_eq!(config.reports_dir(), PathBuf::from("/data/ppda/reportes"));
    }
}
