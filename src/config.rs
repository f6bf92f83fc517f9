use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
    Test,
}

impl AppEnv {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentContacts {
    pub whatsapp_number: Option<String>,
    pub telegram_username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub app_env: AppEnv,
    pub payment: PaymentContacts,
    pub memory_cache_capacity: usize,
    pub memory_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let app_env = std::env::var("APP_ENV")
            .map(|value| AppEnv::parse(&value))
            .unwrap_or(AppEnv::Development);

        let payment = PaymentContacts {
            whatsapp_number: env_non_empty("PAYMENT_WHATSAPP_NUMBER"),
            telegram_username: env_non_empty("PAYMENT_TELEGRAM_USERNAME")
                .map(|name| name.trim_start_matches('@').to_string()),
        };

        let memory_cache_capacity = env_non_empty("MEMORY_CACHE_CAPACITY")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(1024);

        let memory_cache_ttl = env_non_empty("MEMORY_CACHE_TTL_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        Self {
            host,
            port,
            log_level,
            app_env,
            payment,
            memory_cache_capacity,
            memory_cache_ttl,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 3000,
            log_level: "info".to_string(),
            app_env: AppEnv::Development,
            payment: PaymentContacts::default(),
            memory_cache_capacity: 1024,
            memory_cache_ttl: Duration::from_secs(60),
        }
    }
}

pub fn env_non_empty(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn env_bool(key: &str) -> Option<bool> {
    let value = env_non_empty(key)?;
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_env_parsing_defaults_to_development() {
        assert_eq!(AppEnv::parse("production"), AppEnv::Production);
        assert_eq!(AppEnv::parse(" TEST "), AppEnv::Test);
        assert_eq!(AppEnv::parse("staging"), AppEnv::Development);
    }

    #[test]
    fn bind_addr_uses_host_and_port() {
        let config = Config {
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:8080");
    }
}
