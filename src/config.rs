//! Configuration utilities (ports, collaborator URLs, timers, env vars)

use std::{env, net::{Ipv4Addr, SocketAddr}, str::FromStr, time::Duration};

use crate::util::sign::SignScheme;

/// Runtime configuration, read from the environment with defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub client_ip: String,
    pub ws_port: u16,
    pub game_type: String,
    pub hall_url: String,
    pub hall_pri_key: String,
    pub sign_scheme: SignScheme,
    pub account_url: String,
    pub token_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub register_attempts: u32,
    pub register_backoff: Duration,
    pub settle_retry_interval: Duration,
    pub http_timeout: Duration,
    pub room_idle: Duration,
    pub sweep_interval: Duration,
    /// `None` keeps redealing forever when nobody bids.
    pub max_redeals: Option<u32>,
    /// How long a seat may stay offline mid-game before it is flagged as
    /// taken over. `None` disables the check.
    pub trusteeship_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9001,
            client_ip: "127.0.0.1".to_string(),
            ws_port: 9001,
            game_type: "doudizhu4".to_string(),
            hall_url: "http://localhost:9002".to_string(),
            hall_pri_key: String::new(),
            sign_scheme: SignScheme::Md5Suffix,
            account_url: "http://localhost:8101".to_string(),
            token_ttl: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(5),
            register_attempts: 5,
            register_backoff: Duration::from_secs(2),
            settle_retry_interval: Duration::from_secs(5),
            http_timeout: Duration::from_secs(5),
            room_idle: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(60),
            max_redeals: None,
            trusteeship_timeout: None,
        }
    }
}

impl Config {
    /// Build the configuration from env vars; anything missing or
    /// unparseable keeps its default.
    pub fn from_env() -> Self {
        let d = Self::default();
        let port = var_or("PORT", d.port);
        Self {
            port,
            client_ip: env::var("CLIENT_IP").unwrap_or(d.client_ip),
            ws_port: var_or("WS_PORT", port),
            game_type: env::var("GAME_TYPE").unwrap_or(d.game_type),
            hall_url: env::var("HALL_URL").unwrap_or(d.hall_url),
            hall_pri_key: env::var("HALL_PRI_KEY").unwrap_or(d.hall_pri_key),
            sign_scheme: var_or("SIGN_SCHEME", d.sign_scheme),
            account_url: env::var("ACCOUNT_URL").unwrap_or(d.account_url),
            token_ttl: secs_or("TOKEN_TTL_SECS", d.token_ttl),
            heartbeat_interval: secs_or("HEARTBEAT_SECS", d.heartbeat_interval),
            register_attempts: var_or("REGISTER_ATTEMPTS", d.register_attempts),
            register_backoff: secs_or("REGISTER_BACKOFF_SECS", d.register_backoff),
            settle_retry_interval: secs_or("SETTLE_RETRY_SECS", d.settle_retry_interval),
            http_timeout: secs_or("HTTP_TIMEOUT_SECS", d.http_timeout),
            room_idle: secs_or("ROOM_IDLE_SECS", d.room_idle),
            sweep_interval: secs_or("SWEEP_SECS", d.sweep_interval),
            max_redeals: env::var("MAX_REDEALS").ok().and_then(|v| parse_logged("MAX_REDEALS", &v)),
            trusteeship_timeout: env::var("TRUSTEESHIP_SECS")
                .ok()
                .and_then(|v| parse_logged::<u64>("TRUSTEESHIP_SECS", &v))
                .map(Duration::from_secs),
        }
    }

    /// Socket address to bind the server to (0.0.0.0:`PORT`).
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// Identity advertised to the lobby service.
    pub fn server_id(&self) -> String {
        format!("{}:{}", self.client_ip, self.ws_port)
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| parse_logged(key, &v))
        .unwrap_or(default)
}

fn secs_or(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| parse_logged::<u64>(key, &v))
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn parse_logged<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = raw, "ignoring unparseable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_uses_advertised_host_and_port() {
        let cfg = Config { client_ip: "10.0.0.7".into(), ws_port: 9100, ..Config::default() };
        assert_eq!(cfg.server_id(), "10.0.0.7:9100");
        assert_eq!(cfg.server_addr().port(), cfg.port);
    }

    #[test]
    fn unparseable_values_are_rejected() {
        assert_eq!(parse_logged::<u16>("PORT", "not-a-port"), None);
        assert_eq!(parse_logged::<u16>("PORT", " 8080 "), Some(8080));
    }
}
