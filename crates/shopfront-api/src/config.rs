//! API configuration.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// API server configuration.
#[derive(Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Origin that signed downloads redirect to
    pub asset_origin: String,
    /// Requests per client address per rate-limit window on public routes
    pub secure_rate_limit: u32,
    /// Interval between sweeps of expired rate-limit windows
    pub sweep_interval: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    /// Empty means forwarding headers are ignored.
    pub trusted_proxies: Vec<TrustedProxy>,
    /// Bearer token the identity provider presents when reporting login
    /// attempts. Unset rejects every report.
    pub internal_api_token: Option<String>,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("asset_origin", &self.asset_origin)
            .field("secure_rate_limit", &self.secure_rate_limit)
            .field("sweep_interval", &self.sweep_interval)
            .field("max_body_size", &self.max_body_size)
            .field("trusted_proxies", &self.trusted_proxies)
            .field(
                "internal_api_token",
                &self.internal_api_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            asset_origin: "https://assets.example.com".to_string(),
            secure_rate_limit: 60,
            sweep_interval: Duration::from_secs(300),
            max_body_size: 64 * 1024,
            trusted_proxies: Vec::new(),
            internal_api_token: None,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            asset_origin: std::env::var("ASSET_ORIGIN")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.asset_origin),
            secure_rate_limit: std::env::var("SECURE_RATE_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.secure_rate_limit),
            sweep_interval: std::env::var("RATE_LIMIT_SWEEP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            trusted_proxies: std::env::var("TRUSTED_PROXIES")
                .map(|s| parse_trusted_proxies(&s))
                .unwrap_or(defaults.trusted_proxies),
            internal_api_token: std::env::var("INTERNAL_API_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn is_trusted_proxy(&self, ip: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|p| p.contains(ip))
    }
}

/// Comma-separated addresses or CIDR blocks. Bad entries are skipped.
fn parse_trusted_proxies(value: &str) -> Vec<TrustedProxy> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(proxy) => Some(proxy),
            Err(e) => {
                warn!("Ignoring TRUSTED_PROXIES entry {:?}: {}", entry, e);
                None
            }
        })
        .collect()
}

/// An address block, e.g. `10.0.0.0/8`, `fd00::/8` or a single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedProxy {
    network: IpAddr,
    prefix: u8,
}

impl TrustedProxy {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                prefix_matches(u32::from(net).into(), u32::from(ip).into(), self.prefix, 32)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                prefix_matches(u128::from(net), u128::from(ip), self.prefix, 128)
            }
            _ => false,
        }
    }
}

fn prefix_matches(network: u128, ip: u128, prefix: u8, width: u8) -> bool {
    let shift = u32::from(width - prefix);
    prefix == 0 || (network >> shift) == (ip >> shift)
}

impl FromStr for TrustedProxy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let network: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| format!("invalid address: {}", addr))?;
        let width = if network.is_ipv4() { 32 } else { 128 };

        let prefix = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= width)
                .ok_or_else(|| format!("invalid prefix length: {}", p))?,
            None => width,
        };

        Ok(Self { network, prefix })
    }
}
