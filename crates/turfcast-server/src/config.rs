//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (TURFCAST_*)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of the user to track upstream.
    #[serde(default = "default_tracked_user")]
    pub tracked_user: String,

    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upstream API configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Poll intervals.
    #[serde(default)]
    pub poll: PollConfig,

    /// Overlay presentation flags forwarded in the hello handshake.
    #[serde(default)]
    pub overlay: OverlayConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Upstream API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the Turf API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Minimum spacing between upstream request starts, milliseconds.
    #[serde(default = "default_min_spacing")]
    pub min_spacing_ms: u64,

    /// Backoff ceiling for failing pollers, milliseconds.
    #[serde(default = "default_backoff_ceiling")]
    pub backoff_ceiling_ms: u64,
}

/// Poll intervals, milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Feed poll interval.
    #[serde(default = "default_feed_poll")]
    pub feed_ms: u64,

    /// Stats poll interval.
    #[serde(default = "default_stats_poll")]
    pub stats_ms: u64,

    /// Location poll interval.
    #[serde(default = "default_location_poll")]
    pub location_ms: u64,
}

/// Overlay presentation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Expose the tracked user's coordinates to viewers.
    #[serde(default = "default_show_coords")]
    pub show_coords: bool,

    /// Tell viewers to render the map panel.
    #[serde(default = "default_show_map")]
    pub show_map: bool,

    /// Map tile URL template.
    #[serde(default = "default_tile_url")]
    pub tile_url: String,

    /// Map attribution line.
    #[serde(default = "default_attribution")]
    pub attribution: String,

    /// Initial map zoom level.
    #[serde(default = "default_zoom")]
    pub zoom: u8,

    /// Default half-span, in degrees, for the zones bounding box.
    #[serde(default = "default_zones_halfspan")]
    pub zones_halfspan: f64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions

fn default_tracked_user() -> String {
    std::env::var("TURFCAST_USERNAME").unwrap_or_default()
}

fn default_host() -> String {
    std::env::var("TURFCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("TURFCAST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000)
}

fn default_base_url() -> String {
    std::env::var("TURFCAST_API_BASE").unwrap_or_else(|_| "https://api.turfgame.com/v5".to_string())
}

fn default_min_spacing() -> u64 {
    1000
}

fn default_backoff_ceiling() -> u64 {
    60_000
}

fn default_feed_poll() -> u64 {
    5000
}

fn default_stats_poll() -> u64 {
    15_000
}

fn default_location_poll() -> u64 {
    20_000
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn default_show_coords() -> bool {
    env_flag("TURFCAST_SHOW_COORDS")
}

fn default_show_map() -> bool {
    env_flag("TURFCAST_SHOW_MAP")
}

fn default_tile_url() -> String {
    "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string()
}

fn default_attribution() -> String {
    "&copy; OpenStreetMap contributors".to_string()
}

fn default_zoom() -> u8 {
    14
}

fn default_zones_halfspan() -> f64 {
    0.05
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracked_user: default_tracked_user(),
            host: default_host(),
            port: default_port(),
            upstream: UpstreamConfig::default(),
            poll: PollConfig::default(),
            overlay: OverlayConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            min_spacing_ms: default_min_spacing(),
            backoff_ceiling_ms: default_backoff_ceiling(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            feed_ms: default_feed_poll(),
            stats_ms: default_stats_poll(),
            location_ms: default_location_poll(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            show_coords: default_show_coords(),
            show_map: default_show_map(),
            tile_url: default_tile_url(),
            attribution: default_attribution(),
            zoom: default_zoom(),
            zones_halfspan: default_zones_halfspan(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "turfcast.toml",
            "/etc/turfcast/turfcast.toml",
            "~/.config/turfcast/turfcast.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate startup invariants. The only fatal misconfiguration
    /// is not knowing who to track.
    ///
    /// # Errors
    ///
    /// Returns an error if no tracked user is configured.
    pub fn validate(&mut self) -> Result<()> {
        self.tracked_user = self.tracked_user.trim().to_string();
        if self.tracked_user.is_empty() {
            bail!("no tracked user configured (set tracked_user or TURFCAST_USERNAME)");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured host is not a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    /// Minimum upstream request spacing.
    #[must_use]
    pub const fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.upstream.min_spacing_ms)
    }

    /// Poller backoff ceiling.
    #[must_use]
    pub const fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.upstream.backoff_ceiling_ms)
    }
}
