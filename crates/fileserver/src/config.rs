//! Configuration for the sharing side

use std::path::PathBuf;
use std::time::Duration;

use crate::server::DEFAULT_BIND_HOST;

/// Length of one service slice
const DEFAULT_SLICE_SECS: u64 = 5;

/// Minimum time between two directory registrations
const DEFAULT_REGISTER_INTERVAL_SECS: u64 = 540;

/// How long in-flight responses may keep the listener alive after a stop
const DEFAULT_DRAIN_SECS: u64 = 5;

/// Settings for one sharing session
#[derive(Debug, Clone)]
pub struct ShareConfig {
    /// Candidate files; only disc images among them are served
    pub files: Vec<PathBuf>,
    /// Preferred listen port, 0 for any free port
    pub port: u16,
    /// Address to listen on
    pub bind_host: String,
    /// Length of one service slice
    pub slice: Duration,
    /// Minimum time between directory registrations
    pub register_interval: Duration,
    /// Grace period for in-flight responses on stop
    pub drain: Duration,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            port: 0,
            bind_host: DEFAULT_BIND_HOST.to_string(),
            slice: Duration::from_secs(DEFAULT_SLICE_SECS),
            register_interval: Duration::from_secs(DEFAULT_REGISTER_INTERVAL_SECS),
            drain: Duration::from_secs(DEFAULT_DRAIN_SECS),
        }
    }
}

impl ShareConfig {
    /// Read settings from the environment
    ///
    /// * `REMOTEISO_FILES` - paths joined with the platform path-list separator
    /// * `REMOTEISO_PORT` - preferred port
    /// * `REMOTEISO_BIND_HOST` - listen address
    ///
    /// Missing or invalid values keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(files) = std::env::var_os("REMOTEISO_FILES") {
            config.files = std::env::split_paths(&files)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        if let Ok(port) = std::env::var("REMOTEISO_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => tracing::warn!("Ignoring invalid REMOTEISO_PORT: {}", port),
            }
        }

        if let Ok(host) = std::env::var("REMOTEISO_BIND_HOST") {
            if !host.trim().is_empty() {
                config.bind_host = host.trim().to_string();
            }
        }

        config
    }

    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Override slice length, registration interval and drain period
    pub fn with_timing(mut self, slice: Duration, register_interval: Duration, drain: Duration) -> Self {
        self.slice = slice;
        self.register_interval = register_interval;
        self.drain = drain;
        self
    }
}
