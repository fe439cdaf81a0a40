use std::{env, str::FromStr, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::room_manager::{RoomSettings, DEFAULT_HOST_GRACE, DEFAULT_OUTBOX_CAPACITY};

/// Server configuration, read from `JAM_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Undelivered events a member may have before it is dropped
    pub outbox_capacity: usize,
    /// Members per room, host included. 0 means unlimited
    pub max_members: usize,
    /// Rooms without activity for this long are closed. 0 keeps idle rooms
    pub idle_timeout_secs: u64,
    /// Rooms whose host has not connected this long after creation are closed
    pub host_grace_secs: u64,
    pub reaper_interval_secs: u64,
    /// Header carrying the authenticated user id
    pub identity_header: String,
    /// Base url of the track catalog. Every track is accepted when unset
    pub catalog_url: Option<String>,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 8080,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_members: 0,
            idle_timeout_secs: 0,
            host_grace_secs: DEFAULT_HOST_GRACE.as_secs(),
            reaper_interval_secs: 30,
            identity_header: String::from(comms::USER_ID_HEADER),
            catalog_url: None,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load from the environment, after reading a `.env` file if there is one
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from any key value source, unset keys fall back to the defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let config = Self {
            host: lookup("JAM_HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "JAM_PORT")?.unwrap_or(defaults.port),
            outbox_capacity: parse(&lookup, "JAM_OUTBOX_CAPACITY")?
                .unwrap_or(defaults.outbox_capacity),
            max_members: parse(&lookup, "JAM_MAX_MEMBERS")?.unwrap_or(defaults.max_members),
            idle_timeout_secs: parse(&lookup, "JAM_IDLE_TIMEOUT_SECS")?
                .unwrap_or(defaults.idle_timeout_secs),
            host_grace_secs: parse(&lookup, "JAM_HOST_GRACE_SECS")?
                .unwrap_or(defaults.host_grace_secs),
            reaper_interval_secs: parse(&lookup, "JAM_REAPER_INTERVAL_SECS")?
                .unwrap_or(defaults.reaper_interval_secs),
            identity_header: lookup("JAM_IDENTITY_HEADER").unwrap_or(defaults.identity_header),
            catalog_url: lookup("JAM_CATALOG_URL"),
            max_frame_bytes: parse(&lookup, "JAM_MAX_FRAME_BYTES")?
                .unwrap_or(defaults.max_frame_bytes),
        };

        if config.outbox_capacity == 0 {
            anyhow::bail!("JAM_OUTBOX_CAPACITY must be at least 1");
        }
        if config.host_grace_secs == 0 {
            anyhow::bail!("JAM_HOST_GRACE_SECS must be at least 1");
        }
        if config.reaper_interval_secs == 0 {
            anyhow::bail!("JAM_REAPER_INTERVAL_SECS must be at least 1");
        }

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            outbox_capacity: self.outbox_capacity,
            max_members: (self.max_members > 0).then_some(self.max_members),
            host_grace: Duration::from_secs(self.host_grace_secs),
        }
    }

    /// `None` when idle rooms are kept forever
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

fn parse<T>(lookup: impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("invalid value '{}' for {}", value, key))
        })
        .transpose()
}
