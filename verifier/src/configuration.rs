//! Lite-client configuration: deserialized from TOML, layered over the
//! embedded defaults file.

use anyhow::Result;
use config::Config;
use serde::Deserialize;
use tonlite_common::MASTERCHAIN_SHARD;

/// Lite-client configuration (from TOML).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LiteClientConfig {
    /// Attempt ceiling for the weak-quorum re-fetch loop.
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay between signature re-fetches, milliseconds.
    #[serde(default = "defaults::retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Workchain the client verifies blocks for.
    #[serde(default = "defaults::workchain")]
    pub workchain: i32,

    /// Shard the client verifies blocks for.
    #[serde(default = "defaults::shard")]
    pub shard: u64,
}

impl LiteClientConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        Ok(full.try_deserialize()?)
    }
}

impl Default for LiteClientConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            retry_delay_ms: defaults::retry_delay_ms(),
            workchain: defaults::workchain(),
            shard: defaults::shard(),
        }
    }
}

mod defaults {
    pub fn max_retries() -> u32 {
        10
    }
    pub fn retry_delay_ms() -> u64 {
        150
    }
    pub fn workchain() -> i32 {
        tonlite_common::MASTERCHAIN_ID
    }
    pub fn shard() -> u64 {
        super::MASTERCHAIN_SHARD
    }
}
