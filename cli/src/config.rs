//! CLI configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strata_capture::{page_size, Endian, RingBufferOptions, WriterOptions};

/// Environment override for [`Config::buffer_pages`].
pub const BUFFER_PAGES_ENV: &str = "STRATA_BUFFER_PAGES";
/// Environment override for [`Config::ring_pages`].
pub const RING_PAGES_ENV: &str = "STRATA_RING_PAGES";

/// Byte order requested for captures written by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Native,
    Little,
    Big,
}

impl From<ByteOrder> for Endian {
    fn from(order: ByteOrder) -> Self {
        match order {
            ByteOrder::Native => Endian::NATIVE,
            ByteOrder::Little => Endian::Little,
            ByteOrder::Big => Endian::Big,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Writer buffer size, in pages
    pub buffer_pages: usize,

    /// Ring buffer body size, in pages
    pub ring_pages: usize,

    /// Byte order of written captures
    pub byte_order: ByteOrder,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_pages: 64,
            ring_pages: strata_capture::ring::DEFAULT_RING_PAGES,
            byte_order: ByteOrder::Native,
        }
    }
}

impl Config {
    /// Read `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `lookup`, which maps an environment variable
    /// name to its value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(BUFFER_PAGES_ENV) {
            self.buffer_pages = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", BUFFER_PAGES_ENV, value))?;
        }
        if let Some(value) = lookup(RING_PAGES_ENV) {
            self.ring_pages = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", RING_PAGES_ENV, value))?;
        }
        Ok(())
    }

    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            buffer_size: self.buffer_pages * page_size(),
            byte_order: self.byte_order.into(),
        }
    }

    pub fn ring_options(&self) -> RingBufferOptions {
        RingBufferOptions::with_pages(self.ring_pages)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.buffer_pages == 0 {
            anyhow::bail!("buffer_pages must be greater than 0");
        }
        if self.ring_pages == 0 {
            anyhow::bail!("ring_pages must be greater than 0");
        }
        self.writer_options()
            .validate()
            .context("Invalid writer configuration")?;
        self.ring_options()
            .validate()
            .context("Invalid ring buffer configuration")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.writer_options().byte_order, Endian::NATIVE);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            buffer_pages = 128
            byte_order = "big"
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer_pages, 128);
        assert_eq!(config.byte_order, ByteOrder::Big);
        // Unset keys keep their defaults
        assert_eq!(config.ring_pages, Config::default().ring_pages);
        assert_eq!(config.writer_options().byte_order, Endian::Big);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [(BUFFER_PAGES_ENV, "256"), (RING_PAGES_ENV, " 8 ")].into();
        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.buffer_pages, 256);
        assert_eq!(config.ring_pages, 8);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| (key == RING_PAGES_ENV).then(|| "lots".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_small_buffers() {
        let config = Config {
            buffer_pages: 1,
            ..Config::default()
        };
        // One page cannot hold the largest frame
        assert!(config.validate().is_err());

        let config = Config {
            ring_pages: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
