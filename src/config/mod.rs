//! Engine configuration
//!
//! Tunables for the selector VM and the SCF publisher, loadable from TOML.
//! Every field has a default matching the constants the cluster protocol was
//! designed around, so `EngineConfig::default()` is always a valid
//! configuration.

use serde::Deserialize;

use crate::scf::SCF_WIRE_VERSION;

/// Default selector evaluation stack depth
const DEFAULT_MAX_STACK_DEPTH: usize = 320;

/// Default SCF scratch buffer capacity
const DEFAULT_SCRATCH_CAPACITY: usize = 16 * 1024;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub scf: ScfConfig,
}

/// Selector VM tunables
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectorConfig {
    /// Maximum evaluation stack depth; programs exceeding it fail with an
    /// explicit stack-overflow error
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,
}

/// SCF publisher tunables
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScfConfig {
    /// Wire-format version used for published artifacts
    #[serde(default = "default_wire_version")]
    pub wire_version: u16,
    /// Initial capacity of the shared scratch buffer
    #[serde(default = "default_scratch_capacity")]
    pub scratch_capacity: usize,
}

fn default_max_stack_depth() -> usize {
    DEFAULT_MAX_STACK_DEPTH
}

fn default_wire_version() -> u16 {
    SCF_WIRE_VERSION
}

fn default_scratch_capacity() -> usize {
    DEFAULT_SCRATCH_CAPACITY
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: default_max_stack_depth(),
        }
    }
}

impl Default for ScfConfig {
    fn default() -> Self {
        Self {
            wire_version: default_wire_version(),
            scratch_capacity: default_scratch_capacity(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document into a configuration
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        let config: EngineConfig = toml::from_str(s)?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.selector.max_stack_depth == 0 {
            return Err("selector.max_stack_depth must be at least 1");
        }
        if self.scf.wire_version != SCF_WIRE_VERSION {
            return Err("scf.wire_version is not supported by this node");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.selector.max_stack_depth, 320);
        assert_eq!(config.scf.wire_version, SCF_WIRE_VERSION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [selector]
            max_stack_depth = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.selector.max_stack_depth, 64);
        // Unspecified sections keep their defaults
        assert_eq!(config.scf, ScfConfig::default());
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        assert!(EngineConfig::from_toml_str("[selector]\nmax_depth = 4\n").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_stack() {
        let config = EngineConfig::from_toml_str("[selector]\nmax_stack_depth = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_wire_version() {
        let config = EngineConfig::from_toml_str("[scf]\nwire_version = 99\n").unwrap();
        assert!(config.validate().is_err());
    }
}
