//! Configuration management for golem-driver.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (GOLEM_NUM_TESTS, GOLEM_RNG_SEED, GOLEM_MAX_POLL_ATTEMPTS)
//! 2. Config file given on the command line
//! 3. Project-local config file (`./golem-driver.toml`)
//! 4. User config file (`~/.config/golem-driver/config.toml`)
//! 5. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! [driver]
//! # One entry per tile; every list must have the same length
//! mmio_addrs = [0x1000, 0x2000]
//! nums_arrays = [1, 1]
//! array_input_sizes = [4, 4]
//! array_output_sizes = [4, 4]
//! input_operand_sizes = [1, 1]
//! output_operand_sizes = [1, 1]
//! mem_request_sizes = [2, 2]
//! num_tests = 1
//! rng_seed = 85
//!
//! [bus]
//! latency = 4
//! jitter = 0
//!
//! [array]
//! latency = 100
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::device::{TileConfig, MAX_OPERAND_WIDTH};
use crate::driver::{DriverOptions, PollPolicy};
use crate::transport::BusOptions;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema.
    #[error("Failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    /// A required per-tile parameter list is absent.
    #[error("Parameter '{0}' was not provided")]
    MissingParameter(&'static str),

    /// A per-tile parameter list has the wrong length.
    #[error("{param} length ({len}) does not match number of tiles ({expected})")]
    LengthMismatch {
        param: &'static str,
        len: usize,
        expected: usize,
    },

    /// A per-tile value is out of range.
    #[error("Tile {tile}: {param} = {value} {reason}")]
    InvalidValue {
        tile: usize,
        param: &'static str,
        value: u64,
        reason: &'static str,
    },

    /// A global setting is out of range.
    #[error("{param} = {value} {reason}")]
    InvalidSetting {
        param: &'static str,
        value: u64,
        reason: &'static str,
    },

    /// Two tiles claim overlapping MMIO windows.
    #[error("Tiles {first} and {second} have overlapping MMIO windows")]
    OverlappingTiles { first: usize, second: usize },

    /// An environment override is not a number.
    #[error("Environment variable {name}={value} is not a valid number")]
    BadEnv { name: &'static str, value: String },
}

/// Per-tile driver parameters.
///
/// Lists are `None` when not provided so that layered files only override
/// what they set.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DriverParams {
    /// Base MMIO address per tile. Its length sets the number of tiles.
    pub mmio_addrs: Option<Vec<u64>>,
    /// Number of arrays per tile.
    pub nums_arrays: Option<Vec<u32>>,
    /// Input vector length per tile.
    pub array_input_sizes: Option<Vec<u32>>,
    /// Output vector length per tile.
    pub array_output_sizes: Option<Vec<u32>>,
    /// Input operand width in bytes per tile.
    pub input_operand_sizes: Option<Vec<u32>>,
    /// Output operand width in bytes per tile.
    pub output_operand_sizes: Option<Vec<u32>>,
    /// Largest memory request in bytes per tile.
    pub mem_request_sizes: Option<Vec<u32>>,
    /// Test iterations per tile (default 1).
    pub num_tests: Option<u32>,
    /// Seed for the input pattern generator (default 85).
    pub rng_seed: Option<u64>,
    /// Polls allowed per status chunk before it counts as stuck (default 1024).
    pub max_poll_attempts: Option<u32>,
    /// Ticks between polls of a busy status (default 0).
    pub poll_interval: Option<u32>,
}

/// Simulated bus parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BusParams {
    /// Completion latency in ticks (default 4).
    pub latency: Option<u64>,
    /// Extra random latency in ticks (default 0).
    pub jitter: Option<u64>,
    /// Seed for the jitter generator (default 13).
    pub seed: Option<u64>,
}

/// Test compute array parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ArrayParams {
    /// Compute latency in ticks (default 100).
    pub latency: Option<u64>,
}

/// golem-driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Driver and tile parameters.
    pub driver: DriverParams,
    /// Bus model parameters.
    pub bus: BusParams,
    /// Compute array parameters.
    pub array: ArrayParams,
}

fn merge_opt<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Optional files (user, project-local) that fail to parse are skipped
    /// with a warning; an explicitly given file must exist and parse.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::user_config_path().and_then(|p| Self::load_optional(&p)) {
            config.merge(user_config);
        }

        // Project-local config
        if let Some(local_config) = Self::load_optional(Path::new("golem-driver.toml")) {
            config.merge(local_config);
        }

        if let Some(path) = explicit {
            config.merge(Self::load_from_file(path)?);
        }

        // Environment variables override everything
        config.apply_env_overrides(|name| std::env::var(name).ok())?;

        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content, &path.display().to_string())?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load a config file that may be absent or broken.
    fn load_optional(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::load_from_file(path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    pub fn merge(&mut self, other: Self) {
        let d = &mut self.driver;
        let o = other.driver;
        merge_opt(&mut d.mmio_addrs, o.mmio_addrs);
        merge_opt(&mut d.nums_arrays, o.nums_arrays);
        merge_opt(&mut d.array_input_sizes, o.array_input_sizes);
        merge_opt(&mut d.array_output_sizes, o.array_output_sizes);
        merge_opt(&mut d.input_operand_sizes, o.input_operand_sizes);
        merge_opt(&mut d.output_operand_sizes, o.output_operand_sizes);
        merge_opt(&mut d.mem_request_sizes, o.mem_request_sizes);
        merge_opt(&mut d.num_tests, o.num_tests);
        merge_opt(&mut d.rng_seed, o.rng_seed);
        merge_opt(&mut d.max_poll_attempts, o.max_poll_attempts);
        merge_opt(&mut d.poll_interval, o.poll_interval);

        merge_opt(&mut self.bus.latency, other.bus.latency);
        merge_opt(&mut self.bus.jitter, other.bus.jitter);
        merge_opt(&mut self.bus.seed, other.bus.seed);

        merge_opt(&mut self.array.latency, other.array.latency);
    }

    /// Apply environment variable overrides.
    ///
    /// `lookup` returns the value of a variable, if set.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::BadEnv { name, value })
        }

        if let Some(value) = lookup("GOLEM_NUM_TESTS") {
            log::info!("Using GOLEM_NUM_TESTS from environment: {}", value);
            self.driver.num_tests = Some(parse("GOLEM_NUM_TESTS", value)?);
        }
        if let Some(value) = lookup("GOLEM_RNG_SEED") {
            log::info!("Using GOLEM_RNG_SEED from environment: {}", value);
            self.driver.rng_seed = Some(parse("GOLEM_RNG_SEED", value)?);
        }
        if let Some(value) = lookup("GOLEM_MAX_POLL_ATTEMPTS") {
            log::info!("Using GOLEM_MAX_POLL_ATTEMPTS from environment: {}", value);
            self.driver.max_poll_attempts = Some(parse("GOLEM_MAX_POLL_ATTEMPTS", value)?);
        }
        Ok(())
    }

    /// Bus options with defaults filled in.
    pub fn bus_options(&self) -> BusOptions {
        let defaults = BusOptions::default();
        BusOptions {
            latency: self.bus.latency.unwrap_or(defaults.latency),
            jitter: self.bus.jitter.unwrap_or(defaults.jitter),
            seed: self.bus.seed.unwrap_or(defaults.seed),
        }
    }

    /// Compute latency of the test array.
    pub fn array_latency(&self) -> u64 {
        self.array.latency.unwrap_or(100)
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("golem-driver").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# golem-driver configuration
# Place this file at ~/.config/golem-driver/config.toml or ./golem-driver.toml

[driver]
# One entry per tile; all lists must have the same length
mmio_addrs = [0x1000, 0x2000]
nums_arrays = [1, 1]
array_input_sizes = [4, 4]
array_output_sizes = [4, 4]
input_operand_sizes = [1, 1]
output_operand_sizes = [1, 1]
mem_request_sizes = [2, 2]

# Full array operations per tile
num_tests = 1

# Seed for the input pattern generator
rng_seed = 85

# Polls of one status chunk allowed before the run fails
# max_poll_attempts = 1024
# poll_interval = 0

[bus]
latency = 4
# jitter = 0   # > 0 delivers completions out of order
# seed = 13

[array]
latency = 100
"#
        .to_string()
    }
}

impl DriverParams {
    /// Number of tiles (length of `mmio_addrs`).
    pub fn num_tiles(&self) -> usize {
        self.mmio_addrs.as_ref().map_or(0, Vec::len)
    }

    /// Test iterations per tile.
    pub fn num_tests(&self) -> u32 {
        self.num_tests.unwrap_or(1)
    }

    /// Pattern generator seed.
    pub fn rng_seed(&self) -> u64 {
        self.rng_seed.unwrap_or(85)
    }

    /// Driver options with defaults filled in.
    pub fn options(&self) -> DriverOptions {
        let poll = PollPolicy::default();
        DriverOptions {
            num_tests: self.num_tests(),
            rng_seed: self.rng_seed(),
            poll: PollPolicy {
                max_attempts: self.max_poll_attempts.unwrap_or(poll.max_attempts),
                interval: self.poll_interval.unwrap_or(poll.interval),
            },
        }
    }

    /// Build and validate the per-tile configs.
    pub fn tile_configs(&self) -> Result<Vec<TileConfig>, ConfigError> {
        let addrs = self
            .mmio_addrs
            .as_ref()
            .ok_or(ConfigError::MissingParameter("mmio_addrs"))?;
        let n = addrs.len();

        let list = |param: &'static str, values: &Option<Vec<u32>>| -> Result<Vec<u32>, ConfigError> {
            let values = values.as_ref().ok_or(ConfigError::MissingParameter(param))?;
            if values.len() != n {
                return Err(ConfigError::LengthMismatch {
                    param,
                    len: values.len(),
                    expected: n,
                });
            }
            Ok(values.clone())
        };

        let arrays = list("nums_arrays", &self.nums_arrays)?;
        let in_sizes = list("array_input_sizes", &self.array_input_sizes)?;
        let out_sizes = list("array_output_sizes", &self.array_output_sizes)?;
        let in_widths = list("input_operand_sizes", &self.input_operand_sizes)?;
        let out_widths = list("output_operand_sizes", &self.output_operand_sizes)?;
        let req_sizes = list("mem_request_sizes", &self.mem_request_sizes)?;

        let tiles: Vec<TileConfig> = (0..n)
            .map(|i| {
                TileConfig::new(
                    addrs[i],
                    arrays[i],
                    in_sizes[i],
                    out_sizes[i],
                    in_widths[i],
                    out_widths[i],
                    req_sizes[i],
                )
            })
            .collect();

        validate_tiles(&tiles)?;
        Ok(tiles)
    }
}

/// Check tile configs for values the driver cannot work with.
pub fn validate_tiles(tiles: &[TileConfig]) -> Result<(), ConfigError> {
    for (tile, cfg) in tiles.iter().enumerate() {
        if cfg.max_request == 0 {
            return Err(ConfigError::InvalidValue {
                tile,
                param: "mem_request_sizes",
                value: 0,
                reason: "must be at least 1 byte",
            });
        }
        for (param, width) in [
            ("input_operand_sizes", cfg.input_width),
            ("output_operand_sizes", cfg.output_width),
        ] {
            if !(1..=MAX_OPERAND_WIDTH).contains(&width) {
                return Err(ConfigError::InvalidValue {
                    tile,
                    param,
                    value: width as u64,
                    reason: "must be between 1 and 8 bytes",
                });
            }
        }
        let Some(window) = cfg.checked_window_size() else {
            return Err(ConfigError::InvalidValue {
                tile,
                param: "nums_arrays",
                value: cfg.array_count as u64,
                reason: "with these vector sizes overflows the window size",
            });
        };
        if cfg.base_addr.checked_add(window).is_none() {
            return Err(ConfigError::InvalidValue {
                tile,
                param: "mmio_addrs",
                value: cfg.base_addr,
                reason: "window runs past the end of the address space",
            });
        }
    }

    for (first, a) in tiles.iter().enumerate() {
        for (offset, b) in tiles[first + 1..].iter().enumerate() {
            if a.overlaps(b) {
                return Err(ConfigError::OverlappingTiles {
                    first,
                    second: first + 1 + offset,
                });
            }
        }
    }
    Ok(())
}

/// Check global driver options.
pub fn validate_options(options: &DriverOptions) -> Result<(), ConfigError> {
    if options.num_tests == 0 {
        return Err(ConfigError::InvalidSetting {
            param: "num_tests",
            value: 0,
            reason: "must be at least 1",
        });
    }
    if options.poll.max_attempts == 0 {
        return Err(ConfigError::InvalidSetting {
            param: "max_poll_attempts",
            value: 0,
            reason: "must be at least 1",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tile_params() -> DriverParams {
        DriverParams {
            mmio_addrs: Some(vec![0x1000, 0x2000]),
            nums_arrays: Some(vec![1, 1]),
            array_input_sizes: Some(vec![4, 4]),
            array_output_sizes: Some(vec![4, 4]),
            input_operand_sizes: Some(vec![1, 1]),
            output_operand_sizes: Some(vec![1, 1]),
            mem_request_sizes: Some(vec![2, 2]),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.driver.num_tests(), 1);
        assert_eq!(config.driver.rng_seed(), 85);
        assert_eq!(config.driver.options().poll, PollPolicy::default());
        assert_eq!(config.bus_options(), BusOptions::default());
        assert_eq!(config.array_latency(), 100);
    }

    #[test]
    fn test_tile_configs() {
        let tiles = two_tile_params().tile_configs().unwrap();
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[1].base_addr, 0x2000);
        assert_eq!(tiles[1].input_start(), 0x2001);
        assert_eq!(tiles[1].max_request, 2);
    }

    #[test]
    fn test_missing_parameter() {
        let mut params = two_tile_params();
        params.array_output_sizes = None;
        assert!(matches!(
            params.tile_configs(),
            Err(ConfigError::MissingParameter("array_output_sizes"))
        ));

        let params = DriverParams::default();
        assert!(matches!(
            params.tile_configs(),
            Err(ConfigError::MissingParameter("mmio_addrs"))
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let mut params = two_tile_params();
        params.mem_request_sizes = Some(vec![2]);
        let err = params.tile_configs().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::LengthMismatch { param: "mem_request_sizes", len: 1, expected: 2 }
        ));
        assert_eq!(
            err.to_string(),
            "mem_request_sizes length (1) does not match number of tiles (2)"
        );
    }

    #[test]
    fn test_invalid_values() {
        let mut params = two_tile_params();
        params.mem_request_sizes = Some(vec![2, 0]);
        assert!(matches!(
            params.tile_configs(),
            Err(ConfigError::InvalidValue { tile: 1, param: "mem_request_sizes", .. })
        ));

        let mut params = two_tile_params();
        params.output_operand_sizes = Some(vec![9, 1]);
        assert!(matches!(
            params.tile_configs(),
            Err(ConfigError::InvalidValue { tile: 0, param: "output_operand_sizes", value: 9, .. })
        ));
    }

    #[test]
    fn test_window_size_overflow() {
        let tiles = [TileConfig::new(0, u32::MAX, u32::MAX, 1, 8, 1, 1)];
        let err = validate_tiles(&tiles).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { tile: 0, param: "nums_arrays", value, .. } if value == u32::MAX as u64
        ));

        let params = DriverParams {
            mmio_addrs: Some(vec![u64::MAX - 1]),
            nums_arrays: Some(vec![1]),
            array_input_sizes: Some(vec![1]),
            array_output_sizes: Some(vec![1]),
            input_operand_sizes: Some(vec![1]),
            output_operand_sizes: Some(vec![1]),
            mem_request_sizes: Some(vec![1]),
            ..Default::default()
        };
        assert!(matches!(
            params.tile_configs(),
            Err(ConfigError::InvalidValue { tile: 0, param: "mmio_addrs", .. })
        ));
    }

    #[test]
    fn test_overlapping_tiles() {
        let mut params = two_tile_params();
        params.mmio_addrs = Some(vec![0x1000, 0x1004]);
        assert!(matches!(
            params.tile_configs(),
            Err(ConfigError::OverlappingTiles { first: 0, second: 1 })
        ));
    }

    #[test]
    fn test_zero_tests_rejected() {
        let mut params = two_tile_params();
        params.num_tests = Some(0);
        assert!(validate_options(&params.options()).is_err());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.driver = two_tile_params();
        base.driver.num_tests = Some(3);
        base.bus.latency = Some(8);

        let mut overlay = Config::default();
        overlay.driver.rng_seed = Some(7);
        overlay.driver.num_tests = Some(5);

        base.merge(overlay);

        // Lists unchanged (overlay was None)
        assert_eq!(base.driver.mmio_addrs, Some(vec![0x1000, 0x2000]));
        assert_eq!(base.driver.num_tests, Some(5));
        assert_eq!(base.driver.rng_seed, Some(7));
        assert_eq!(base.bus.latency, Some(8));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(|name| match name {
                "GOLEM_NUM_TESTS" => Some("4".to_string()),
                "GOLEM_RNG_SEED" => Some(" 99 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.driver.num_tests, Some(4));
        assert_eq!(config.driver.rng_seed, Some(99));
        assert_eq!(config.driver.max_poll_attempts, None);

        let err = config
            .apply_env_overrides(|name| (name == "GOLEM_MAX_POLL_ATTEMPTS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadEnv { name: "GOLEM_MAX_POLL_ATTEMPTS", .. }));
    }

    #[test]
    fn test_sample_config_parses() {
        let config = Config::from_toml_str(&Config::sample_config(), "sample").unwrap();
        assert_eq!(config.driver, DriverParams { num_tests: Some(1), rng_seed: Some(85), ..two_tile_params() });
        assert_eq!(config.bus.latency, Some(4));
        assert_eq!(config.array_latency(), 100);
        assert_eq!(config.driver.tile_configs().unwrap().len(), 2);
    }

    #[test]
    fn test_parse_error() {
        let err = Config::from_toml_str("[driver]\nnum_tests = \"many\"", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("Failed to parse inline"));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load_from_file(Path::new("/nonexistent/golem.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
