//! Index and search configuration.
//!
//! Provides configuration file support via `Strata.toml`, environment
//! variables, and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (CLI flags, setters)
//! 2. Environment variables (`STRATA_*`)
//! 3. Configuration file (`Strata.toml`)
//! 4. Default values

use crate::error::{Error, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Structural parameters of an index, immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Number of coarse centroids.
    pub centroids: usize,
    /// Number of sub-centroids per coarse centroid.
    pub subcentroids: usize,
    /// Number of PQ sub-quantizers (bytes per residual code).
    pub code_bytes: usize,
    /// Bits per PQ codeword index. Both the residual and the norm
    /// quantizer use this width.
    pub nbits: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 128,
            centroids: 1_000_000,
            subcentroids: 64,
            code_bytes: 16,
            nbits: 8,
        }
    }
}

impl IndexConfig {
    /// Number of codewords per sub-quantizer (`2^nbits`).
    #[must_use]
    pub const fn ksub(&self) -> usize {
        1 << self.nbits
    }

    /// Bytes per encoded residual. One byte per sub-quantizer; codes are
    /// not bit-packed below one byte.
    #[must_use]
    pub const fn code_size(&self) -> usize {
        self.code_bytes
    }

    /// Validates the structural parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParameterOutOfRange`] on the first violated bound.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::ParameterOutOfRange {
                param: "dimension",
                message: "must be positive".into(),
            });
        }
        if self.centroids < 2 {
            return Err(Error::ParameterOutOfRange {
                param: "centroids",
                message: "need at least two coarse centroids".into(),
            });
        }
        if self.subcentroids == 0 || self.subcentroids >= self.centroids {
            return Err(Error::ParameterOutOfRange {
                param: "subcentroids",
                message: format!(
                    "must be in [1, centroids); got {} with {} centroids",
                    self.subcentroids, self.centroids
                ),
            });
        }
        if self.code_bytes == 0 || self.dimension % self.code_bytes != 0 {
            return Err(Error::ParameterOutOfRange {
                param: "code_bytes",
                message: format!(
                    "must divide the dimension; got {} for dimension {}",
                    self.code_bytes, self.dimension
                ),
            });
        }
        if self.nbits == 0 || self.nbits > 8 {
            return Err(Error::ParameterOutOfRange {
                param: "nbits",
                message: format!("must be in [1, 8]; got {}", self.nbits),
            });
        }
        Ok(())
    }
}

/// Query-time parameters, tunable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of coarse inverted lists probed per query.
    pub nprobe: usize,
    /// Budget of scanned candidates; probing stops once exceeded.
    pub max_codes: usize,
    /// Graph quantizer search width for the coarse probe.
    pub ef: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            nprobe: 16,
            max_codes: 10_000,
            ef: 128,
        }
    }
}

impl SearchConfig {
    /// Validates the query-time parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParameterOutOfRange`] on the first violated bound.
    pub fn validate(&self) -> Result<()> {
        if self.nprobe == 0 {
            return Err(Error::ParameterOutOfRange {
                param: "nprobe",
                message: "must be positive".into(),
            });
        }
        if self.max_codes == 0 {
            return Err(Error::ParameterOutOfRange {
                param: "max_codes",
                message: "must be positive".into(),
            });
        }
        if self.ef == 0 {
            return Err(Error::ParameterOutOfRange {
                param: "ef",
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Top-level configuration: one structural section, one query section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Structural index parameters.
    pub index: IndexConfig,
    /// Query-time parameters.
    pub search: SearchConfig,
}

impl StrataConfig {
    /// Loads configuration by merging defaults, a TOML file (if it
    /// exists), and `STRATA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file or environment cannot be
    /// parsed, and [`Error::ParameterOutOfRange`] if the merged values
    /// fail validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STRATA_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.index.validate()?;
        config.search.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string, filling missing keys with
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a malformed document and
    /// [`Error::ParameterOutOfRange`] if the parsed values fail
    /// validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.index.validate()?;
        config.search.validate()?;
        Ok(config)
    }

    /// Renders the configuration as a TOML document, e.g. to scaffold a
    /// `Strata.toml` for a new index directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = StrataConfig::default();
        config.index.validate().unwrap();
        config.search.validate().unwrap();
        assert_eq!(config.index.ksub(), 256);
        assert_eq!(config.search.nprobe, 16);
        assert_eq!(config.search.max_codes, 10_000);
    }

    #[test]
    fn rejects_code_bytes_not_dividing_dimension() {
        let config = IndexConfig {
            dimension: 100,
            code_bytes: 16,
            ..IndexConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "STRATA-007");
    }

    #[test]
    fn rejects_subcentroids_at_or_above_centroids() {
        let config = IndexConfig {
            centroids: 16,
            subcentroids: 16,
            ..IndexConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_wide_codewords() {
        let config = IndexConfig {
            nbits: 9,
            ..IndexConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Strata.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[index]\ndimension = 32\ncentroids = 64\nsubcentroids = 8\ncode_bytes = 8\n\n[search]\nnprobe = 4"
        )
        .unwrap();

        let config = StrataConfig::load(&path).unwrap();
        assert_eq!(config.index.dimension, 32);
        assert_eq!(config.index.centroids, 64);
        assert_eq!(config.search.nprobe, 4);
        // Untouched keys keep their defaults.
        assert_eq!(config.search.max_codes, 10_000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = StrataConfig::load("/nonexistent/Strata.toml").unwrap();
        assert_eq!(config, StrataConfig::default());
    }

    #[test]
    fn toml_round_trip() {
        let config = StrataConfig {
            index: IndexConfig {
                dimension: 64,
                centroids: 1024,
                subcentroids: 16,
                code_bytes: 8,
                nbits: 6,
            },
            search: SearchConfig {
                nprobe: 32,
                max_codes: 50_000,
                ef: 256,
            },
        };

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[index]"));
        assert!(rendered.contains("dimension = 64"));

        let parsed = StrataConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn from_toml_rejects_invalid_values() {
        let err = StrataConfig::from_toml("[index]\nnbits = 12\n").unwrap_err();
        assert_eq!(err.code(), "STRATA-007");
    }
}
