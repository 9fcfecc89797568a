//! Store configuration.
//!
//! The compression profile is an explicit value handed to [`crate::Store`]
//! at construction. There is no process-wide default object to mutate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Codec applied to every frame written to the store file.
///
/// Configuration documents may also use the aliases accepted by
/// [`FromStr`], such as `"gz"` or `"off"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum CompressionAlgorithm {
    /// Frames are stored as raw JSON.
    None,
    /// zlib stream (deflate with adler32 trailer).
    #[default]
    Zlib,
    /// Raw deflate stream.
    Deflate,
    /// gzip member.
    Gzip,
}

impl CompressionAlgorithm {
    /// Stable name used in configuration documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib => "zlib",
            Self::Deflate => "deflate",
            Self::Gzip => "gzip",
        }
    }

    pub(crate) const fn flag_bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Zlib => 1,
            Self::Deflate => 2,
            Self::Gzip => 3,
        }
    }

    pub(crate) const fn from_flag_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::None),
            1 => Some(Self::Zlib),
            2 => Some(Self::Deflate),
            3 => Some(Self::Gzip),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "zlib" => Ok(Self::Zlib),
            "deflate" => Ok(Self::Deflate),
            "gzip" | "gz" => Ok(Self::Gzip),
            _ => Err(ConfigError::UnknownAlgorithm {
                name: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for CompressionAlgorithm {
    type Error = ConfigError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// Compression and integrity settings applied uniformly to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionProfile {
    /// Compression aggressiveness, 0 (fastest) to 9 (smallest).
    pub level: u32,
    /// Codec selection.
    pub algorithm: CompressionAlgorithm,
    /// Whether each frame carries a CRC32 that is verified on read.
    pub checksum: bool,
}

impl Default for CompressionProfile {
    fn default() -> Self {
        Self {
            level: 9,
            algorithm: CompressionAlgorithm::Zlib,
            checksum: true,
        }
    }
}

impl CompressionProfile {
    const MAX_LEVEL: u32 = 9;

    /// Profile that writes plain JSON frames with checksums.
    #[must_use]
    pub const fn uncompressed() -> Self {
        Self {
            level: 0,
            algorithm: CompressionAlgorithm::None,
            checksum: true,
        }
    }

    /// Checks the profile is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::CompressionLevelOutOfRange` if `level > 9`.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.level > Self::MAX_LEVEL {
            return Err(ConfigError::CompressionLevelOutOfRange { level: self.level });
        }
        Ok(self)
    }
}

/// When an appending session rewrites the store to drop superseded data.
///
/// Every nuclide migration leaves the previous composition image in the
/// log, and every session replays the whole log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionPolicy {
    /// Compact once this share of the file is superseded. 0 disables.
    pub superseded_percent: u8,
    /// Files smaller than this are left alone.
    pub min_file_bytes: u64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            superseded_percent: 50,
            min_file_bytes: 4 * 1024 * 1024,
        }
    }
}

impl CompactionPolicy {
    /// Never compact automatically.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            superseded_percent: 0,
            min_file_bytes: 0,
        }
    }

    /// Checks the policy is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::CompactionThresholdOutOfRange` above 100%.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.superseded_percent > 100 {
            return Err(ConfigError::CompactionThresholdOutOfRange {
                percent: self.superseded_percent,
            });
        }
        Ok(self)
    }

    /// Returns true if a file of `file_size` bytes, `superseded` of which
    /// are dead, should be compacted.
    #[must_use]
    pub fn should_compact(&self, superseded: u64, file_size: u64) -> bool {
        self.superseded_percent > 0
            && file_size > 0
            && file_size >= self.min_file_bytes
            && superseded.saturating_mul(100) >= u64::from(self.superseded_percent).saturating_mul(file_size)
    }
}

/// Configuration for a [`crate::Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Frame compression and checksum settings.
    pub compression: CompressionProfile,
    /// Whether to fsync the store file when a session closes.
    pub sync_on_write: bool,
    /// Automatic compaction after appending sessions.
    pub compaction: CompactionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression: CompressionProfile::default(),
            sync_on_write: true,
            compaction: CompactionPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Validates every nested setting.
    ///
    /// # Errors
    ///
    /// Propagates the first invalid setting found.
    pub fn validate(self) -> Result<Self, ConfigError> {
        self.compression.validate()?;
        self.compaction.validate()?;
        Ok(self)
    }

    /// Parses and validates a JSON configuration document.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDocument` if the document does not parse,
    /// or the validation error for out-of-range values.
    ///
    /// # Examples
    ///
    /// ```
    /// use burnup_store::{CompressionAlgorithm, StoreConfig};
    ///
    /// let cfg = StoreConfig::from_json_str(
    ///     r#"{ "compression": { "level": 4, "algorithm": "gzip" } }"#,
    /// ).unwrap();
    /// assert_eq!(cfg.compression.level, 4);
    /// assert_eq!(cfg.compression.algorithm, CompressionAlgorithm::Gzip);
    /// assert!(cfg.compression.checksum);
    /// ```
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(document).map_err(|e| ConfigError::InvalidDocument {
            message: e.to_string(),
        })?;
        cfg.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_matches_original_filters() {
        let profile = CompressionProfile::default();
        assert_eq!(profile.level, 9);
        assert_eq!(profile.algorithm, CompressionAlgorithm::Zlib);
        assert!(profile.checksum);
    }

    #[test]
    fn test_level_out_of_range_rejected() {
        let profile = CompressionProfile {
            level: 10,
            ..CompressionProfile::default()
        };
        assert!(matches!(
            profile.validate(),
            Err(ConfigError::CompressionLevelOutOfRange { level: 10 })
        ));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("ZLIB".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Zlib);
        assert_eq!("gz".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Gzip);
        assert!("blosc".parse::<CompressionAlgorithm>().is_err());
    }

    #[test]
    fn test_flag_bits_roundtrip() {
        for algo in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Zlib,
            CompressionAlgorithm::Deflate,
            CompressionAlgorithm::Gzip,
        ] {
            assert_eq!(CompressionAlgorithm::from_flag_bits(algo.flag_bits()), Some(algo));
        }
        assert_eq!(CompressionAlgorithm::from_flag_bits(7), None);
    }

    #[test]
    fn test_config_document_rejects_bad_level() {
        let err = StoreConfig::from_json_str(r#"{ "compression": { "level": 42 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::CompressionLevelOutOfRange { level: 42 }));
    }

    #[test]
    fn test_config_document_rejects_unknown_algorithm() {
        let err = StoreConfig::from_json_str(r#"{ "compression": { "algorithm": "lzo" } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDocument { .. }));
    }

    #[test]
    fn test_config_document_accepts_algorithm_aliases() {
        let cfg = StoreConfig::from_json_str(r#"{ "compression": { "algorithm": "gz" } }"#).unwrap();
        assert_eq!(cfg.compression.algorithm, CompressionAlgorithm::Gzip);
        let cfg = StoreConfig::from_json_str(r#"{ "compression": { "algorithm": "OFF" } }"#).unwrap();
        assert_eq!(cfg.compression.algorithm, CompressionAlgorithm::None);

        // Written back under the canonical name.
        let json = serde_json::to_string(&cfg.compression).unwrap();
        assert!(json.contains(r#""algorithm":"none""#));
    }

    #[test]
    fn test_compaction_policy() {
        let policy = CompactionPolicy {
            superseded_percent: 50,
            min_file_bytes: 1000,
        };
        assert!(!policy.should_compact(900, 999));
        assert!(!policy.should_compact(499, 1000));
        assert!(policy.should_compact(500, 1000));
        assert!(!CompactionPolicy::disabled().should_compact(1000, 1000));

        let err = StoreConfig::from_json_str(r#"{ "compaction": { "superseded_percent": 150 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::CompactionThresholdOutOfRange { percent: 150 }));
    }

    #[test]
    fn test_config_document_defaults() {
        let cfg = StoreConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, StoreConfig::default());
    }
}
