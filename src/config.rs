// ============================================================================
// 配置模块 - 搜索规则与回退关键字
// ============================================================================

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings for report discovery and source reference resolution.
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```yaml
/// source_extension: cs
/// build_output_dirs: [bin, obj, out]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Extension (without the dot) of source files to search for
    pub source_extension: String,
    /// Directory names whose subtrees are never searched
    pub build_output_dirs: Vec<String>,
    /// Case-insensitive substring marking a path as test code
    pub test_marker: String,
    /// Words never used as fallback keywords
    pub stop_words: Vec<String>,
    /// Fallback keywords must be longer than this
    pub min_keyword_len: usize,
    /// Directory (relative to the workspace root) holding .trx reports
    pub results_dir: String,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            source_extension: "cs".to_string(),
            build_output_dirs: vec!["bin".to_string(), "obj".to_string()],
            test_marker: "test".to_string(),
            stop_words: ["Test", "Should", "When", "Then", "Given", "Async"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_keyword_len: 3,
            results_dir: "TestResults".to_string(),
        }
    }
}

impl CorrelatorConfig {
    /// Load a YAML config file, filling unspecified keys with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ext = self.source_extension.trim_start_matches('.');
        if ext.is_empty() || ext.contains(['/', '\\', '*']) {
            return Err(ConfigError::Invalid(format!(
                "source_extension {:?} is not a plain file extension",
                self.source_extension
            )));
        }
        if self.test_marker.trim().is_empty() {
            return Err(ConfigError::Invalid("test_marker must not be empty".to_string()));
        }
        Ok(())
    }

    /// Extension without a leading dot.
    pub fn extension(&self) -> &str {
        self.source_extension.trim_start_matches('.')
    }

    pub fn is_build_output_dir(&self, name: &str) -> bool {
        self.build_output_dirs.iter().any(|d| d == name)
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.iter().any(|w| w == word)
    }

    /// Whether a (workspace-relative) path looks like test code.
    pub fn is_test_path(&self, path: &Path) -> bool {
        let marker = self.test_marker.to_lowercase();
        path.to_string_lossy().to_lowercase().contains(&marker)
    }
}
