//! Terminal configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use termdock_bridge::PtyConfig;
use termdock_registry::{CellMetrics, GridSize};

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell override; falls back to `$SHELL`, then `/bin/sh`
    pub shell: Option<String>,
    pub shell_args: Vec<String>,
    /// Extra environment for every session
    pub env: BTreeMap<String, String>,
    /// Grid used until a surface is first fitted to a container
    pub default_cols: u16,
    pub default_rows: u16,
    /// Lines of history kept per surface
    pub scrollback_lines: usize,
    /// Cell size in pixels, used to fit surfaces to container bounds
    pub cell_width: f64,
    pub cell_height: f64,
    /// Output kept for a session that has no surface yet
    pub pending_output_limit: usize,
    /// How long an exited session keeps showing its exit code
    pub exit_linger_ms: u64,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_cols == 0 || self.default_rows == 0 {
            return Err(CoreError::Config(format!(
                "default grid must be at least 1x1, got {}x{}",
                self.default_cols, self.default_rows
            )));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.cell_width) || !positive(self.cell_height) {
            return Err(CoreError::Config(format!(
                "cell size must be positive, got {}x{}",
                self.cell_width, self.cell_height
            )));
        }
        if let Some(shell) = &self.shell {
            if shell.trim().is_empty() {
                return Err(CoreError::Config("shell override is empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn pty_config(&self) -> PtyConfig {
        PtyConfig {
            shell: self.shell.clone(),
            shell_args: self.shell_args.clone(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            cols: self.default_cols,
            rows: self.default_rows,
        }
    }

    pub fn cell_metrics(&self) -> CellMetrics {
        CellMetrics {
            width: self.cell_width,
            height: self.cell_height,
        }
    }

    pub fn default_grid(&self) -> GridSize {
        GridSize::new(self.default_cols, self.default_rows)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            shell_args: Vec::new(),
            env: BTreeMap::new(),
            default_cols: 80,
            default_rows: 24,
            scrollback_lines: 10_000,
            cell_width: 8.0,
            cell_height: 16.0,
            pending_output_limit: 64 * 1024,
            exit_linger_ms: 1500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(r#"{"shell": "/bin/bash", "env": {"LANG": "C"}}"#).unwrap();
        assert_eq!(config.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.default_cols, 80);

        let pty = config.pty_config();
        assert_eq!(pty.env, vec![("LANG".to_string(), "C".to_string())]);
        assert_eq!((pty.cols, pty.rows), (80, 24));
    }

    #[test]
    fn test_rejects_zero_grid() {
        let err = Config::from_json(r#"{"default_cols": 0}"#).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_cells() {
        let config = Config {
            cell_height: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Config::from_json("{"),
            Err(CoreError::Serialization(_))
        ));
    }
}
