//! Loader configuration.
//!
//! One explicit value replaces the global feature flags of older extractors:
//! the caller builds a [`Config`], optionally overlays the environment with
//! [`Config::with_env_overrides`], and passes it to the loader.

use serde::{Deserialize, Serialize};

use crate::archive::MemberNaming;
use crate::workers::desired_parallelism;

/// Order of the artifact list returned by `load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputOrder {
    /// Ascending member index, i.e. archive precedence.
    Index,
    /// Whatever order the worker groups produced.
    Scheduled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Extract and verify on several threads.
    pub parallel: bool,
    /// Write member bytes verbatim instead of wrapping each in a one-entry zip.
    pub raw_format: bool,
    /// Compute and compare artifact checksums.
    pub checksum_enabled: bool,
    /// Verify existing artifacts on several threads.
    pub concurrent_reconstruction: bool,
    pub output_order: OutputOrder,
    pub naming: MemberNaming,
    /// Cap on worker groups; `None` derives it from the CPU count.
    pub max_parallelism: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallel: true,
            raw_format: true,
            checksum_enabled: true,
            concurrent_reconstruction: true,
            output_order: OutputOrder::Index,
            naming: MemberNaming::default(),
            max_parallelism: None,
        }
    }
}

impl Config {
    /// Worker group cap for this machine.
    pub fn parallelism(&self) -> usize {
        match self.max_parallelism {
            Some(n) => n.max(1),
            None => desired_parallelism(num_cpus::get()),
        }
    }

    /// Suffix of artifact files for the configured format.
    pub fn artifact_suffix(&self) -> &'static str {
        if self.raw_format {
            ".dex"
        } else {
            ".zip"
        }
    }

    /// Apply `SPLITCACHE_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| get(key).map(|v| matches!(v.as_str(), "1" | "true" | "yes"));

        if let Some(true) = flag("SPLITCACHE_SERIAL") {
            self.parallel = false;
        }
        if let Some(raw) = flag("SPLITCACHE_RAW") {
            self.raw_format = raw;
        }
        if let Some(true) = flag("SPLITCACHE_NO_CHECKSUM") {
            self.checksum_enabled = false;
        }
        if let Some(true) = flag("SPLITCACHE_SERIAL_VERIFY") {
            self.concurrent_reconstruction = false;
        }
        if let Some(n) = get("SPLITCACHE_MAX_THREADS").and_then(|s| s.parse::<usize>().ok()) {
            if n > 0 {
                self.max_parallelism = Some(n);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("SPLITCACHE_SERIAL", "1"),
            ("SPLITCACHE_RAW", "false"),
            ("SPLITCACHE_MAX_THREADS", "2"),
        ]
        .into_iter()
        .collect();

        let cfg = Config::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert!(!cfg.parallel);
        assert!(!cfg.raw_format);
        assert!(cfg.checksum_enabled);
        assert_eq!(cfg.max_parallelism, Some(2));
        assert_eq!(cfg.parallelism(), 2);
        assert_eq!(cfg.artifact_suffix(), ".zip");
    }

    #[test]
    fn zero_threads_is_ignored() {
        let cfg = Config::default().with_overrides(|k| {
            (k == "SPLITCACHE_MAX_THREADS").then(|| "0".to_string())
        });
        assert_eq!(cfg.max_parallelism, None);
        assert!(cfg.parallelism() >= 3);
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"raw_format": false, "output_order": "scheduled"}"#).unwrap();
        assert!(!cfg.raw_format);
        assert!(cfg.parallel);
        assert_eq!(cfg.output_order, OutputOrder::Scheduled);
        assert_eq!(cfg.naming, MemberNaming::default());
    }
}
