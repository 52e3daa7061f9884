//! Engine configuration.
//!
//! Every tuning knob of the tiering machinery lives in `EngineOptions`. The
//! options deserialize from TOML with every field optional:
//!
//! ```toml
//! ion_warmup_threshold = 50
//! enable_baseline = false
//! off_thread_compilation = true
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How nested function bodies are compiled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DelazificationStrategy {
    /// Each body is compiled on its first call.
    #[default]
    OnDemand,
    /// Every body is compiled before the script runs.
    Eager,
    /// A background thread compiles bodies outermost first.
    ConcurrentDepthFirst,
    /// A background thread compiles bodies largest first.
    ConcurrentLargeFirst,
}

impl DelazificationStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "on-demand" => Some(DelazificationStrategy::OnDemand),
            "eager" => Some(DelazificationStrategy::Eager),
            "concurrent-df" | "concurrent-depth-first" => Some(DelazificationStrategy::ConcurrentDepthFirst),
            "concurrent-large-first" => Some(DelazificationStrategy::ConcurrentLargeFirst),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub blinterp_warmup_threshold: u32,
    pub baseline_warmup_threshold: u32,
    pub trial_inlining_warmup_threshold: u32,
    pub ion_warmup_threshold: u32,
    /// Warm-up ticks without a new IC stub required before optimizing.
    pub ic_stability_window: u32,
    pub ic_attach_limit: usize,
    pub enable_blinterp: bool,
    pub enable_baseline: bool,
    pub enable_ion: bool,
    pub baseline_max_script_length: usize,
    pub ion_max_script_length: usize,
    pub max_inline_depth: u32,
    pub max_inlined_script_length: usize,
    pub bailout_threshold: u32,
    pub max_invalidations: u32,
    pub off_thread_compilation: bool,
    pub compile_workers: usize,
    /// Allocations between two collections.
    pub gc_allocation_threshold: usize,
    pub max_call_depth: usize,
    /// Installs `assertEq`, `getJitTier` and the other testing globals.
    pub testing_functions: bool,
    /// Collects `print` output instead of writing it to stdout.
    pub capture_output: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            blinterp_warmup_threshold: 10,
            baseline_warmup_threshold: 100,
            trial_inlining_warmup_threshold: 500,
            ion_warmup_threshold: 1000,
            ic_stability_window: 10,
            ic_attach_limit: 6,
            enable_blinterp: true,
            enable_baseline: true,
            enable_ion: true,
            baseline_max_script_length: 10000,
            ion_max_script_length: 4000,
            max_inline_depth: 3,
            max_inlined_script_length: 200,
            bailout_threshold: 10,
            max_invalidations: 8,
            off_thread_compilation: false,
            compile_workers: 1,
            gc_allocation_threshold: 100_000,
            max_call_depth: 1000,
            testing_functions: true,
            capture_output: false,
        }
    }
}

impl EngineOptions {
    /// Never leaves the bytecode interpreter.
    pub fn interpreter_only() -> Self {
        EngineOptions {
            enable_blinterp: false,
            enable_baseline: false,
            enable_ion: false,
            ..EngineOptions::default()
        }
    }

    /// Tiers up almost immediately; used to exercise the JIT tiers in tests.
    pub fn eager() -> Self {
        EngineOptions {
            blinterp_warmup_threshold: 0,
            baseline_warmup_threshold: 0,
            trial_inlining_warmup_threshold: 0,
            ion_warmup_threshold: 2,
            ic_stability_window: 0,
            ..EngineOptions::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Per-compilation options.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub strict: bool,
    pub delazification: DelazificationStrategy,
    pub filename: Arc<str>,
    /// Line number of the first source line.
    pub line: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            strict: false,
            delazification: DelazificationStrategy::OnDemand,
            filename: Arc::from("<eval>"),
            line: 1,
        }
    }
}

impl CompileOptions {
    pub fn with_filename(filename: &str) -> Self {
        CompileOptions {
            filename: Arc::from(filename),
            ..CompileOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_keep_defaults() {
        let options = EngineOptions::from_toml_str("ion_warmup_threshold = 5\nenable_baseline = false\n").unwrap();
        assert_eq!(options.ion_warmup_threshold, 5);
        assert!(!options.enable_baseline);
        assert_eq!(options.ic_attach_limit, 6);
        assert_eq!(options.max_call_depth, 1000);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(EngineOptions::from_toml_str("ion_warmup_threshold = \"soon\"").is_err());
    }

    #[test]
    fn delazification_names() {
        assert_eq!(
            DelazificationStrategy::from_name("concurrent-df"),
            Some(DelazificationStrategy::ConcurrentDepthFirst)
        );
        assert_eq!(DelazificationStrategy::from_name("sometimes"), None);
        let options: CompileOptionsToml = toml::from_str("delazification = \"eager\"").unwrap();
        assert_eq!(options.delazification, DelazificationStrategy::Eager);
    }

    #[derive(Deserialize)]
    struct CompileOptionsToml {
        delazification: DelazificationStrategy,
    }
}
