//! Decoder options and the string property surface that feeds them.
//!
//! Options can come from three places, in increasing priority:
//!
//! 1. built-in defaults (`pool=1`, `copy=0`, `in_type=-1`, `out_type=-1`, `activate=-1`)
//! 2. process defaults read from `CODECBRIDGE_*` environment variables and
//!    `./codecbridge.toml`
//! 3. per-decoder properties passed to [`DecoderOptions::from_properties`]
//!
//! ```rust
//! use std::collections::HashMap;
//! use codecbridge::config::{CopyMode, DecoderOptions};
//!
//! let mut props = HashMap::new();
//! props.insert("copy".to_string(), "2".to_string());
//! props.insert("pool".to_string(), "0".to_string());
//!
//! let options = DecoderOptions::from_properties(&props).unwrap();
//! assert_eq!(options.copy_mode, CopyMode::Always);
//! assert!(!options.use_pool);
//! ```

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use parking_lot::RwLock;

use crate::error::{BridgeError, Result};

lazy_static! {
    static ref DEFAULTS: RwLock<DecoderOptions> = RwLock::new(DecoderOptions::load());
}

/// Property key enabling the output sample pool (`0` or `1`).
pub const PROP_POOL: &str = "pool";
/// Property key selecting the [`CopyMode`] (`0`, `1` or `2`).
pub const PROP_COPY: &str = "copy";
/// Property key forcing an input type index (`-1` = score based).
pub const PROP_IN_TYPE: &str = "in_type";
/// Property key forcing an output type index (`-1` = score based).
pub const PROP_OUT_TYPE: &str = "out_type";
/// Property key forcing an engine candidate index (`-1` = first accepted).
pub const PROP_ACTIVATE: &str = "activate";

const CONFIG_PATHS: [&str; 2] = ["./codecbridge.toml", "./codecbridge_config.toml"];

/// How decoded buffers are handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyMode {
    /// Hold GPU surfaces and lock linear buffers in place.
    #[default]
    None,
    /// Lock GPU surfaces for reading but keep them mapped; copy linear buffers.
    LockSurfaces,
    /// Always copy into frame-owned memory.
    Always,
}

impl CopyMode {
    /// Parses the numeric property form.
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(CopyMode::None),
            1 => Some(CopyMode::LockSurfaces),
            2 => Some(CopyMode::Always),
            _ => None,
        }
    }

    pub fn as_value(self) -> i64 {
        match self {
            CopyMode::None => 0,
            CopyMode::LockSurfaces => 1,
            CopyMode::Always => 2,
        }
    }

    /// Whether linear (non GPU) buffers are copied out.
    pub fn copies_linear(self) -> bool {
        self != CopyMode::None
    }
}

/// Tunables consumed by the transform driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Reuse output samples through the pool.
    pub use_pool: bool,
    /// Frame delivery mode.
    pub copy_mode: CopyMode,
    /// Take this enumerated input type instead of scoring.
    pub input_type_index: Option<u32>,
    /// Take this enumerated output type instead of scoring.
    pub output_type_index: Option<u32>,
    /// Only try this engine candidate.
    pub activate_index: Option<usize>,
    /// Wrap aligned packet memory instead of copying it.
    pub input_views: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            use_pool: true,
            copy_mode: CopyMode::None,
            input_type_index: None,
            output_type_index: None,
            activate_index: None,
            input_views: true,
        }
    }
}

impl DecoderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the process defaults and applies `props` on top.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut options = defaults();
        for (key, value) in props {
            options.apply(key, value)?;
        }
        Ok(options)
    }

    /// Applies a single property. Unknown keys are ignored so that callers
    /// can share one property map between several components.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            PROP_POOL => self.use_pool = parse_flag(key, value)?,
            PROP_COPY => {
                let v = parse_int(key, value)?;
                self.copy_mode = CopyMode::from_value(v).ok_or_else(|| BridgeError::Config {
                    key: key.to_string(),
                    reason: format!("{} is not one of 0, 1, 2", v),
                })?;
            }
            PROP_IN_TYPE => self.input_type_index = parse_index(key, value)?,
            PROP_OUT_TYPE => self.output_type_index = parse_index(key, value)?,
            PROP_ACTIVATE => {
                self.activate_index = parse_index(key, value)?.map(|i| i as usize)
            }
            _ => log::debug!("ignoring unknown property {}={}", key, value),
        }
        Ok(())
    }

    pub fn with_pool(mut self, use_pool: bool) -> Self {
        self.use_pool = use_pool;
        self
    }

    pub fn with_copy_mode(mut self, mode: CopyMode) -> Self {
        self.copy_mode = mode;
        self
    }

    pub fn with_input_type_index(mut self, index: u32) -> Self {
        self.input_type_index = Some(index);
        self
    }

    pub fn with_output_type_index(mut self, index: u32) -> Self {
        self.output_type_index = Some(index);
        self
    }

    pub fn with_activate_index(mut self, index: usize) -> Self {
        self.activate_index = Some(index);
        self
    }

    pub fn with_input_views(mut self, enabled: bool) -> Self {
        self.input_views = enabled;
        self
    }

    fn load() -> Self {
        let mut options = DecoderOptions::default();

        // Config file first, environment wins
        for path in &CONFIG_PATHS {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    for (key, value) in parse_config_lines(&content) {
                        if let Err(e) = options.apply(&key, &value) {
                            log::warn!("{}: {}", path, e);
                        }
                    }
                }
            }
        }

        for key in [PROP_POOL, PROP_COPY, PROP_IN_TYPE, PROP_OUT_TYPE, PROP_ACTIVATE] {
            let var = format!("CODECBRIDGE_{}", key.to_uppercase());
            if let Ok(value) = env::var(&var) {
                if let Err(e) = options.apply(key, &value) {
                    log::warn!("{}: {}", var, e);
                }
            }
        }

        options
    }
}

/// Returns a copy of the process-wide default options.
pub fn defaults() -> DecoderOptions {
    DEFAULTS.read().clone()
}

/// Re-reads environment variables and config files.
pub fn reload() {
    let new_defaults = DecoderOptions::load();
    *DEFAULTS.write() = new_defaults;
}

/// Writes a commented config template if `path` does not exist yet.
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# codecbridge defaults
# Values here are overridden by CODECBRIDGE_* environment variables
# and by per-decoder properties.

# 1 = reuse output samples, 0 = allocate every cycle
pool = 1
# 0 = zero-copy, 1 = lock GPU surfaces, 2 = always copy
copy = 0
# -1 = choose by score
in_type = -1
out_type = -1
activate = -1
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

fn parse_config_lines(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            (
                k.trim().to_string(),
                v.trim().trim_matches('"').trim_matches('\'').to_string(),
            )
        })
        .collect()
}

fn parse_int(key: &str, value: &str) -> Result<i64> {
    value.trim().parse::<i64>().map_err(|e| BridgeError::Config {
        key: key.to_string(),
        reason: format!("'{}' is not an integer ({})", value, e),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match parse_int(key, value)? {
        0 => Ok(false),
        1 => Ok(true),
        v => Err(BridgeError::Config {
            key: key.to_string(),
            reason: format!("{} is not 0 or 1", v),
        }),
    }
}

fn parse_index(key: &str, value: &str) -> Result<Option<u32>> {
    let v = parse_int(key, value)?;
    if v < -1 || v > u32::MAX as i64 {
        return Err(BridgeError::Config {
            key: key.to_string(),
            reason: format!("{} is out of range", v),
        });
    }
    Ok(if v < 0 { None } else { Some(v as u32) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_no_properties() {
        let mut options = DecoderOptions::default();
        options.apply("unrelated", "x").unwrap();
        assert_eq!(options, DecoderOptions::default());
        assert!(options.use_pool);
        assert_eq!(options.copy_mode, CopyMode::None);
    }

    #[test]
    fn test_apply_all_keys() {
        let mut options = DecoderOptions::default();
        for (k, v) in props(&[
            ("pool", "0"),
            ("copy", "1"),
            ("in_type", "2"),
            ("out_type", "-1"),
            ("activate", "3"),
        ]) {
            options.apply(&k, &v).unwrap();
        }
        assert!(!options.use_pool);
        assert_eq!(options.copy_mode, CopyMode::LockSurfaces);
        assert_eq!(options.input_type_index, Some(2));
        assert_eq!(options.output_type_index, None);
        assert_eq!(options.activate_index, Some(3));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut options = DecoderOptions::default();
        assert!(options.apply("copy", "7").is_err());
        assert!(options.apply("pool", "yes").is_err());
        assert!(options.apply("in_type", "-5").is_err());
        let err = options.apply("out_type", "abc").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Usage);
    }

    #[test]
    fn test_parse_config_lines() {
        let parsed = parse_config_lines("# comment\npool = 0\n\ncopy = \"2\"\nbogus\n");
        assert_eq!(
            parsed,
            vec![
                ("pool".to_string(), "0".to_string()),
                ("copy".to_string(), "2".to_string())
            ]
        );
    }
}
