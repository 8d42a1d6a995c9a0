//! Runtime configuration.
//!
//! A single [`Config`] is read once by [`crate::init`] (or
//! [`crate::init_with_config`] for tests that want to bypass the process
//! environment) and held for the lifetime of the process in a [`OnceLock`],
//! following the same process-wide-singleton style used by the team and
//! segment registries. `Config` is `Copy`: call [`Config::current`]
//! wherever a value is needed rather than threading a parameter through
//! every operation.

use std::sync::OnceLock;

use log::LevelFilter;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Process-wide runtime configuration, read once at [`crate::init`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Enable the shared-memory fast path for co-located peers.
    ///
    /// Env: `PGAS_SHARED_WINDOWS` (`0`/`1`, `false`/`true`, `off`/`on`).
    /// Default: `true`.
    pub shared_windows: bool,

    /// Diagnostic verbosity for this crate's own `log` events.
    ///
    /// Env: `PGAS_LOG_LEVEL` (`error`, `warn`, `info`, `debug`, `trace`).
    /// Default: `Warn`. Does not affect other crates' logging; set the
    /// ambient `RUST_LOG` filter for that.
    pub log_level: LevelFilter,

    /// Fixed upper bound on the number of teams that may exist
    /// concurrently. Enforced by [`crate::team::TeamRegistry::create_from`],
    /// which rejects a new team past this bound with [`crate::Error::Exhausted`].
    ///
    /// Env: `PGAS_MAX_TEAM_DOMAINS`. Default: `32`.
    pub max_team_domains: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_windows: true,
            log_level: LevelFilter::Warn,
            max_team_domains: 32,
        }
    }
}

impl Config {
    /// Build a `Config` from the process environment, falling back to
    /// documented defaults for unset or unparsable variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PGAS_SHARED_WINDOWS") {
            if let Some(b) = parse_bool(&v) {
                cfg.shared_windows = b;
            }
        }

        if let Ok(v) = std::env::var("PGAS_LOG_LEVEL") {
            if let Ok(level) = v.parse::<LevelFilter>() {
                cfg.log_level = level;
            }
        }

        if let Ok(v) = std::env::var("PGAS_MAX_TEAM_DOMAINS") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.max_team_domains = n;
            }
        }

        cfg
    }

    /// Install `self` as the process-wide configuration.
    ///
    /// Returns `false` (and leaves the existing configuration in place) if
    /// called more than once -- matching the team registry's "created by
    /// `init`, read-only thereafter" lifecycle.
    pub(crate) fn install(self) -> bool {
        CONFIG.set(self).is_ok()
    }

    /// Read the process-wide configuration, falling back to
    /// [`Config::default`] if [`crate::init`] has not yet run (useful for
    /// unit tests that exercise a single module in isolation).
    pub fn current() -> Self {
        *CONFIG.get_or_init(Self::default)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert!(cfg.shared_windows);
        assert_eq!(cfg.log_level, LevelFilter::Warn);
        assert_eq!(cfg.max_team_domains, 32);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("nonsense"), None);
    }
}
