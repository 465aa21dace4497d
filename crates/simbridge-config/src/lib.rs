//! Profile-based configuration for the simbridge CLI.
//!
//! TOML profiles, password resolution via env-var indirection, and
//! translation to `simbridge_core::GatewayConfig`. Core never reads
//! files or the process environment -- this crate is the only place
//! that does.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use simbridge_core::{Credentials, GatewayConfig, RecoveryOptions, TlsMode};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    /// Fallbacks applied when a profile leaves a field unset.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named gateway profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    /// REST request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Command-channel heartbeat period in seconds.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    /// Bring up the push stream after the command channel connects.
    #[serde(default = "default_push")]
    pub push: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: default_timeout(),
            heartbeat_secs: default_heartbeat(),
            push: default_push(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_heartbeat() -> u64 {
    15
}
fn default_push() -> bool {
    true
}

/// A named gateway profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Gateway base URL (e.g., "https://sim.example.com").
    pub gateway: String,

    /// Username for session login.
    pub username: String,

    /// Environment variable to read the password from.
    pub password_env: Option<String>,

    /// Password in plaintext -- prefer `password_env`.
    pub password: Option<String>,

    /// Path to a custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,

    /// Accept self-signed TLS certificates.
    pub insecure: Option<bool>,

    /// Override the REST request timeout, in seconds.
    pub timeout: Option<u64>,

    /// Override the heartbeat period, in seconds.
    pub heartbeat_secs: Option<u64>,

    /// Override the push-stream toggle.
    pub push: Option<bool>,

    /// Recovery engine overrides.
    #[serde(default)]
    pub recovery: RecoveryOverrides,
}

/// Per-profile recovery tuning. Unset fields keep the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RecoveryOverrides {
    pub failure_threshold: Option<u32>,
    pub suspension_secs: Option<u64>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter_factor: Option<f64>,
    pub max_attempts: Option<u32>,
}

impl RecoveryOverrides {
    fn apply(&self) -> Result<RecoveryOptions, ConfigError> {
        let mut opts = RecoveryOptions::default();
        if let Some(v) = self.failure_threshold {
            opts.failure_threshold = v;
        }
        if let Some(v) = self.suspension_secs {
            opts.suspension_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.initial_delay_ms {
            opts.initial_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.max_delay_ms {
            opts.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.jitter_factor {
            opts.jitter_factor = v;
        }
        if let Some(v) = self.max_attempts {
            opts.max_attempts = v;
        }
        validate_recovery(&opts)?;
        Ok(opts)
    }
}

fn validate_recovery(opts: &RecoveryOptions) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&opts.jitter_factor) {
        return Err(ConfigError::Validation {
            field: "recovery.jitter_factor".into(),
            reason: format!("must be between 0.0 and 1.0, got {}", opts.jitter_factor),
        });
    }
    if opts.failure_threshold == 0 {
        return Err(ConfigError::Validation {
            field: "recovery.failure_threshold".into(),
            reason: "must be at least 1".into(),
        });
    }
    if opts.max_attempts == 0 {
        return Err(ConfigError::Validation {
            field: "recovery.max_attempts".into(),
            reason: "must be at least 1".into(),
        });
    }
    if opts.initial_delay.is_zero() {
        return Err(ConfigError::Validation {
            field: "recovery.initial_delay_ms".into(),
            reason: "must be positive".into(),
        });
    }
    if opts.max_delay < opts.initial_delay {
        return Err(ConfigError::Validation {
            field: "recovery.max_delay_ms".into(),
            reason: "must not be below initial_delay_ms".into(),
        });
    }
    Ok(())
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "simbridge", "simbridge").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("simbridge");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full `Config` from the canonical file plus `SIMBRIDGE_*` env.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load a `Config` from a specific TOML file plus `SIMBRIDGE_*` env.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SIMBRIDGE_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Profile resolution ──────────────────────────────────────────────

/// Resolve the active profile name from an explicit choice and the config.
pub fn active_profile_name(explicit: Option<&str>, config: &Config) -> String {
    explicit
        .map(ToOwned::to_owned)
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Comma-joined sorted profile names for error text, or `"none"`.
pub fn available_profiles(config: &Config) -> String {
    let mut names: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    if names.is_empty() {
        "none".into()
    } else {
        names.join(", ")
    }
}

/// Look up a profile by name and translate it to a `GatewayConfig`.
pub fn resolve_gateway_config(
    config: &Config,
    profile_name: &str,
) -> Result<GatewayConfig, ConfigError> {
    let Some(profile) = config.profiles.get(profile_name) else {
        return Err(ConfigError::ProfileNotFound {
            name: profile_name.into(),
            available: available_profiles(config),
        });
    };
    profile_to_gateway_config(profile, &config.defaults, profile_name)
}

/// Build a `GatewayConfig` from a profile, falling back to `defaults`
/// for fields the profile leaves unset.
///
/// Validation runs before password resolution so a broken profile is
/// reported even when no credentials are reachable.
pub fn profile_to_gateway_config(
    profile: &Profile,
    defaults: &Defaults,
    profile_name: &str,
) -> Result<GatewayConfig, ConfigError> {
    let url: url::Url = profile.gateway.parse().map_err(|_| ConfigError::Validation {
        field: "gateway".into(),
        reason: format!("invalid URL: {}", profile.gateway),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "gateway".into(),
            reason: format!("unsupported scheme '{}': use http or https", url.scheme()),
        });
    }

    if profile.username.is_empty() {
        return Err(ConfigError::Validation {
            field: "username".into(),
            reason: "must not be empty".into(),
        });
    }

    let heartbeat = profile.heartbeat_secs.unwrap_or(defaults.heartbeat_secs);
    if heartbeat == 0 {
        return Err(ConfigError::Validation {
            field: "heartbeat_secs".into(),
            reason: "must be at least 1".into(),
        });
    }

    let recovery = profile.recovery.apply()?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    let password = resolve_password(profile, profile_name)?;

    Ok(GatewayConfig {
        url,
        credentials: Credentials {
            username: profile.username.clone(),
            password,
        },
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        heartbeat_interval: Duration::from_secs(heartbeat),
        push_enabled: profile.push.unwrap_or(defaults.push),
        recovery,
    })
}

// ── Password resolution ─────────────────────────────────────────────

/// Resolve a profile's password from the credential chain.
///
/// `SIMBRIDGE_PASSWORD` wins, then the profile's `password_env`
/// indirection, then plaintext in the file. The secret never appears
/// in logs or error text.
pub fn resolve_password(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Global env var
    if let Ok(pw) = std::env::var("SIMBRIDGE_PASSWORD") {
        return Ok(SecretString::from(pw));
    }

    // 2. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env
        && let Ok(pw) = std::env::var(env_name)
    {
        return Ok(SecretString::from(pw));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
        default_profile = "lab"

        [defaults]
        timeout = 10

        [profiles.lab]
        gateway = "https://sim.lab.example.com"
        username = "trader"
        password_env = "LAB_GATEWAY_PW"
        insecure = true
        heartbeat_secs = 5

        [profiles.lab.recovery]
        failure_threshold = 3
        max_attempts = 4

        [profiles.prod]
        gateway = "https://sim.example.com"
        username = "desk-7"
        password = "plaintext-pw"
        ca_cert = "/etc/simbridge/gateway-ca.pem"
    "#;

    fn sample_config(jail: &mut figment::Jail) -> Config {
        jail.create_file("config.toml", SAMPLE).unwrap();
        load_config_from(Path::new("config.toml")).unwrap()
    }

    fn bare_profile(gateway: &str) -> Profile {
        Profile {
            gateway: gateway.into(),
            username: "trader".into(),
            password_env: None,
            password: Some("pw".into()),
            ca_cert: None,
            insecure: None,
            timeout: None,
            heartbeat_secs: None,
            push: None,
            recovery: RecoveryOverrides::default(),
        }
    }

    // ── Loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_falls_back_to_defaults() {
        figment::Jail::expect_with(|_jail| {
            let cfg = load_config_from(Path::new("missing.toml")).unwrap();
            assert_eq!(cfg.default_profile.as_deref(), Some("default"));
            assert!(cfg.profiles.is_empty());
            assert_eq!(cfg.defaults.timeout, 30);
            assert_eq!(cfg.defaults.heartbeat_secs, 15);
            assert!(cfg.defaults.push);
            Ok(())
        });
    }

    #[test]
    fn loads_from_an_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_profile = \"paper\"\n").unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("paper"));
    }

    #[test]
    fn profiles_parse_with_recovery_overrides() {
        figment::Jail::expect_with(|jail| {
            let cfg = sample_config(jail);
            assert_eq!(cfg.default_profile.as_deref(), Some("lab"));
            assert_eq!(cfg.defaults.timeout, 10);

            let lab = &cfg.profiles["lab"];
            assert_eq!(lab.username, "trader");
            assert_eq!(lab.heartbeat_secs, Some(5));
            assert_eq!(lab.recovery.failure_threshold, Some(3));
            assert_eq!(lab.recovery.max_attempts, Some(4));
            assert_eq!(lab.recovery.initial_delay_ms, None);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_beat_the_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.toml", SAMPLE)?;
            jail.set_env("SIMBRIDGE_DEFAULTS_TIMEOUT", "99");
            jail.set_env("SIMBRIDGE_PROFILES_LAB_USERNAME", "override");

            let cfg = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(cfg.defaults.timeout, 99);
            assert_eq!(cfg.profiles["lab"].username, "override");
            Ok(())
        });
    }

    // ── Profile selection ───────────────────────────────────────────

    #[test]
    fn explicit_profile_beats_the_default() {
        figment::Jail::expect_with(|jail| {
            let cfg = sample_config(jail);
            assert_eq!(active_profile_name(Some("prod"), &cfg), "prod");
            assert_eq!(active_profile_name(None, &cfg), "lab");
            Ok(())
        });
    }

    #[test]
    fn unknown_profile_lists_available() {
        figment::Jail::expect_with(|jail| {
            let cfg = sample_config(jail);
            let err = resolve_gateway_config(&cfg, "staging").unwrap_err();
            assert!(matches!(
                err,
                ConfigError::ProfileNotFound { ref available, .. } if available == "lab, prod"
            ));
            Ok(())
        });
    }

    // ── Password chain ──────────────────────────────────────────────

    #[test]
    fn password_comes_from_the_named_env_var() {
        figment::Jail::expect_with(|jail| {
            let cfg = sample_config(jail);
            jail.set_env("LAB_GATEWAY_PW", "hunter2");

            let pw = resolve_password(&cfg.profiles["lab"], "lab").unwrap();
            assert_eq!(pw.expose_secret(), "hunter2");
            Ok(())
        });
    }

    #[test]
    fn global_password_env_wins() {
        figment::Jail::expect_with(|jail| {
            let cfg = sample_config(jail);
            jail.set_env("SIMBRIDGE_PASSWORD", "global-pw");

            let pw = resolve_password(&cfg.profiles["prod"], "prod").unwrap();
            assert_eq!(pw.expose_secret(), "global-pw");
            Ok(())
        });
    }

    #[test]
    fn password_falls_back_to_plaintext() {
        figment::Jail::expect_with(|jail| {
            let cfg = sample_config(jail);
            let pw = resolve_password(&cfg.profiles["prod"], "prod").unwrap();
            assert_eq!(pw.expose_secret(), "plaintext-pw");
            Ok(())
        });
    }

    #[test]
    fn missing_password_is_an_error() {
        figment::Jail::expect_with(|jail| {
            let cfg = sample_config(jail);
            // lab points at an env var that is not set and has no plaintext
            let err = resolve_password(&cfg.profiles["lab"], "lab").unwrap_err();
            assert!(matches!(
                err,
                ConfigError::NoCredentials { ref profile } if profile == "lab"
            ));
            Ok(())
        });
    }

    // ── Translation ─────────────────────────────────────────────────

    #[test]
    fn profile_translates_to_gateway_config() {
        figment::Jail::expect_with(|jail| {
            let cfg = sample_config(jail);
            jail.set_env("LAB_GATEWAY_PW", "hunter2");

            let gw = resolve_gateway_config(&cfg, "lab").unwrap();
            assert_eq!(gw.url.as_str(), "https://sim.lab.example.com/");
            assert_eq!(gw.credentials.username, "trader");
            assert!(matches!(gw.tls, TlsMode::DangerAcceptInvalid));
            assert_eq!(gw.timeout, Duration::from_secs(10));
            assert_eq!(gw.heartbeat_interval, Duration::from_secs(5));
            assert!(gw.push_enabled);
            assert_eq!(gw.recovery.failure_threshold, 3);
            assert_eq!(gw.recovery.max_attempts, 4);
            assert_eq!(gw.recovery.max_delay, Duration::from_millis(30_000));
            Ok(())
        });
    }

    #[test]
    fn ca_cert_selects_custom_tls() {
        figment::Jail::expect_with(|jail| {
            let cfg = sample_config(jail);
            let gw = resolve_gateway_config(&cfg, "prod").unwrap();
            assert!(matches!(
                gw.tls,
                TlsMode::CustomCa(ref p) if p == Path::new("/etc/simbridge/gateway-ca.pem")
            ));
            Ok(())
        });
    }

    // ── Validation ──────────────────────────────────────────────────

    #[test]
    fn invalid_gateway_url_is_rejected() {
        let defaults = Defaults::default();
        let err =
            profile_to_gateway_config(&bare_profile("not a url"), &defaults, "x").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { ref field, .. } if field == "gateway"
        ));
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let defaults = Defaults::default();
        let err = profile_to_gateway_config(&bare_profile("ftp://sim.example.com"), &defaults, "x")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { ref field, .. } if field == "gateway"
        ));
    }

    #[test]
    fn jitter_factor_must_stay_in_range() {
        let mut profile = bare_profile("https://sim.example.com");
        profile.recovery.jitter_factor = Some(1.5);
        let err =
            profile_to_gateway_config(&profile, &Defaults::default(), "x").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { ref field, .. } if field == "recovery.jitter_factor"
        ));
    }

    #[test]
    fn max_delay_cannot_undercut_initial_delay() {
        let mut profile = bare_profile("https://sim.example.com");
        profile.recovery.initial_delay_ms = Some(5_000);
        profile.recovery.max_delay_ms = Some(1_000);
        let err =
            profile_to_gateway_config(&profile, &Defaults::default(), "x").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { ref field, .. } if field == "recovery.max_delay_ms"
        ));
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let mut profile = bare_profile("https://sim.example.com");
        profile.heartbeat_secs = Some(0);
        let err =
            profile_to_gateway_config(&profile, &Defaults::default(), "x").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { ref field, .. } if field == "heartbeat_secs"
        ));
    }
}
