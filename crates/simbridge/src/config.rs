//! CLI configuration -- thin wrapper around `simbridge_config`.
//!
//! Adds flag-aware resolution on top of the shared crate: CLI overrides
//! (--gateway, --username, --insecure, --timeout) are overlaid on the
//! selected profile before translation to a `GatewayConfig`.

use std::time::Duration;

use secrecy::SecretString;

use simbridge_core::{Credentials, GatewayConfig, TlsMode};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from the shared crate ────────────────────────────────

pub use simbridge_config::{Config, config_path, load_config_or_default};

// ── Flag-aware resolution ───────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    simbridge_config::active_profile_name(global.profile.as_deref(), config)
}

/// Build a `GatewayConfig` from the config file, profile, and CLI overrides.
pub fn resolve_gateway(global: &GlobalOpts) -> Result<GatewayConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    // If the profile exists, overlay CLI flags on top of it
    if let Some(profile) = cfg.profiles.get(&profile_name) {
        let mut profile = profile.clone();
        if let Some(ref url) = global.gateway {
            profile.gateway.clone_from(url);
        }
        if let Some(ref user) = global.username {
            profile.username.clone_from(user);
        }
        if global.insecure {
            profile.insecure = Some(true);
        }
        if let Some(secs) = global.timeout {
            profile.timeout = Some(secs);
        }
        return Ok(simbridge_config::profile_to_gateway_config(
            &profile,
            &cfg.defaults,
            &profile_name,
        )?);
    }

    // An explicitly named profile that does not exist is an error, not
    // a fall-through to flags
    if global.profile.is_some() {
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: simbridge_config::available_profiles(&cfg),
        });
    }

    // No profile found -- build from CLI flags / env vars alone
    flags_only_config(global, &profile_name)
}

/// Build a `GatewayConfig` without a profile. Requires --gateway and
/// --username; the password comes from `SIMBRIDGE_PASSWORD`.
fn flags_only_config(global: &GlobalOpts, profile_name: &str) -> Result<GatewayConfig, CliError> {
    let Some(url_str) = global.gateway.as_deref() else {
        return Err(CliError::NoConfig {
            path: config_path().display().to_string(),
        });
    };
    let url: url::Url = url_str.parse().map_err(|_| CliError::Validation {
        field: "gateway".into(),
        reason: format!("invalid URL: {url_str}"),
    })?;

    let Some(username) = global.username.clone() else {
        return Err(CliError::NoCredentials {
            profile: profile_name.into(),
        });
    };
    let password = std::env::var("SIMBRIDGE_PASSWORD")
        .map(SecretString::from)
        .map_err(|_| CliError::NoCredentials {
            profile: profile_name.into(),
        })?;

    let tls = if global.insecure {
        TlsMode::DangerAcceptInvalid
    } else {
        TlsMode::System
    };

    Ok(GatewayConfig {
        url,
        credentials: Credentials { username, password },
        tls,
        timeout: Duration::from_secs(global.timeout.unwrap_or(30)),
        ..GatewayConfig::default()
    })
}
