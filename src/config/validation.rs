//! Configuration validation.

use crate::config::Config;
use hyper::Uri;
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend with a valid http/https URL
/// - Unique backend URLs and positive weights
/// - Positive probe interval, virtual node count, and breaker settings
/// - A known log level
///
/// Returns `Ok(())` if valid, or a message joining every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut seen_urls = HashSet::new();

    for backend in &config.backends {
        if let Err(e) = validate_backend_url(&backend.url) {
            errors.push(e);
        }

        if !seen_urls.insert(backend.url.as_str()) {
            errors.push(format!("duplicate backend URL: {}", backend.url));
        }

        if backend.weight == 0 {
            errors.push(format!(
                "backend {} has weight 0 (must be >= 1)",
                backend.url
            ));
        }
    }

    if config.health_check.interval.is_zero() {
        errors.push("health_check.interval must be positive".to_string());
    }

    if config.strategy.virtual_nodes == 0 {
        errors.push("strategy.virtual_nodes must be >= 1".to_string());
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push("circuit_breaker.failure_threshold must be >= 1".to_string());
    }

    if config.circuit_breaker.reset_timeout.is_zero() {
        errors.push("circuit_breaker.reset_timeout must be positive".to_string());
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Check that a backend URL is absolute, http or https, and has a host.
fn validate_backend_url(url: &str) -> Result<(), String> {
    let uri: Uri = url
        .parse()
        .map_err(|_| format!("invalid backend URL: {}", url))?;

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => {
            return Err(format!(
                "backend URL {} must use http or https scheme",
                url
            ))
        }
    }

    if uri.host().is_none() {
        return Err(format!("backend URL {} must have a host", url));
    }

    Ok(())
}
