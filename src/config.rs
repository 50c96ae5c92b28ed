//! SDK configuration: sources, merge and validation.
//!
//! Three sources feed a [`PartialConfig`] each, highest priority first:
//!
//! 1. `data-*` attributes on the embedding script element
//! 2. the page-level `AdServerSDKConfig` object (JSON, camelCase keys)
//! 3. built-in defaults
//!
//! Programmatic overrides passed to `Sdk::init` rank above all of them. The
//! merged record is validated as a whole; if any field is rejected the entire
//! default record is used instead (lifecycle hooks are kept).

use crate::error::Error;
use crate::fetch::{DeliverySettings, RetryPolicy};
use crate::validate::{
    validate_api_endpoint, validate_api_timeout, validate_batch, validate_cache_ttl,
    validate_csp_nonce, validate_retry_attempts, validate_retry_delay, Validation,
    ValidationError, ValidationErrorCode,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Name of the page-level global configuration object.
pub const GLOBAL_CONFIG_NAME: &str = "AdServerSDKConfig";

pub const DEFAULT_API_ENDPOINT: &str = "/api/v1";
pub const DEFAULT_API_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Lifecycle hook (`on_init`, `on_ready`).
pub type Hook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Error hook, called with every error the SDK captures.
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

/// Callbacks supplied by the embedding page.
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_init: Option<Hook>,
    pub on_ready: Option<Hook>,
    pub on_error: Option<ErrorHook>,
}

impl Hooks {
    /// Field-wise merge, `self` wins.
    pub fn or(self, lower: Hooks) -> Hooks {
        Hooks {
            on_init: self.on_init.or(lower.on_init),
            on_ready: self.on_ready.or(lower.on_ready),
            on_error: self.on_error.or(lower.on_error),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_init", &self.on_init.is_some())
            .field("on_ready", &self.on_ready.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Placeholder shown when a creative can't be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackConfig {
    /// Custom markup, sanitized before use. Overrides the built-in placeholder.
    pub html: Option<String>,
    pub text: String,
    pub background_color: String,
    pub border_color: String,
    pub text_color: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            html: None,
            text: "Temporarily unavailable".to_string(),
            background_color: "#f5f5f5".to_string(),
            border_color: "#ccc".to_string(),
            text_color: "#666".to_string(),
        }
    }
}

/// One configuration source. Every field is optional; numbers are `f64` so
/// unparsable or non-finite input survives until validation rejects it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialConfig {
    pub api_endpoint: Option<String>,
    pub api_timeout: Option<f64>,
    pub cache_enabled: Option<bool>,
    #[serde(rename = "cacheTTL")]
    pub cache_ttl: Option<f64>,
    pub retry_enabled: Option<bool>,
    pub retry_max_attempts: Option<f64>,
    pub retry_delay: Option<f64>,
    pub iframe_mode: Option<bool>,
    pub fallback_enabled: Option<bool>,
    pub debug: Option<bool>,
    pub csp_nonce: Option<String>,
    pub allowed_origins: Option<Vec<String>>,
    pub fallback: Option<FallbackConfig>,
    #[serde(skip)]
    pub hooks: Hooks,
}

/// JavaScript `parseInt(value, 10)`: leading whitespace, optional sign, then
/// digits up to the first non-digit. No digits at all yields NaN.
fn parse_leading_int(value: &str) -> f64 {
    let trimmed = value.trim_start();
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1.0, &trimmed[1..]),
        Some(b'+') => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };

    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<f64>()
        .map(|n| sign * n)
        .unwrap_or(f64::NAN)
}

impl PartialConfig {
    /// Read the `data-*` attributes of the embedding script element.
    ///
    /// Booleans are true only for the exact string `"true"`. Empty string and
    /// numeric attributes are ignored, as if absent.
    pub fn from_script_attributes(attributes: &HashMap<String, String>) -> Self {
        let get = |name: &str| attributes.get(name).map(String::as_str);
        let flag = |name: &str| get(name).map(|v| v == "true");
        let number = |name: &str| {
            get(name)
                .filter(|v| !v.is_empty())
                .map(parse_leading_int)
        };
        let text = |name: &str| get(name).filter(|v| !v.is_empty()).map(str::to_string);

        PartialConfig {
            api_endpoint: text("data-api-endpoint"),
            api_timeout: number("data-api-timeout"),
            cache_enabled: flag("data-cache-enabled"),
            cache_ttl: number("data-cache-ttl"),
            retry_enabled: flag("data-retry-enabled"),
            retry_max_attempts: number("data-retry-max-attempts"),
            retry_delay: number("data-retry-delay"),
            iframe_mode: flag("data-iframe-mode"),
            fallback_enabled: flag("data-fallback-enabled"),
            debug: flag("data-debug"),
            csp_nonce: text("data-csp-nonce"),
            allowed_origins: text("data-allowed-origins").map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            fallback: None,
            hooks: Hooks::default(),
        }
    }

    /// Parse the page-level global object.
    pub fn from_global_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Field-wise merge, `self` wins.
    pub fn or(self, lower: PartialConfig) -> PartialConfig {
        PartialConfig {
            api_endpoint: self.api_endpoint.or(lower.api_endpoint),
            api_timeout: self.api_timeout.or(lower.api_timeout),
            cache_enabled: self.cache_enabled.or(lower.cache_enabled),
            cache_ttl: self.cache_ttl.or(lower.cache_ttl),
            retry_enabled: self.retry_enabled.or(lower.retry_enabled),
            retry_max_attempts: self.retry_max_attempts.or(lower.retry_max_attempts),
            retry_delay: self.retry_delay.or(lower.retry_delay),
            iframe_mode: self.iframe_mode.or(lower.iframe_mode),
            fallback_enabled: self.fallback_enabled.or(lower.fallback_enabled),
            debug: self.debug.or(lower.debug),
            csp_nonce: self.csp_nonce.or(lower.csp_nonce),
            allowed_origins: self.allowed_origins.or(lower.allowed_origins),
            fallback: self.fallback.or(lower.fallback),
            hooks: self.hooks.or(lower.hooks),
        }
    }
}

/// Resolved, validated configuration. Replaced as a whole, never mutated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkConfig {
    pub api_endpoint: String,
    /// Per-attempt request timeout in milliseconds
    pub api_timeout: u64,
    pub cache_enabled: bool,
    #[serde(rename = "cacheTTL")]
    pub cache_ttl: u64,
    pub retry_enabled: bool,
    /// Extra attempts after the first
    pub retry_max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub retry_delay: u64,
    /// Render into an isolated frame instead of the host tree
    pub iframe_mode: bool,
    pub fallback_enabled: bool,
    pub debug: bool,
    pub csp_nonce: Option<String>,
    /// Extra origins trusted for cross-context click messages, normalized
    pub allowed_origins: Vec<String>,
    pub fallback: FallbackConfig,
    #[serde(skip)]
    pub hooks: Hooks,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            api_timeout: DEFAULT_API_TIMEOUT_MS,
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL_MS,
            retry_enabled: true,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY_MS,
            iframe_mode: false,
            fallback_enabled: true,
            debug: false,
            csp_nonce: None,
            allowed_origins: Vec::new(),
            fallback: FallbackConfig::default(),
            hooks: Hooks::default(),
        }
    }
}

/// Normalize an allowlist entry to its ASCII origin (`scheme://host[:port]`).
fn normalize_origin(origin: &str) -> Result<String, ValidationError> {
    let url = Url::parse(origin).map_err(|e| {
        ValidationError::new(
            ValidationErrorCode::InvalidUrl,
            format!("Invalid origin '{}': {}", origin, e),
        )
    })?;

    match url.origin() {
        origin @ url::Origin::Tuple(..) => Ok(origin.ascii_serialization()),
        url::Origin::Opaque(_) => Err(ValidationError::new(
            ValidationErrorCode::InvalidUrl,
            format!("'{}' has no usable origin", url),
        )),
    }
}

impl SdkConfig {
    /// Fill unset fields from the defaults and validate every field.
    pub fn from_partial(partial: PartialConfig) -> Result<Self, ValidationError> {
        let defaults = SdkConfig::default();

        let api_endpoint = partial.api_endpoint.unwrap_or(defaults.api_endpoint);
        let api_timeout = partial.api_timeout.unwrap_or(defaults.api_timeout as f64);
        let cache_ttl = partial.cache_ttl.unwrap_or(defaults.cache_ttl as f64);
        let retry_max_attempts = partial
            .retry_max_attempts
            .unwrap_or(f64::from(defaults.retry_max_attempts));
        let retry_delay = partial.retry_delay.unwrap_or(defaults.retry_delay as f64);
        let csp_nonce = partial.csp_nonce.filter(|n| !n.is_empty());

        let field = |name: &str, result: Validation| result.map_err(|e| e.for_field(name));
        validate_batch([
            field("apiEndpoint", validate_api_endpoint(&api_endpoint)),
            field("apiTimeout", validate_api_timeout(api_timeout)),
            field("cacheTTL", validate_cache_ttl(cache_ttl)),
            field("retryMaxAttempts", validate_retry_attempts(retry_max_attempts)),
            field("retryDelay", validate_retry_delay(retry_delay)),
            field("cspNonce", validate_csp_nonce(csp_nonce.as_deref().unwrap_or(""))),
        ])?;

        let allowed_origins = partial
            .allowed_origins
            .unwrap_or_default()
            .iter()
            .map(|o| normalize_origin(o).map_err(|e| e.for_field("allowedOrigins")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SdkConfig {
            api_endpoint,
            api_timeout: api_timeout as u64,
            cache_enabled: partial.cache_enabled.unwrap_or(defaults.cache_enabled),
            cache_ttl: cache_ttl as u64,
            retry_enabled: partial.retry_enabled.unwrap_or(defaults.retry_enabled),
            retry_max_attempts: retry_max_attempts as u32,
            retry_delay: retry_delay as u64,
            iframe_mode: partial.iframe_mode.unwrap_or(defaults.iframe_mode),
            fallback_enabled: partial.fallback_enabled.unwrap_or(defaults.fallback_enabled),
            debug: partial.debug.unwrap_or(defaults.debug),
            csp_nonce,
            allowed_origins,
            fallback: partial.fallback.unwrap_or(defaults.fallback),
            hooks: partial.hooks,
        })
    }

    /// Like [`SdkConfig::from_partial`], but an invalid record is replaced by
    /// the defaults (keeping the hooks) instead of failing.
    pub fn resolve(partial: PartialConfig) -> Self {
        let hooks = partial.hooks.clone();
        match Self::from_partial(partial) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Invalid config detected, using defaults");
                SdkConfig {
                    hooks,
                    ..SdkConfig::default()
                }
            }
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl)
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            api_endpoint: self.api_endpoint.clone(),
            timeout: self.api_timeout(),
            retry: RetryPolicy {
                enabled: self.retry_enabled,
                max_attempts: self.retry_max_attempts,
                base_delay: Duration::from_millis(self.retry_delay),
            },
        }
    }
}

impl From<&SdkConfig> for PartialConfig {
    fn from(config: &SdkConfig) -> Self {
        PartialConfig {
            api_endpoint: Some(config.api_endpoint.clone()),
            api_timeout: Some(config.api_timeout as f64),
            cache_enabled: Some(config.cache_enabled),
            cache_ttl: Some(config.cache_ttl as f64),
            retry_enabled: Some(config.retry_enabled),
            retry_max_attempts: Some(f64::from(config.retry_max_attempts)),
            retry_delay: Some(config.retry_delay as f64),
            iframe_mode: Some(config.iframe_mode),
            fallback_enabled: Some(config.fallback_enabled),
            debug: Some(config.debug),
            csp_nonce: config.csp_nonce.clone(),
            allowed_origins: Some(config.allowed_origins.clone()),
            fallback: Some(config.fallback.clone()),
            hooks: config.hooks.clone(),
        }
    }
}

/// Merge the three page sources by priority and resolve them.
pub fn resolve_config(
    overrides: PartialConfig,
    script: PartialConfig,
    global: PartialConfig,
) -> SdkConfig {
    SdkConfig::resolve(overrides.or(script).or(global))
}
