//! Configuration module for Gmail accounts and server settings
//!
//! All configuration is loaded from environment variables following the pattern
//! `GMAIL_MCP_<SEGMENT>_<KEY>`. Account segments are discovered by scanning for
//! `GMAIL_MCP_*_ACCESS_TOKEN` variables.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use regex::Regex;
use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

const ENV_PREFIX: &str = "GMAIL_MCP_";
const DEFAULT_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Gmail account configuration
///
/// Tokens are stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// Account identifier (lowercase, used as default `account_id` parameter)
    pub account_id: String,
    /// User id placed in API paths; `me` addresses the token owner
    pub user_id: String,
    /// OAuth 2.0 access token with Gmail scopes
    pub access_token: SecretString,
}

/// Server-wide configuration
///
/// Wraps all account configs and global server settings. Cloned into MCP tool
/// handlers via `Arc` for thread-safe shared access.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// All configured accounts, keyed by `account_id`
    pub accounts: BTreeMap<String, AccountConfig>,
    /// Gmail REST API root without trailing slash
    pub api_base_url: String,
    /// Whether mutating tools (send, modify, trash, delete, settings) are enabled
    pub write_enabled: bool,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Cap on decoded attachment and inline-image bytes per outgoing message
    pub max_attachment_bytes: usize,
    /// Directory file-path attachments are confined to; `None` disables them
    pub attachment_root: Option<PathBuf>,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// Discovers accounts by scanning for `GMAIL_MCP_*_ACCESS_TOKEN` patterns.
    /// If no accounts are explicitly defined, a `default` account is required
    /// via `GMAIL_MCP_DEFAULT_ACCESS_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required environment variables are missing
    /// or malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// GMAIL_MCP_DEFAULT_ACCESS_TOKEN=ya29.a0...
    /// GMAIL_MCP_WORK_ACCESS_TOKEN=ya29.b1...
    /// GMAIL_MCP_WORK_USER_ID=me
    /// GMAIL_MCP_WRITE_ENABLED=false
    /// GMAIL_MCP_ATTACHMENT_ROOT=/home/user/outbox
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let mut vars = BTreeMap::new();
        for (key, value) in env::vars_os() {
            let Some(key) = key.to_str().map(str::to_owned) else {
                continue;
            };
            if !key.starts_with(ENV_PREFIX) {
                continue;
            }
            let value = value.into_string().map_err(|_| {
                AppError::InvalidInput(format!(
                    "environment variable {key} contains non-unicode data"
                ))
            })?;
            vars.insert(key, value);
        }
        Self::from_vars(&vars)
    }

    /// Build configuration from an explicit variable map
    pub fn from_vars(vars: &BTreeMap<String, String>) -> AppResult<Self> {
        let account_pattern = Regex::new(r"^GMAIL_MCP_([A-Z0-9_]+)_ACCESS_TOKEN$")
            .map_err(|e| AppError::Internal(format!("invalid account regex: {e}")))?;

        let mut account_segments: Vec<String> = vars
            .keys()
            .filter_map(|k| {
                account_pattern
                    .captures(k)
                    .and_then(|c| c.get(1).map(|m| m.as_str().to_owned()))
            })
            .collect();

        if account_segments.is_empty() {
            account_segments.push("DEFAULT".to_owned());
        }

        account_segments.sort();
        account_segments.dedup();

        let mut accounts = BTreeMap::new();
        for seg in account_segments {
            let account = load_account(vars, &seg)?;
            accounts.insert(account.account_id.clone(), account);
        }

        Ok(Self {
            accounts,
            api_base_url: parse_base_url(vars.get("GMAIL_MCP_API_BASE_URL").map(String::as_str))?,
            write_enabled: parse_bool_var(vars, "GMAIL_MCP_WRITE_ENABLED", false)?,
            connect_timeout_ms: parse_number_var(vars, "GMAIL_MCP_CONNECT_TIMEOUT_MS", 10_000)?,
            request_timeout_ms: parse_number_var(vars, "GMAIL_MCP_REQUEST_TIMEOUT_MS", 60_000)?,
            max_attachment_bytes: parse_number_var(
                vars,
                "GMAIL_MCP_MAX_ATTACHMENT_BYTES",
                25 * 1024 * 1024,
            )?,
            attachment_root: vars
                .get("GMAIL_MCP_ATTACHMENT_ROOT")
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        })
    }

    /// Get account configuration by ID
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account ID is not configured.
    pub fn get_account(&self, account_id: &str) -> AppResult<&AccountConfig> {
        self.accounts
            .get(account_id)
            .ok_or_else(|| AppError::NotFound(format!("account '{account_id}' is not configured")))
    }
}

/// Load a single account configuration
///
/// Reads `GMAIL_MCP_<SEGMENT>_ACCESS_TOKEN` and `_USER_ID`. Normalizes the
/// segment name to lowercase for `account_id`.
fn load_account(vars: &BTreeMap<String, String>, segment: &str) -> AppResult<AccountConfig> {
    let prefix = format!("{ENV_PREFIX}{}_", sanitize_segment(segment));
    let token = required_var(vars, &format!("{prefix}ACCESS_TOKEN"))?;
    let user_id = vars
        .get(&format!("{prefix}USER_ID"))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or("me")
        .to_owned();

    Ok(AccountConfig {
        account_id: segment.to_ascii_lowercase(),
        user_id,
        access_token: SecretString::new(token.trim().into()),
    })
}

/// Read a required variable, returning error if missing or empty
fn required_var(vars: &BTreeMap<String, String>, key: &str) -> AppResult<String> {
    match vars.get(key) {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Sanitize an account segment to uppercase alphanumeric/underscore
fn sanitize_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for ch in seg.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

/// Validate the API root and strip trailing slashes
fn parse_base_url(value: Option<&str>) -> AppResult<String> {
    let raw = value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(DEFAULT_API_BASE_URL);
    let url = raw.trim_end_matches('/');
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(AppError::InvalidInput(format!(
            "GMAIL_MCP_API_BASE_URL must be an http(s) URL, got '{raw}'"
        )));
    }
    Ok(url.to_owned())
}

/// Parse a boolean variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
fn parse_bool_var(vars: &BTreeMap<String, String>, key: &str, default: bool) -> AppResult<bool> {
    match vars.get(key) {
        Some(v) => parse_bool_value(v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse an unsigned numeric variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but does not parse.
fn parse_number_var<T>(vars: &BTreeMap<String, String>, key: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
{
    match vars.get(key) {
        Some(v) => v.trim().parse::<T>().map_err(|_| {
            AppError::InvalidInput(format!("invalid numeric environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;

    use secrecy::ExposeSecret;

    use super::{ServerConfig, parse_base_url, parse_bool_value};

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn parse_bool_value_accepts_common_truthy_and_falsy_values() {
        for truthy in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert_eq!(parse_bool_value(truthy), Some(true));
        }

        for falsy in ["0", "false", "FALSE", " no ", "N", "off"] {
            assert_eq!(parse_bool_value(falsy), Some(false));
        }
    }

    #[test]
    fn parse_bool_value_rejects_unrecognized_values() {
        for invalid in ["", "2", "maybe", "enabled", "disabled"] {
            assert_eq!(parse_bool_value(invalid), None);
        }
    }

    #[test]
    fn default_account_is_required_when_none_declared() {
        let err = ServerConfig::from_vars(&BTreeMap::new()).expect_err("missing token");
        assert!(err.to_string().contains("GMAIL_MCP_DEFAULT_ACCESS_TOKEN"));
    }

    #[test]
    fn accounts_are_discovered_with_defaults() {
        let config = ServerConfig::from_vars(&vars(&[
            ("GMAIL_MCP_DEFAULT_ACCESS_TOKEN", "tok-default"),
            ("GMAIL_MCP_WORK_ACCESS_TOKEN", "tok-work"),
            ("GMAIL_MCP_WORK_USER_ID", "boss@example.com"),
        ]))
        .expect("config");

        assert_eq!(config.accounts.len(), 2);
        let work = config.get_account("work").expect("work account");
        assert_eq!(work.user_id, "boss@example.com");
        assert_eq!(work.access_token.expose_secret(), "tok-work");
        assert_eq!(config.get_account("default").expect("default").user_id, "me");
        assert!(config.get_account("other").is_err());

        assert!(!config.write_enabled);
        assert_eq!(config.api_base_url, "https://gmail.googleapis.com/gmail/v1");
        assert_eq!(config.request_timeout_ms, 60_000);
        assert_eq!(config.max_attachment_bytes, 25 * 1024 * 1024);
        assert!(config.attachment_root.is_none());
    }

    #[test]
    fn global_settings_are_parsed() {
        let config = ServerConfig::from_vars(&vars(&[
            ("GMAIL_MCP_DEFAULT_ACCESS_TOKEN", "tok"),
            ("GMAIL_MCP_WRITE_ENABLED", "yes"),
            ("GMAIL_MCP_REQUEST_TIMEOUT_MS", "1500"),
            ("GMAIL_MCP_ATTACHMENT_ROOT", "/srv/outbox"),
            ("GMAIL_MCP_API_BASE_URL", "http://127.0.0.1:9000/gmail/v1//"),
        ]))
        .expect("config");
        assert!(config.write_enabled);
        assert_eq!(config.request_timeout_ms, 1_500);
        assert_eq!(config.attachment_root.as_deref(), Some(Path::new("/srv/outbox")));
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000/gmail/v1");

        let err = ServerConfig::from_vars(&vars(&[
            ("GMAIL_MCP_DEFAULT_ACCESS_TOKEN", "tok"),
            ("GMAIL_MCP_CONNECT_TIMEOUT_MS", "soon"),
        ]))
        .expect_err("bad number");
        assert!(err.to_string().contains("GMAIL_MCP_CONNECT_TIMEOUT_MS"));
    }

    #[test]
    fn base_url_requires_http_scheme() {
        assert!(parse_base_url(Some("ftp://example.com")).is_err());
        assert_eq!(
            parse_base_url(None).expect("default"),
            "https://gmail.googleapis.com/gmail/v1"
        );
    }
}
