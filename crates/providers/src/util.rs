//! Shared helpers: reqwest error mapping and credential resolution.

use cs_domain::config::{AuthConfig, AuthMode};
use cs_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve the credential an [`AuthConfig`] points at.
///
/// Sources, first non-blank wins:
/// 1. `key` field (plaintext, warns)
/// 2. `service` + `account` → OS keychain via `keyring`
/// 3. `env` field
/// 4. Headless fallback: env var `{SERVICE}_{ACCOUNT}` uppercased
///
/// `mode = "none"` always yields `None`. An unresolvable credential is
/// absent rather than an error; callers decide whether that is fatal.
pub fn resolve_credential(auth: &AuthConfig) -> Option<String> {
    if auth.mode == AuthMode::None {
        return None;
    }

    if let Some(key) = auth.key.as_deref().and_then(non_blank) {
        tracing::warn!(
            "API key loaded from plaintext config field 'key'; \
             prefer 'env' or 'keychain' mode instead"
        );
        return Some(key);
    }

    let keychain = auth.service.as_deref().zip(auth.account.as_deref());
    if let Some((service, account)) = keychain {
        match resolve_from_keychain(service, account) {
            Ok(secret) => {
                if let Some(secret) = non_blank(&secret) {
                    return Some(secret);
                }
            }
            Err(e) => tracing::debug!(
                service,
                account,
                error = %e,
                "keychain lookup failed, falling through to env"
            ),
        }
    }

    if let Some(var) = auth.env.as_deref() {
        if let Some(val) = read_env(var) {
            return Some(val);
        }
        tracing::info!(env_var = var, "credential env var not set");
    }

    if let Some((service, account)) = keychain {
        let fallback_var = keychain_fallback_env_name(service, account);
        if let Some(val) = read_env(&fallback_var) {
            tracing::info!(env_var = %fallback_var, "credential resolved from headless fallback env var");
            return Some(val);
        }
    }

    None
}

fn read_env(var: &str) -> Option<String> {
    std::env::var(var).ok().as_deref().and_then(non_blank)
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Read a secret from the OS keychain (macOS Keychain, Windows Credential
/// Manager, Linux Secret Service). Fails on headless systems.
pub fn resolve_from_keychain(service: &str, account: &str) -> Result<String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
    entry
        .get_password()
        .map_err(|e| Error::Auth(format!("keyring get_password failed: {e}")))
}

/// `("chatstream", "openai-api-key")` → `"CHATSTREAM_OPENAI_API_KEY"`.
pub fn keychain_fallback_env_name(service: &str, account: &str) -> String {
    format!(
        "{}_{}",
        service.to_uppercase().replace('-', "_"),
        account.to_uppercase().replace('-', "_"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_env_name_basic() {
        assert_eq!(
            keychain_fallback_env_name("chatstream", "openai-api-key"),
            "CHATSTREAM_OPENAI_API_KEY"
        );
    }

    #[test]
    fn plaintext_key_takes_precedence() {
        let auth = AuthConfig {
            key: Some("sk-plain".into()),
            env: Some("CS_TEST_SHOULD_NOT_BE_READ".into()),
            ..Default::default()
        };
        assert_eq!(resolve_credential(&auth).as_deref(), Some("sk-plain"));
    }

    #[test]
    fn env_var_is_read_and_trimmed() {
        let var = "CS_TEST_RESOLVE_ENV_KEY_4141";
        std::env::set_var(var, " env-secret\n");
        let auth = AuthConfig::from_env(var);
        assert_eq!(resolve_credential(&auth).as_deref(), Some("env-secret"));
        std::env::remove_var(var);
    }

    #[test]
    fn headless_fallback_env_is_used() {
        let fallback = "CHATSTREAM_CS_TEST_FALLBACK";
        std::env::set_var(fallback, "fallback-secret");
        let auth = AuthConfig {
            service: Some("chatstream".into()),
            account: Some("cs-test-fallback".into()),
            ..Default::default()
        };
        assert_eq!(resolve_credential(&auth).as_deref(), Some("fallback-secret"));
        std::env::remove_var(fallback);
    }

    #[test]
    fn blank_key_falls_through_to_env() {
        let var = "CS_TEST_BLANK_KEY_FALLTHROUGH_5151";
        std::env::set_var(var, "from-env");
        let auth = AuthConfig {
            key: Some("   ".into()),
            env: Some(var.into()),
            ..Default::default()
        };
        assert_eq!(resolve_credential(&auth).as_deref(), Some("from-env"));
        std::env::remove_var(var);
    }

    #[test]
    fn credential_absent_instead_of_error() {
        assert!(resolve_credential(&AuthConfig::from_env("CS_TEST_NONEXISTENT_VAR_9292")).is_none());
        let none_mode = AuthConfig {
            mode: AuthMode::None,
            key: Some("ignored".into()),
            ..Default::default()
        };
        assert!(resolve_credential(&none_mode).is_none());
        let blank = AuthConfig {
            key: Some("  ".into()),
            ..Default::default()
        };
        assert!(resolve_credential(&blank).is_none());
    }
}
