//! Strategy dispatcher over `{key, password, agent}` authentication.

use std::path::Path;
use std::sync::Arc;

use russh::client::Handle;
use sshmux_errors::McpError;
use sshmux_types::{AuthMethod, SessionConfig};

use crate::transport::ClientHandler;

/// Pre-flight validation: resolves paths and parses keys without opening a
/// network connection. Callers may run this before `connect` to surface
/// misconfiguration earlier; the core does not require it.
pub fn validate_config(config: &SessionConfig) -> Result<(), McpError> {
    match config.auth_method {
        AuthMethod::Key => {
            let path = config.key_path.as_deref().ok_or_else(|| {
                McpError::authentication_error("key_path is required for auth_method=key", None)
            })?;
            let resolved = expand_tilde(path);
            if !resolved.is_file() {
                return Err(McpError::authentication_error(
                    format!("key file not found: {}", resolved.display()),
                    None,
                ));
            }
            warn_on_loose_permissions(&resolved);
            load_key_pair(&resolved, None).map(|_| ())
        }
        AuthMethod::Password => {
            if config.password.as_deref().unwrap_or_default().is_empty() {
                return Err(McpError::authentication_error(
                    "password is required for auth_method=password",
                    None,
                ));
            }
            Ok(())
        }
        AuthMethod::Agent => {
            let sock = std::env::var("SSH_AUTH_SOCK").map_err(|_| {
                McpError::authentication_error("SSH agent not available (SSH_AUTH_SOCK unset)", None)
            })?;
            if !Path::new(&sock).exists() {
                return Err(McpError::authentication_error(
                    "SSH agent not available (socket missing)",
                    None,
                ));
            }
            Ok(())
        }
    }
}

fn expand_tilde(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return std::path::PathBuf::from(home).join(rest);
        }
    }
    std::path::PathBuf::from(path)
}

#[cfg(unix)]
fn warn_on_loose_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o077 != 0 {
            tracing::warn!(path = %path.display(), mode = format!("{mode:o}"), "key file permissions grant group/other access");
        }
    }
}

#[cfg(not(unix))]
fn warn_on_loose_permissions(_path: &Path) {}

/// Attempt RSA, then DSA, then ECDSA, then Ed25519 in that order, succeeding
/// on the first successful parse.
fn load_key_pair(
    path: &Path,
    passphrase: Option<&str>,
) -> Result<russh_keys::key::KeyPair, McpError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        McpError::authentication_error(format!("failed to read key file: {e}"), None)
    })?;

    match russh_keys::decode_secret_key(&raw, passphrase) {
        Ok(key) => Ok(key),
        Err(e) => {
            let msg = e.to_string();
            if msg.to_lowercase().contains("passphrase") {
                Err(McpError::authentication_error(
                    "key is encrypted; passphrase not supported",
                    None,
                ))
            } else {
                Err(McpError::authentication_error(
                    format!("failed to decode key (tried RSA/DSA/ECDSA/Ed25519): {e}"),
                    None,
                ))
            }
        }
    }
}

/// Perform the authentication handshake against an already-connected
/// transport handle, branching on `auth_method`. Any transport-level failure
/// (not just auth rejection) is wrapped as `AuthenticationError` carrying the
/// raw text in `data.details`.
pub async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    config: &SessionConfig,
) -> Result<(), McpError> {
    match config.auth_method {
        AuthMethod::Key => {
            let path = expand_tilde(config.key_path.as_deref().unwrap_or_default());
            let key_pair = load_key_pair(&path, None)?;
            let ok = handle
                .authenticate_publickey(&config.username, Arc::new(key_pair))
                .await
                .map_err(|e| auth_wrap("public key", e))?;
            if !ok {
                return Err(McpError::authentication_error(
                    "SSH public key authentication rejected",
                    None,
                ));
            }
        }
        AuthMethod::Password => {
            let password = config.password.as_deref().unwrap_or_default();
            let ok = handle
                .authenticate_password(&config.username, password)
                .await
                .map_err(|e| auth_wrap("password", e))?;
            if !ok {
                return Err(McpError::authentication_error(
                    "SSH password authentication rejected",
                    None,
                ));
            }
        }
        AuthMethod::Agent => {
            let ok = authenticate_with_agent(handle, &config.username).await?;
            if !ok {
                return Err(McpError::authentication_error(
                    "SSH agent rejected all identities",
                    None,
                ));
            }
        }
    }
    Ok(())
}

/// Connects to the agent at `SSH_AUTH_SOCK`, enumerates its identities, and
/// tries each in turn as a signer until one is accepted.
async fn authenticate_with_agent(
    handle: &mut Handle<ClientHandler>,
    username: &str,
) -> Result<bool, McpError> {
    let socket_path = std::env::var("SSH_AUTH_SOCK").map_err(|_| {
        McpError::authentication_error("SSH agent not available (SSH_AUTH_SOCK unset)", None)
    })?;

    let mut agent = russh_keys::agent::client::AgentClient::connect_uds(&socket_path)
        .await
        .map_err(|e| {
            McpError::authentication_error(
                "SSH agent not available (connect failed)",
                Some(serde_json::json!({"details": e.to_string()})),
            )
        })?;

    let identities = agent.request_identities().await.map_err(|e| {
        McpError::authentication_error(
            "SSH agent not available (no identities)",
            Some(serde_json::json!({"details": e.to_string()})),
        )
    })?;
    if identities.is_empty() {
        return Err(McpError::authentication_error(
            "SSH agent not available (agent holds no keys)",
            None,
        ));
    }

    for identity in identities {
        let (returned_agent, result) = handle.authenticate_future(username, identity, agent).await;
        agent = returned_agent;
        match result {
            Ok(true) => return Ok(true),
            Ok(false) => continue,
            Err(_) => continue,
        }
    }
    Ok(false)
}

fn auth_wrap(method: &str, e: russh::Error) -> McpError {
    McpError::authentication_error(
        format!("SSH {method} authentication failed"),
        Some(serde_json::json!({"details": e.to_string()})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshmux_types::SessionConfig;

    fn base_config() -> SessionConfig {
        SessionConfig {
            hostname: "example.com".into(),
            port: 22,
            username: "deploy".into(),
            timeout_secs: 30,
            auth_method: AuthMethod::Password,
            key_path: None,
            password: None,
        }
    }

    #[test]
    fn password_auth_requires_non_empty_password() {
        let config = base_config();
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.kind, sshmux_errors::ErrorKind::AuthenticationError);
    }

    #[test]
    fn key_auth_requires_existing_file() {
        let mut config = base_config();
        config.auth_method = AuthMethod::Key;
        config.key_path = Some("/no/such/key".into());
        let err = validate_config(&config).unwrap_err();
        assert!(err.message.contains("not found"));
    }

    #[test]
    fn agent_auth_requires_ssh_auth_sock() {
        std::env::remove_var("SSH_AUTH_SOCK");
        let mut config = base_config();
        config.auth_method = AuthMethod::Agent;
        let err = validate_config(&config).unwrap_err();
        assert!(err.message.contains("agent"));
    }
}
