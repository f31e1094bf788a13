//! レジストリ認証処理
//!
//! Docker の config.json から認証情報を取得し、bollard の DockerCredentials に変換します。

use crate::error::{BuildError, BuildResult};
use base64::Engine;
use bollard::auth::DockerCredentials;
use dockyard_core::Tag;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Docker Hub のレジストリ名
pub const DOCKER_HUB: &str = "docker.io";

/// config.json で Docker Hub を表すキー
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// 既定の credential helper（例: "osxkeychain", "desktop"）
    #[serde(default)]
    creds_store: Option<String>,
    /// レジストリごとの credential helper
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64 エンコードされた "username:password"
    auth: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// タグのプッシュ先レジストリ
///
/// レジストリ未設定のタグは Docker Hub に送られる。`:443` は付けない。
pub fn registry_host(tag: &Tag) -> String {
    match tag.registry.as_deref() {
        Some(registry) => registry
            .strip_suffix(":443")
            .unwrap_or(registry)
            .to_string(),
        None => DOCKER_HUB.to_string(),
    }
}

/// レジストリ認証を管理
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    config_path: PathBuf,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAuth {
    /// `$DOCKER_CONFIG/config.json`、なければ `~/.docker/config.json` を使う
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self { config_path }
    }

    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// タグのレジストリに対する認証情報
    ///
    /// * `Ok(Some(credentials))` - 認証情報が見つかった
    /// * `Ok(None)` - 認証情報が無い（匿名でプッシュを試みる）
    /// * `Err(e)` - config.json が壊れている
    pub fn credentials_for(&self, tag: &Tag) -> BuildResult<Option<DockerCredentials>> {
        let registry = registry_host(tag);

        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "Docker config.json not found");
            return Ok(None);
        }

        let config = self.load_docker_config()?;

        let keys: Vec<&str> = if registry == DOCKER_HUB {
            vec![DOCKER_HUB_AUTH_KEY, DOCKER_HUB]
        } else {
            vec![registry.as_str()]
        };

        // 1. auths
        for key in &keys {
            if let Some(entry) = config.auths.get(*key)
                && let Some(auth_b64) = &entry.auth
                && let Some(creds) = self.decode_auth(auth_b64, &registry)?
            {
                tracing::debug!(registry = %registry, "Found credentials in auths");
                return Ok(Some(creds));
            }
        }

        // 2. credHelpers、次に credsStore
        let helper = keys
            .iter()
            .find_map(|key| config.cred_helpers.get(*key))
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            tracing::debug!(registry = %registry, helper = %helper, "Trying credential helper");
            match self.get_from_helper(helper, keys[0], &registry) {
                Ok(Some(creds)) => return Ok(Some(creds)),
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "Credential helper failed"),
            }
        }

        tracing::debug!(registry = %registry, "No credentials found");
        Ok(None)
    }

    fn load_docker_config(&self) -> BuildResult<DockerConfig> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|e| BuildError::AuthFailed {
                registry: self.config_path.display().to_string(),
                message: format!("Failed to read config.json: {}", e),
            })?;

        serde_json::from_str(&content).map_err(|e| BuildError::AuthFailed {
            registry: self.config_path.display().to_string(),
            message: format!("Failed to parse config.json: {}", e),
        })
    }

    fn decode_auth(
        &self,
        auth_b64: &str,
        registry: &str,
    ) -> BuildResult<Option<DockerCredentials>> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth_b64)
            .map_err(|e| BuildError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Failed to decode auth: {}", e),
            })?;

        let auth_str = String::from_utf8(decoded).map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Invalid UTF-8 in auth: {}", e),
        })?;

        Ok(auth_str
            .split_once(':')
            .map(|(username, password)| DockerCredentials {
                username: Some(username.to_string()),
                password: Some(password.to_string()),
                serveraddress: Some(registry.to_string()),
                ..Default::default()
            }))
    }

    /// `docker-credential-<helper> get` を呼び出す
    fn get_from_helper(
        &self,
        helper: &str,
        server: &str,
        registry: &str,
    ) -> BuildResult<Option<DockerCredentials>> {
        let helper_cmd = format!("docker-credential-{}", helper);

        let mut child = Command::new(&helper_cmd)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BuildError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Failed to run {}: {}", helper_cmd, e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(server.as_bytes()).ok();
        }

        let output = child
            .wait_with_output()
            .map_err(|e| BuildError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Credential helper failed: {}", e),
            })?;

        if !output.status.success() {
            tracing::debug!(
                registry = %registry,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Credential helper has no credentials"
            );
            return Ok(None);
        }

        let response: CredentialResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| BuildError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Failed to parse credential helper response: {}", e),
            })?;

        Ok(Some(DockerCredentials {
            username: Some(response.username),
            password: Some(response.secret),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        }))
    }
}
