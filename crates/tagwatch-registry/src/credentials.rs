//! Credential sources and their resolution.
//!
//! A credential specification names where a `username:password` pair comes
//! from: a Kubernetes secret field, an image pull secret, an environment
//! variable, or an external helper script. Kubernetes access goes through
//! the [`SecretStore`] trait so the engine itself never talks to a cluster.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::error::{RegistryError, Result};

/// A resolved username/password pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    pub username: String,

    /// Password or token.
    pub password: String,
}

impl Credentials {
    /// Parses a `username:password` string.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CredentialResolution`] when the separator is
    /// missing.
    pub fn parse(raw: &str, source_kind: &str) -> Result<Self> {
        let (username, password) =
            raw.trim_end_matches(['\r', '\n'])
                .split_once(':')
                .ok_or_else(|| RegistryError::CredentialResolution {
                    source_kind: source_kind.to_string(),
                    reason: "expected 'username:password'".to_string(),
                })?;
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Renders the `Basic` authorization header value.
    #[must_use]
    pub fn basic_auth(&self) -> String {
        let encoded = BASE64.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {encoded}")
    }
}

/// Where an endpoint's credentials come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CredentialSource {
    /// No credentials; the registry is accessed anonymously.
    #[default]
    Anonymous,

    /// An environment variable holding `username:password`.
    Env {
        /// Variable name.
        variable: String,
    },

    /// A field of a Kubernetes secret.
    Secret {
        /// Secret namespace.
        namespace: String,
        /// Secret name.
        name: String,
        /// Field within the secret holding `username:password`.
        field: String,
    },

    /// A Kubernetes image pull secret (`.dockerconfigjson`).
    PullSecret {
        /// Secret namespace.
        namespace: String,
        /// Secret name.
        name: String,
    },

    /// An external helper script printing `username:password` on stdout.
    External {
        /// Absolute path to the executable.
        path: PathBuf,
    },
}

impl CredentialSource {
    /// Parses a credential specification.
    ///
    /// Grammar: `secret:namespace/name#field`, `pullsecret:namespace/name`,
    /// `env:VARNAME`, `ext:/absolute/path`. An empty specification means
    /// anonymous access.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidCredentialSource`] for malformed
    /// specifications.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |reason: &str| RegistryError::InvalidCredentialSource {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        if spec.is_empty() {
            return Ok(Self::Anonymous);
        }

        if let Some(variable) = spec.strip_prefix("env:") {
            if variable.is_empty() {
                return Err(invalid("missing variable name"));
            }
            return Ok(Self::Env {
                variable: variable.to_string(),
            });
        }

        if let Some(rest) = spec.strip_prefix("secret:") {
            let (location, field) = rest.split_once('#').ok_or_else(|| {
                invalid("expected 'namespace/name#field'")
            })?;
            let (namespace, name) = location
                .split_once('/')
                .ok_or_else(|| invalid("expected 'namespace/name#field'"))?;
            if namespace.is_empty() || name.is_empty() || field.is_empty() {
                return Err(invalid("expected 'namespace/name#field'"));
            }
            return Ok(Self::Secret {
                namespace: namespace.to_string(),
                name: name.to_string(),
                field: field.to_string(),
            });
        }

        if let Some(rest) = spec.strip_prefix("pullsecret:") {
            let (namespace, name) = rest
                .split_once('/')
                .ok_or_else(|| invalid("expected 'namespace/name'"))?;
            if namespace.is_empty() || name.is_empty() {
                return Err(invalid("expected 'namespace/name'"));
            }
            return Ok(Self::PullSecret {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        if let Some(path) = spec.strip_prefix("ext:") {
            let path = PathBuf::from(path);
            if !path.is_absolute() {
                return Err(invalid("script path must be absolute"));
            }
            return Ok(Self::External { path });
        }

        Err(invalid(
            "unknown scheme, expected secret:, pullsecret:, env: or ext:",
        ))
    }

    /// Returns true if this source yields no credentials.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Resolves the source into credentials.
    ///
    /// `api_host` selects the matching auth entry when the source is a pull
    /// secret holding credentials for several registries.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CredentialResolution`] when the source
    /// cannot be read or its contents are malformed.
    pub async fn resolve(
        &self,
        store: &dyn SecretStore,
        api_host: &str,
    ) -> Result<Option<Credentials>> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Env { variable } => {
                let raw = std::env::var(variable).map_err(|e| {
                    RegistryError::CredentialResolution {
                        source_kind: format!("environment variable '{variable}'"),
                        reason: e.to_string(),
                    }
                })?;
                Credentials::parse(&raw, "environment variable").map(Some)
            }
            Self::Secret {
                namespace,
                name,
                field,
            } => {
                let raw = store.get_secret_field(namespace, name, field).await?;
                Credentials::parse(&raw, "secret").map(Some)
            }
            Self::PullSecret { namespace, name } => {
                let raw = store
                    .get_secret_field(namespace, name, ".dockerconfigjson")
                    .await?;
                parse_docker_config(&raw, api_host).map(Some)
            }
            Self::External { path } => run_credential_script(path).await.map(Some),
        }
    }
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Env { variable } => write!(f, "env:{variable}"),
            Self::Secret {
                namespace,
                name,
                field,
            } => write!(f, "secret:{namespace}/{name}#{field}"),
            Self::PullSecret { namespace, name } => write!(f, "pullsecret:{namespace}/{name}"),
            Self::External { path } => write!(f, "ext:{}", path.display()),
        }
    }
}

/// Read access to Kubernetes secrets, provided by the embedding process.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the value of one field of a secret.
    async fn get_secret_field(&self, namespace: &str, name: &str, field: &str) -> Result<String>;
}

/// In-memory secret store for tests and non-cluster use.
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    secrets: RwLock<HashMap<(String, String, String), String>>,
}

impl StaticSecretStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a secret field value.
    pub fn insert(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.secrets.write().insert(
            (namespace.into(), name.into(), field.into()),
            value.into(),
        );
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret_field(&self, namespace: &str, name: &str, field: &str) -> Result<String> {
        self.secrets
            .read()
            .get(&(
                namespace.to_string(),
                name.to_string(),
                field.to_string(),
            ))
            .cloned()
            .ok_or_else(|| RegistryError::CredentialResolution {
                source_kind: format!("secret '{namespace}/{name}'"),
                reason: format!("field '{field}' not found"),
            })
    }
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Selects and decodes the auth entry of a `.dockerconfigjson` payload that
/// matches the endpoint host, with or without scheme.
fn parse_docker_config(raw: &str, api_host: &str) -> Result<Credentials> {
    let failed = |reason: String| RegistryError::CredentialResolution {
        source_kind: "pull secret".to_string(),
        reason,
    };

    let config: DockerConfig =
        serde_json::from_str(raw).map_err(|e| failed(format!("invalid dockerconfigjson: {e}")))?;

    let entry = config
        .auths
        .iter()
        .find(|(key, _)| {
            let stripped = key
                .strip_prefix("https://")
                .or_else(|| key.strip_prefix("http://"))
                .unwrap_or(key)
                .trim_end_matches('/');
            stripped == api_host
        })
        .map(|(_, entry)| entry)
        .ok_or_else(|| failed(format!("no auth entry for host '{api_host}'")))?;

    if let Some(auth) = &entry.auth {
        let decoded = BASE64
            .decode(auth)
            .map_err(|e| failed(format!("invalid auth encoding: {e}")))?;
        let decoded =
            String::from_utf8(decoded).map_err(|e| failed(format!("invalid auth encoding: {e}")))?;
        return Credentials::parse(&decoded, "pull secret");
    }

    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => Ok(Credentials {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => Err(failed("auth entry has neither auth nor username/password".to_string())),
    }
}

/// Runs an external credential helper and parses its stdout.
async fn run_credential_script(path: &std::path::Path) -> Result<Credentials> {
    let failed = |reason: String| RegistryError::CredentialResolution {
        source_kind: format!("script '{}'", path.display()),
        reason,
    };

    let output = tokio::process::Command::new(path)
        .output()
        .await
        .map_err(|e| failed(e.to_string()))?;

    if !output.status.success() {
        return Err(failed(format!("exited with {}", output.status)));
    }

    let stdout =
        String::from_utf8(output.stdout).map_err(|e| failed(format!("invalid output: {e}")))?;
    Credentials::parse(stdout.trim(), "script")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grammar() {
        assert_eq!(CredentialSource::parse("").unwrap(), CredentialSource::Anonymous);
        assert_eq!(
            CredentialSource::parse("env:REGISTRY_CREDS").unwrap(),
            CredentialSource::Env {
                variable: "REGISTRY_CREDS".to_string()
            }
        );
        assert_eq!(
            CredentialSource::parse("secret:tools/registry#creds").unwrap(),
            CredentialSource::Secret {
                namespace: "tools".to_string(),
                name: "registry".to_string(),
                field: "creds".to_string()
            }
        );
        assert_eq!(
            CredentialSource::parse("pullsecret:tools/pull").unwrap(),
            CredentialSource::PullSecret {
                namespace: "tools".to_string(),
                name: "pull".to_string()
            }
        );
        assert_eq!(
            CredentialSource::parse("ext:/usr/local/bin/creds.sh").unwrap(),
            CredentialSource::External {
                path: PathBuf::from("/usr/local/bin/creds.sh")
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed_specs() {
        assert!(CredentialSource::parse("secret:tools/registry").is_err());
        assert!(CredentialSource::parse("secret:registry#creds").is_err());
        assert!(CredentialSource::parse("pullsecret:pull").is_err());
        assert!(CredentialSource::parse("ext:relative/path.sh").is_err());
        assert!(CredentialSource::parse("env:").is_err());
        assert!(CredentialSource::parse("vault:tools/registry").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for spec in [
            "env:REGISTRY_CREDS",
            "secret:tools/registry#creds",
            "pullsecret:tools/pull",
            "ext:/usr/local/bin/creds.sh",
        ] {
            assert_eq!(CredentialSource::parse(spec).unwrap().to_string(), spec);
        }
    }

    #[test]
    fn test_credentials_parse() {
        let creds = Credentials::parse("user:pa:ss\n", "test").unwrap();
        assert_eq!(creds.username, "user");
        assert_eq!(creds.password, "pa:ss");
        assert!(Credentials::parse("no-separator", "test").is_err());
    }

    #[test]
    fn test_basic_auth_header() {
        let creds = Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        assert_eq!(creds.basic_auth(), format!("Basic {}", BASE64.encode("user:pass")));
    }

    #[tokio::test]
    async fn test_resolve_secret() {
        let store = StaticSecretStore::new();
        store.insert("tools", "registry", "creds", "user:pass");

        let source = CredentialSource::parse("secret:tools/registry#creds").unwrap();
        let creds = source
            .resolve(&store, "registry.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.username, "user");
    }

    #[tokio::test]
    async fn test_resolve_missing_secret_is_error() {
        let store = StaticSecretStore::new();
        let source = CredentialSource::parse("secret:tools/registry#creds").unwrap();
        assert!(source.resolve(&store, "registry.example.com").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_env() {
        std::env::set_var("TAGWATCH_TEST_CREDS", "envuser:envpass");
        let store = StaticSecretStore::new();

        let source = CredentialSource::parse("env:TAGWATCH_TEST_CREDS").unwrap();
        let creds = source
            .resolve(&store, "registry.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.username, "envuser");
        std::env::remove_var("TAGWATCH_TEST_CREDS");
    }

    #[tokio::test]
    async fn test_resolve_pull_secret_matches_host() {
        let config = serde_json::json!({
            "auths": {
                "https://registry.example.com": { "auth": BASE64.encode("pulluser:pullpass") },
                "other.example.com": { "auth": BASE64.encode("other:creds") }
            }
        });
        let store = StaticSecretStore::new();
        store.insert("tools", "pull", ".dockerconfigjson", config.to_string());

        let source = CredentialSource::parse("pullsecret:tools/pull").unwrap();
        let creds = source
            .resolve(&store, "registry.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.username, "pulluser");
        assert_eq!(creds.password, "pullpass");
    }

    #[tokio::test]
    async fn test_resolve_pull_secret_unknown_host_is_error() {
        let config = serde_json::json!({
            "auths": { "other.example.com": { "auth": BASE64.encode("a:b") } }
        });
        let store = StaticSecretStore::new();
        store.insert("tools", "pull", ".dockerconfigjson", config.to_string());

        let source = CredentialSource::parse("pullsecret:tools/pull").unwrap();
        assert!(source.resolve(&store, "registry.example.com").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_external_script() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("creds.sh");
        {
            let mut script = std::fs::File::create(&script_path).unwrap();
            writeln!(script, "#!/bin/sh").unwrap();
            writeln!(script, "echo scriptuser:scriptpass").unwrap();
        }
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let store = StaticSecretStore::new();
        let source = CredentialSource::External {
            path: script_path.clone(),
        };
        let creds = source
            .resolve(&store, "registry.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.username, "scriptuser");
        assert_eq!(creds.password, "scriptpass");
    }
}
