//! Connection settings: kubeconfig, in-cluster service account, or explicit
//! `--server` / `--token`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Where and how to reach the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Base URL, without a trailing slash.
    pub server: String,
    pub token: Option<String>,
}

impl Connection {
    pub fn new(server: &str, token: Option<String>) -> Self {
        Self {
            server: server.trim_end_matches('/').to_string(),
            token,
        }
    }
}

// ---------------------------------------------------------------------------
// kubeconfig document
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    server: String,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "tokenFile", default)]
    token_file: Option<PathBuf>,
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-certificate", default)]
    client_certificate: Option<String>,
}

/// Resolve the current context of a kubeconfig document.
pub fn from_kubeconfig(text: &str) -> Result<Connection> {
    let config: Kubeconfig = serde_yaml::from_str(text).context("malformed kubeconfig")?;

    let context_name = config
        .current_context
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("kubeconfig has no current-context"))?;
    let context = config
        .contexts
        .iter()
        .find(|c| c.name == context_name)
        .with_context(|| format!("context '{context_name}' not found in kubeconfig"))?;
    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == context.context.cluster)
        .with_context(|| format!("cluster '{}' not found in kubeconfig", context.context.cluster))?;

    let user = context
        .context
        .user
        .as_deref()
        .and_then(|name| config.users.iter().find(|u| u.name == name));
    let token = match user {
        Some(NamedUser { user, name }) => {
            if user.client_certificate_data.is_some() || user.client_certificate.is_some() {
                warn!(user = %name, "client certificate auth is not supported; use a token or `kubectl proxy`");
            }
            match (&user.token, &user.token_file) {
                (Some(token), _) => Some(token.clone()),
                (None, Some(path)) => Some(read_token(path)?),
                (None, None) => None,
            }
        }
        None => None,
    };

    Ok(Connection::new(&cluster.cluster.server, token))
}

pub fn from_kubeconfig_file(path: &Path) -> Result<Connection> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
    from_kubeconfig(&text).with_context(|| format!("in {}", path.display()))
}

/// Service-account configuration available inside a pod.
pub fn in_cluster() -> Result<Connection> {
    let host = env::var("KUBERNETES_SERVICE_HOST").context("KUBERNETES_SERVICE_HOST is not set")?;
    let port = env::var("KUBERNETES_SERVICE_PORT").context("KUBERNETES_SERVICE_PORT is not set")?;
    let token = read_token(Path::new(SERVICE_ACCOUNT_TOKEN))?;
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host
    };
    Ok(Connection::new(&format!("https://{host}:{port}"), Some(token)))
}

fn read_token(path: &Path) -> Result<String> {
    let token = fs::read_to_string(path)
        .with_context(|| format!("failed to read token file {}", path.display()))?;
    Ok(token.trim().to_string())
}

pub fn default_kubeconfig_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".kube").join("config"))
}

/// Resolve connection settings.
///
/// An explicit `--server` wins. An explicit kubeconfig path must load. The
/// default kubeconfig falls back to in-cluster config when it cannot be
/// loaded.
pub fn resolve(
    server: Option<&str>,
    token: Option<String>,
    kubeconfig: Option<&Path>,
) -> Result<Connection> {
    if let Some(server) = server {
        return Ok(Connection::new(server, token));
    }

    let mut connection = match kubeconfig {
        Some(path) => from_kubeconfig_file(path)?,
        None => {
            let default = default_kubeconfig_path();
            match default.as_deref().map(from_kubeconfig_file) {
                Some(Ok(connection)) => connection,
                Some(Err(err)) => {
                    info!(error = %format!("{err:#}"), "default kubeconfig unusable; trying in-cluster config");
                    in_cluster().context("no usable kubeconfig and not running in a cluster")?
                }
                None => in_cluster().context("no home directory and not running in a cluster")?,
            }
        }
    };

    if token.is_some() {
        connection.token = token;
    }
    if connection.server.is_empty() {
        bail!("resolved API server address is empty");
    }
    Ok(connection)
}
