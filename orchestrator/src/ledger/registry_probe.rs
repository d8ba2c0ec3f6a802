use async_trait::async_trait;
use zane_common::model::RegistryCredentials;

/// Best-effort check that a `(image, credentials)` pair is pullable, run
/// before the ledger accepts a change that sets both together. A failing
/// probe maps to `invalid_change` rather than blocking forever on a daemon
/// that may reject the image for unrelated reasons at deploy time.
#[async_trait]
pub trait RegistryProbe: Send + Sync {
    async fn probe(&self, image: &str, credentials: Option<&RegistryCredentials>) -> bool;
}

/// Probes a registry's v2 manifest endpoint with a `HEAD` request, the same
/// check `backend/temporal/activities/registries.py` performs before queuing
/// a build: a 401/403 means the credentials don't authorize pulling `image`.
pub struct HttpRegistryProbe {
    client: reqwest::Client,
}

impl HttpRegistryProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn manifest_url(image: &str) -> String {
        let (registry, repo_and_tag) = match image.split_once('/') {
            Some((host, rest)) if host.contains('.') || host.contains(':') => (host.to_string(), rest.to_string()),
            _ => ("registry-1.docker.io".to_string(), image.to_string()),
        };
        let (repo, tag) = repo_and_tag.split_once(':').unwrap_or((repo_and_tag.as_str(), "latest"));
        format!("https://{registry}/v2/{repo}/manifests/{tag}")
    }
}

impl Default for HttpRegistryProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryProbe for HttpRegistryProbe {
    async fn probe(&self, image: &str, credentials: Option<&RegistryCredentials>) -> bool {
        let url = Self::manifest_url(image);
        let mut request = self.client.head(&url);
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        match request.send().await {
            Ok(response) => response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_url_defaults_to_docker_hub() {
        assert_eq!(
            HttpRegistryProbe::manifest_url("library/nginx:1.25"),
            "https://registry-1.docker.io/v2/library/nginx/manifests/1.25"
        );
    }

    #[test]
    fn manifest_url_honours_custom_registry_host() {
        assert_eq!(
            HttpRegistryProbe::manifest_url("ghcr.io/acme/app:latest"),
            "https://ghcr.io/v2/acme/app/manifests/latest"
        );
    }

    #[test]
    fn manifest_url_defaults_tag_to_latest() {
        assert_eq!(
            HttpRegistryProbe::manifest_url("ghcr.io/acme/app"),
            "https://ghcr.io/v2/acme/app/manifests/latest"
        );
    }
}
