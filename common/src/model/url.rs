use serde::{Deserialize, Serialize};

use crate::ids::{ServiceId, UrlId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRoute {
    pub id: UrlId,
    pub service_id: ServiceId,
    pub domain: String,
    pub base_path: String,
    pub strip_prefix: bool,
    pub associated_port: u16,
    pub redirect: Option<RedirectTarget>,
}

impl UrlRoute {
    pub fn is_redirect(&self) -> bool {
        self.redirect.is_some()
    }

    /// The `(domain, base_path)` pair that must be globally unique across services.
    pub fn identity_key(&self) -> (String, String) {
        (self.domain.clone(), normalize_base_path(&self.base_path))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub url: String,
    pub permanent: bool,
}

/// Matches the proxy configurator's normalisation: an empty path collapses to `/`.
pub fn normalize_base_path(base_path: &str) -> String {
    if base_path.is_empty() {
        "/".to_string()
    } else {
        base_path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_path_normalizes_to_root() {
        assert_eq!(normalize_base_path(""), "/");
        assert_eq!(normalize_base_path("/api"), "/api");
    }
}
