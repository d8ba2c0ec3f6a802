use zane_common::model::HealthcheckKind;
use zane_common::model::ServiceSpec;
use zane_common::{Error, ErrorKind, ServiceId};

use crate::persistence::Persistence;

/// Domains the platform itself answers on; services cannot claim them.
const RESERVED_DOMAIN_SUFFIXES: &[&str] = &[".zane.internal", ".zane-admin.internal"];

/// In-spec invariants that don't need a database round trip: duplicate
/// container paths, the http-path-healthcheck-needs-a-target rule, and
/// same-service URL collisions.
pub fn validate_spec_invariants(spec: &ServiceSpec) -> crate::error::Result<()> {
    let mut seen_paths = std::collections::HashSet::new();
    for volume in &spec.volumes {
        if !seen_paths.insert(volume.container_path.as_str()) {
            return Err(invalid(format!("duplicate volume container path: {}", volume.container_path)).into());
        }
    }

    let mut seen_host_ports = std::collections::HashSet::new();
    for port in &spec.ports {
        if let Some(host_port) = port.host_port {
            if !seen_host_ports.insert(host_port) {
                return Err(invalid(format!("duplicate host port: {host_port}")).into());
            }
        }
    }

    let mut seen_routes = std::collections::HashSet::new();
    for url in &spec.urls {
        if !seen_routes.insert(url.identity_key()) {
            return Err(invalid(format!("duplicate url route: {}{}", url.domain, url.base_path)).into());
        }
        if is_reserved_domain(&url.domain) {
            return Err(invalid(format!("domain {} is reserved", url.domain)).into());
        }
    }

    if let Some(healthcheck) = &spec.healthcheck {
        if healthcheck.kind == HealthcheckKind::HttpPath && !spec.requires_http_healthcheck_target() {
            return Err(invalid("http_path healthcheck requires a URL or a forwarded HTTP port").into());
        }
    }

    Ok(())
}

pub fn is_reserved_domain(domain: &str) -> bool {
    RESERVED_DOMAIN_SUFFIXES.iter().any(|suffix| domain.ends_with(suffix))
}

/// A wildcard domain (`*.example.com`) may not overlap a concrete domain
/// already claimed by another service under the same parent (`foo.example.com`),
/// and vice versa.
pub fn domains_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (wildcard, concrete) = if a.starts_with("*.") {
        (a, b)
    } else if b.starts_with("*.") {
        (b, a)
    } else {
        return false;
    };
    let suffix = &wildcard[1..];
    concrete.ends_with(suffix) && concrete != suffix
}

/// Checks the cross-service invariants that need the persistence layer:
/// `(domain, base_path)` global uniqueness, host port global uniqueness,
/// and wildcard/subdomain overlap against every other service's routes.
pub async fn validate_against_other_services(persistence: &Persistence, service_id: ServiceId, spec: &ServiceSpec) -> crate::error::Result<()> {
    for url in &spec.urls {
        let (domain, base_path) = url.identity_key();
        if persistence.url_identity_taken(&domain, &base_path, service_id).await? {
            return Err(invalid(format!("url route {domain}{base_path} already claimed by another service")).into());
        }
        if persistence.wildcard_domain_overlap_exists(&domain, service_id).await? {
            return Err(invalid(format!("domain {domain} overlaps an existing subdomain on another service")).into());
        }
    }
    for port in &spec.ports {
        if let Some(host_port) = port.host_port {
            if persistence.host_port_taken(host_port, service_id).await? {
                return Err(invalid(format!("host port {host_port} already bound by another service")).into());
            }
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::custom(ErrorKind::InvalidChange, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_overlaps_its_subdomain() {
        assert!(domains_overlap("*.example.com", "foo.example.com"));
    }

    #[test]
    fn wildcard_does_not_overlap_unrelated_domain() {
        assert!(!domains_overlap("*.example.com", "foo.other.com"));
    }

    #[test]
    fn identical_domains_overlap() {
        assert!(domains_overlap("foo.example.com", "foo.example.com"));
    }

    #[test]
    fn reserved_suffix_is_rejected() {
        assert!(is_reserved_domain("preview.zane.internal"));
        assert!(!is_reserved_domain("preview.example.com"));
    }
}
