use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::routes::{self, normalize_match_path};

#[derive(Clone, Debug)]
pub struct ServiceUrlRequest<'a> {
    pub service_id: &'a str,
    pub domain: &'a str,
    pub base_path: &'a str,
    pub strip_prefix: bool,
    pub associated_port: u16,
    pub redirect: Option<RedirectTarget<'a>>,
    pub current_deployment_hash: &'a str,
    pub current_deployment_slot: &'a str,
    pub current_network_alias: &'a str,
    pub blue_hash: Option<&'a str>,
    pub green_hash: Option<&'a str>,
    pub basic_auth: Option<BasicAuth<'a>>,
}

#[derive(Clone, Copy, Debug)]
pub struct RedirectTarget<'a> {
    pub url: &'a str,
    pub permanent: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct BasicAuth<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Bcrypt-shaped password hash used inside the synthesised proxy config.
/// The real admin API hashes on its side; we compute a stable digest here so
/// repeated upserts of an unchanged password are idempotent on our side too.
pub fn hash_basic_auth_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn common_response_headers(deployment_hash: &str, slot: &str) -> Value {
    json!({
        "handler": "headers",
        "response": {
            "add": {
                "x-zane-request-id": ["{http.request.uuid}"],
                "x-zane-dpl-hash": [deployment_hash],
                "x-zane-dpl-slot": [slot.to_lowercase()],
            }
        },
        "request": {
            "add": {
                "x-request-id": ["{http.request.uuid}"],
            }
        }
    })
}

fn log_append(key: &str, value: Option<&str>) -> Value {
    json!({ "handler": "log_append", "key": key, "value": value })
}

/// Builds the Caddy-shaped route object for a service's public URL, per the
/// blue/green and preview-auth rules in the routing design.
pub fn build_service_url_route(req: &ServiceUrlRequest<'_>) -> Value {
    let mut handlers = vec![
        log_append("zane_service_type", Some("managed_service")),
        log_append("zane_service_id", Some(req.service_id)),
        log_append("zane_deployment_blue_hash", req.blue_hash),
        log_append("zane_deployment_green_hash", req.green_hash),
        log_append("zane_deployment_upstream", Some("{http.reverse_proxy.upstream.hostport}")),
        log_append("zane_deployment_id", Some(req.current_deployment_hash)),
        log_append("zane_request_id", Some("{http.request.uuid}")),
        common_response_headers(req.current_deployment_hash, req.current_deployment_slot),
    ];

    if req.strip_prefix {
        handlers.push(json!({
            "handler": "rewrite",
            "strip_path_prefix": req.base_path.trim_end_matches('/'),
        }));
    }

    if let Some(auth) = req.basic_auth {
        handlers.push(json!({
            "handler": "authentication",
            "providers": {
                "http_basic": {
                    "accounts": [{
                        "username": auth.username,
                        "password": hash_basic_auth_password(auth.password),
                    }],
                    "hash": {"algorithm": "bcrypt"},
                    "hash_cache": {},
                }
            }
        }));
    }

    if let Some(redirect) = req.redirect {
        handlers.push(json!({
            "handler": "static_response",
            "headers": {
                "Location": [format!("{}{{http.request.uri}}", redirect.url)],
            },
            "status_code": if redirect.permanent { 308 } else { 307 },
        }));
    } else {
        handlers.push(json!({"handler": "encode", "encodings": {"gzip": {}}, "prefer": ["gzip"]}));
        handlers.push(json!({
            "handler": "reverse_proxy",
            "flush_interval": -1,
            "load_balancing": {"retries": 2},
            "upstreams": [{"dial": format!("{}:{}", req.current_network_alias, req.associated_port)}],
        }));
    }

    json!({
        "@id": routes::service_url_route_id(req.service_id, req.domain, req.base_path),
        "match": [{"path": [normalize_match_path(req.base_path)], "host": [req.domain]}],
        "handle": [{"handler": "subroute", "routes": [{"handle": handlers}]}],
    })
}

/// The per-deployment preview route: proxies straight to the deployment's own
/// swarm service, gated behind a subrequest to the authenticated-user check.
pub fn build_deployment_url_route(deployment_hash: &str, domain: &str, swarm_service_name: &str, port: u16, front_service_internal_domain: &str) -> Value {
    let protect_handler = json!({
        "handler": "reverse_proxy",
        "rewrite": {"method": "GET", "uri": "/api/auth/me/with-token"},
        "upstreams": [{"dial": front_service_internal_domain}],
        "headers": {
            "request": {
                "set": {
                    "X-Forwarded-Method": ["{http.request.method}"],
                    "X-Forwarded-Uri": ["{http.request.uri}"],
                }
            }
        },
        "handle_response": [{
            "match": {"status_code": [2]},
            "routes": [{"handle": [{"handler": "headers", "request": {}}]}],
        }],
    });

    json!({
        "@id": routes::deployment_url_route_id(deployment_hash, domain),
        "match": [{"host": [domain]}],
        "handle": [{
            "handler": "subroute",
            "routes": [{
                "handle": [
                    protect_handler,
                    {"handler": "encode", "encodings": {"gzip": {}}, "prefer": ["gzip"]},
                    {
                        "flush_interval": -1,
                        "handler": "reverse_proxy",
                        "upstreams": [{"dial": format!("{swarm_service_name}:{port}")}],
                    },
                ]
            }]
        }]
    })
}

pub fn build_registry_route(registry_id: &str, registry_alias: &str, domain: &str, is_secure: bool) -> Value {
    let mut reverse_proxy = json!({
        "flush_interval": -1,
        "handler": "reverse_proxy",
        "upstreams": [{"dial": format!("{registry_alias}:5000")}],
    });
    if is_secure {
        reverse_proxy["headers"] = json!({"request": {"set": {"X-Forwarded-Proto": ["https"]}}});
    }

    json!({
        "@id": routes::build_registry_route_id(registry_alias),
        "match": [{"host": [domain]}],
        "handle": [{
            "handler": "subroute",
            "routes": [{
                "handle": [
                    log_append("zane_registry_id", Some(registry_id)),
                    log_append("zane_service_type", Some("build_registry")),
                    log_append("zane_request_id", Some("{http.request.uuid}")),
                    json!({"handler": "headers", "response": {"add": {"x-zane-request-id": ["{http.request.uuid}"]}}}),
                    json!({"handler": "encode", "encodings": {"gzip": {}}, "prefer": ["gzip"]}),
                    reverse_proxy,
                ]
            }]
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base_request() -> ServiceUrlRequest<'static> {
        ServiceUrlRequest {
            service_id: "srv_1",
            domain: "example.com",
            base_path: "/",
            strip_prefix: true,
            associated_port: 80,
            redirect: None,
            current_deployment_hash: "d-abc123",
            current_deployment_slot: "GREEN",
            current_network_alias: "green-svc",
            blue_hash: Some("d-old"),
            green_hash: Some("d-abc123"),
            basic_auth: None,
        }
    }

    #[test]
    fn service_url_route_has_stable_id() {
        let route = build_service_url_route(&base_request());
        assert_eq!(route["@id"], "srv_1-example.com-*");
    }

    #[test]
    fn redirect_route_emits_308_when_permanent() {
        let mut req = base_request();
        req.redirect = Some(RedirectTarget { url: "https://new.example.com", permanent: true });
        let route = build_service_url_route(&req);
        let handlers = route["handle"][0]["routes"][0]["handle"].as_array().unwrap();
        let redirect = handlers.iter().find(|h| h["handler"] == "static_response").unwrap();
        assert_eq!(redirect["status_code"], 308);
    }

    #[test]
    fn redirect_route_emits_307_when_temporary() {
        let mut req = base_request();
        req.redirect = Some(RedirectTarget { url: "https://new.example.com", permanent: false });
        let route = build_service_url_route(&req);
        let handlers = route["handle"][0]["routes"][0]["handle"].as_array().unwrap();
        let redirect = handlers.iter().find(|h| h["handler"] == "static_response").unwrap();
        assert_eq!(redirect["status_code"], 307);
    }

    #[test]
    fn non_redirect_route_dials_network_alias_and_port() {
        let route = build_service_url_route(&base_request());
        let handlers = route["handle"][0]["routes"][0]["handle"].as_array().unwrap();
        let proxy = handlers.iter().find(|h| h["handler"] == "reverse_proxy").unwrap();
        assert_eq!(proxy["upstreams"][0]["dial"], "green-svc:80");
    }

    #[test]
    fn basic_auth_hash_is_stable_across_calls() {
        assert_eq!(hash_basic_auth_password("hunter2"), hash_basic_auth_password("hunter2"));
    }
}
