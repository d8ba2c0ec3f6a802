use serde_json::Value;

/// Root id under which the proxy keeps its single ordered route array.
pub const ROUTES_ROOT_ID: &str = "zane-url-root/routes";

fn strip_slashes(path: &str) -> &str {
    path.trim_matches('/')
}

/// `<service_id>-<domain>-<normalised_base_path>`, empty path becomes `*`.
pub fn service_url_route_id(service_id: &str, domain: &str, base_path: &str) -> String {
    let normalized = strip_slashes(base_path).replace('/', "-");
    let normalized = if normalized.is_empty() { "*".to_string() } else { normalized };
    format!("{service_id}-{domain}-{normalized}")
}

/// `<deployment_hash>-<domain>`.
pub fn deployment_url_route_id(deployment_hash: &str, domain: &str) -> String {
    format!("{deployment_hash}-{domain}")
}

/// A build registry route is addressed directly by its alias.
pub fn build_registry_route_id(registry_alias: &str) -> String {
    registry_alias.to_string()
}

/// `<stack_id>-<service_name>-<domain>-<normalised_base_path>`.
pub fn compose_stack_route_id(stack_id: &str, service_name: &str, domain: &str, base_path: &str) -> String {
    let normalized = strip_slashes(base_path).replace('/', "-");
    let normalized = if normalized.is_empty() { "*".to_string() } else { normalized };
    format!("{stack_id}-{service_name}-{domain}-{normalized}")
}

/// Caddy matches path prefixes with a trailing wildcard; `/` becomes `/*`.
pub fn normalize_match_path(base_path: &str) -> String {
    if base_path == "/" {
        return "/*".to_string();
    }
    format!("{}*", strip_slashes(base_path).trim_start_matches('/'))
}

fn route_match_path(route: &Value) -> Option<String> {
    route
        .get("match")?
        .as_array()?
        .first()?
        .get("path")?
        .as_array()?
        .first()?
        .as_str()
        .map(str::to_string)
}

fn route_match_host(route: &Value) -> Option<String> {
    route
        .get("match")?
        .as_array()?
        .first()?
        .get("host")?
        .as_array()?
        .first()?
        .as_str()
        .map(str::to_string)
}

/// `(neg_len, is_wildcard, neg_total_len)`, ordering longer concrete prefixes first.
fn path_specificity(route: &Value) -> (i64, bool, i64) {
    match route_match_path(route) {
        None => (i64::MAX, true, i64::MAX),
        Some(path) => {
            let normalized = path.trim_end_matches('*');
            (-(normalized.len() as i64), path.ends_with('*'), -(path.len() as i64))
        }
    }
}

fn host_specificity(route: &Value) -> String {
    route_match_host(route).unwrap_or_else(|| "~".to_string())
}

/// Pushes the zane-owned catch-alls (api/frontend/404) to the back, in that order.
fn custom_order(route: &Value) -> i32 {
    let id = route.get("@id").and_then(Value::as_str);
    if route.get("match").is_none() {
        3
    } else {
        match id {
            Some("frontend.zaneops.internal") => 2,
            Some("api.zaneops.internal") => 1,
            _ => 0,
        }
    }
}

/// Replicates the upstream reverse proxy's own directive-sorting algorithm so
/// route order is independent of the order they were written in.
pub fn sort_routes(mut routes: Vec<Value>) -> Vec<Value> {
    routes.sort_by(|a, b| {
        path_specificity(a)
            .cmp(&path_specificity(b))
            .then_with(|| host_specificity(a).cmp(&host_specificity(b)))
            .then_with(|| custom_order(a).cmp(&custom_order(b)))
    });
    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn service_url_id_uses_star_for_root_path() {
        assert_eq!(service_url_route_id("srv_1", "example.com", "/"), "srv_1-example.com-*");
    }

    #[test]
    fn service_url_id_dashes_nested_path() {
        assert_eq!(service_url_route_id("srv_1", "example.com", "/api/v1"), "srv_1-example.com-api-v1");
    }

    #[test]
    fn normalize_match_path_root_becomes_wildcard() {
        assert_eq!(normalize_match_path("/"), "/*");
        assert_eq!(normalize_match_path("/api"), "api*");
    }

    #[test]
    fn sort_routes_orders_longer_concrete_paths_first() {
        let routes = vec![
            json!({"@id": "a", "match": [{"path": ["/*"], "host": ["x.com"]}]}),
            json!({"@id": "b", "match": [{"path": ["/api/v1*"], "host": ["x.com"]}]}),
        ];
        let sorted = sort_routes(routes);
        assert_eq!(sorted[0]["@id"], "b");
        assert_eq!(sorted[1]["@id"], "a");
    }

    #[test]
    fn sort_routes_pushes_no_match_catchall_last() {
        let routes = vec![
            json!({"@id": "catchall"}),
            json!({"@id": "b", "match": [{"path": ["/api*"], "host": ["x.com"]}]}),
        ];
        let sorted = sort_routes(routes);
        assert_eq!(sorted.last().unwrap()["@id"], "catchall");
    }

    #[test]
    fn sort_routes_is_idempotent() {
        let routes = vec![
            json!({"@id": "a", "match": [{"path": ["/*"], "host": ["b.com"]}]}),
            json!({"@id": "b", "match": [{"path": ["/api*"], "host": ["a.com"]}]}),
            json!({"@id": "c", "match": [{"path": ["/api*"], "host": ["b.com"]}]}),
        ];
        let once = sort_routes(routes);
        let twice = sort_routes(once.clone());
        assert_eq!(once, twice);
    }
}
