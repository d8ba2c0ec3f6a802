pub mod client;
pub mod error;
pub mod handlers;
pub mod routes;

pub use client::ProxyAdminClient;
pub use error::{Error, Result};
pub use handlers::{
    build_deployment_url_route, build_registry_route, build_service_url_route, hash_basic_auth_password, BasicAuth,
    RedirectTarget, ServiceUrlRequest,
};
pub use routes::{
    build_registry_route_id, compose_stack_route_id, deployment_url_route_id, normalize_match_path, service_url_route_id,
    sort_routes, ROUTES_ROOT_ID,
};
