use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::error::{Error, Result};
use crate::routes::{self, sort_routes};

const MAX_ETAG_ATTEMPTS: u32 = 3;

/// Stateless adapter over a remote proxy admin API. Every write reads the
/// current document with its `ETag` first and retries on `412` up to
/// [`MAX_ETAG_ATTEMPTS`] times before surfacing [`Error::EtagConflict`].
pub struct ProxyAdminClient {
    http: Client,
    admin_host: String,
}

impl ProxyAdminClient {
    pub fn new(http: Client, admin_host: impl Into<String>) -> Self {
        Self { http, admin_host: admin_host.into() }
    }

    fn route_uri(&self, route_id: &str) -> String {
        format!("{}/id/{route_id}", self.admin_host)
    }

    fn routes_document_uri(&self) -> String {
        format!("{}/id/{}", self.admin_host, routes::ROUTES_ROOT_ID)
    }

    #[instrument(skip(self))]
    async fn get_route(&self, route_id: &str) -> Result<Option<(Value, Option<String>)>> {
        let response = self.http.get(self.route_uri(route_id)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let etag = response.headers().get("etag").and_then(|v| v.to_str().ok()).map(str::to_string);
        let body = response.json::<Value>().await?;
        Ok(Some((body, etag)))
    }

    async fn get_routes_document(&self) -> Result<(Vec<Value>, Option<String>)> {
        let response = self.http.get(self.routes_document_uri()).send().await?;
        let etag = response.headers().get("etag").and_then(|v| v.to_str().ok()).map(str::to_string);
        let body: Vec<Value> = response.json().await.map_err(|err| Error::Malformed(err.to_string()))?;
        Ok((body, etag))
    }

    /// Replaces the route identified by `route.@id` inside the shared routes
    /// document, re-sorting and retrying on `ETag` conflicts.
    #[instrument(skip(self, route), fields(route_id = %route_id))]
    pub async fn upsert_route(&self, route_id: &str, route: Value) -> Result<()> {
        for attempt in 1..=MAX_ETAG_ATTEMPTS {
            let (existing, etag) = self.get_routes_document().await?;
            let mut routes: Vec<Value> = existing.into_iter().filter(|r| r["@id"].as_str() != Some(route_id)).collect();
            routes.push(route.clone());
            let routes = sort_routes(routes);

            let mut request = self
                .http
                .patch(self.routes_document_uri())
                .header("content-type", "application/json")
                .json(&routes);
            if let Some(etag) = etag {
                request = request.header("If-Match", etag);
            }
            let response = request.send().await?;

            if response.status() == StatusCode::PRECONDITION_FAILED {
                warn!(attempt, route_id, "etag conflict on proxy route upsert, retrying");
                continue;
            }
            return Ok(());
        }

        Err(Error::EtagConflict { route_id: route_id.to_string(), attempts: MAX_ETAG_ATTEMPTS })
    }

    /// Creates or patches a single route addressed directly by its `@id`,
    /// used for the build-registry route which does not need re-sorting
    /// against the rest of the document unless it is brand new.
    #[instrument(skip(self, route), fields(route_id = %route_id))]
    pub async fn upsert_single_route(&self, route_id: &str, route: Value) -> Result<()> {
        if let Some((_, etag)) = self.get_route(route_id).await? {
            for attempt in 1..=MAX_ETAG_ATTEMPTS {
                let mut request = self.http.patch(self.route_uri(route_id)).header("content-type", "application/json").json(&route);
                if let Some(etag) = etag.clone() {
                    request = request.header("If-Match", etag);
                }
                let response = request.send().await?;
                if response.status() == StatusCode::PRECONDITION_FAILED {
                    warn!(attempt, route_id, "etag conflict on proxy route patch, retrying");
                    continue;
                }
                return Ok(());
            }
            return Err(Error::EtagConflict { route_id: route_id.to_string(), attempts: MAX_ETAG_ATTEMPTS });
        }

        self.upsert_route(route_id, route).await
    }

    /// Inserts a route at the front of the document if its `@id` doesn't
    /// exist yet, without disturbing an already-present one. Used for
    /// per-deployment preview routes, which are immutable once created.
    #[instrument(skip(self, route), fields(route_id = %route_id))]
    pub async fn insert_if_absent(&self, route_id: &str, route: Value) -> Result<()> {
        if self.get_route(route_id).await?.is_some() {
            return Ok(());
        }
        let response = self
            .http
            .put(format!("{}/0", self.routes_document_uri()))
            .header("content-type", "application/json")
            .json(&route)
            .send()
            .await?;
        response.error_for_status().map_err(Error::Transport)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_route(&self, route_id: &str) -> Result<()> {
        for attempt in 1..=MAX_ETAG_ATTEMPTS {
            let Some((_, etag)) = self.get_route(route_id).await? else {
                return Ok(());
            };
            let mut request = self.http.delete(self.route_uri(route_id));
            if let Some(etag) = etag {
                request = request.header("If-Match", etag);
            }
            let response = request.send().await?;
            if response.status() == StatusCode::PRECONDITION_FAILED {
                warn!(attempt, route_id, "etag conflict on proxy route delete, retrying");
                continue;
            }
            return Ok(());
        }

        Err(Error::EtagConflict { route_id: route_id.to_string(), attempts: MAX_ETAG_ATTEMPTS })
    }

    /// Removes every route whose `@id` starts with `prefix` and is not in
    /// `keep_ids` — used to clean up stale service URLs and per-deployment
    /// log-name entries after a snapshot changes shape.
    #[instrument(skip(self, keep_ids))]
    pub async fn cleanup_stale_routes(&self, prefix: &str, keep_ids: &[String]) -> Result<()> {
        let (routes, _) = self.get_routes_document().await?;
        for route in routes {
            let Some(id) = route["@id"].as_str() else { continue };
            if id.starts_with(prefix) && !keep_ids.iter().any(|k| k == id) {
                self.delete_route(id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_against(server: &MockServer) -> ProxyAdminClient {
        ProxyAdminClient::new(Client::new(), server.uri())
    }

    #[tokio::test]
    async fn upsert_route_retries_on_412_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/id/{}", routes::ROUTES_ROOT_ID)))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"v1\"").set_body_json(Vec::<Value>::new()))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path(format!("/id/{}", routes::ROUTES_ROOT_ID)))
            .and(header_exists("If-Match"))
            .respond_with(ResponseTemplate::new(412))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/id/{}", routes::ROUTES_ROOT_ID)))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"v2\"").set_body_json(Vec::<Value>::new()))
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path(format!("/id/{}", routes::ROUTES_ROOT_ID)))
            .and(header_exists("If-Match"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let result = client.upsert_route("srv_1-example.com-*", json!({"@id": "srv_1-example.com-*"})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn delete_route_is_a_no_op_when_already_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let client = client_against(&server).await;
        assert!(client.delete_route("gone").await.is_ok());
    }
}
