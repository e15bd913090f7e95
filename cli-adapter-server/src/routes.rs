use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, RawPathParams, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, on, MethodFilter, MethodRouter};
use axum::{Json, Router};
use cli_adapter_api::api::{CliOptions, Method, Route};
use cli_adapter_api::validate::router_path;
use serde_json::Value;

use crate::adapter::{self, AdapterRequest, Settings};
use crate::process::Executor;

/// Where the service description itself is served.
pub const DESCRIPTION_PATH: &str = "/openapi.json";
pub const HEALTH_PATH: &str = "/health";

#[derive(Clone)]
struct RouteState<E> {
    options: Arc<CliOptions>,
    settings: Arc<Settings>,
    executor: E,
}

fn method_filter(method: Method) -> MethodFilter {
    match method {
        Method::Delete => MethodFilter::DELETE,
        Method::Get => MethodFilter::GET,
        Method::Post => MethodFilter::POST,
        Method::Put => MethodFilter::PUT,
        Method::Options => MethodFilter::OPTIONS,
    }
}

/// Binds every route of the description to the adapter.
///
/// `routes` must be validated by `ServiceDescription::routes`,
/// the router panics on paths it can't represent.
/// `document` is the raw description, served as is under [`DESCRIPTION_PATH`].
/// Bodies larger than [`Settings::body_limit`] are answered with 413.
pub fn routes<E: Executor>(
    base_path: Option<&str>,
    routes: Vec<Route>,
    document: Value,
    settings: Arc<Settings>,
    executor: E,
) -> Router {
    let body_limit = settings.body_limit;
    let mut paths: BTreeMap<String, MethodRouter> = BTreeMap::new();
    for route in routes {
        let path = router_path(base_path, &route.path);
        log::info!(method = route.method.as_str(), path = path.as_str(); "registering route");
        if route.options.executable.is_none() && !route.options.args.is_empty() {
            log::warn!(method = route.method.as_str(), path = path.as_str(); "arguments given but no executable, requests will fail");
        }

        let state = RouteState {
            options: Arc::new(route.options),
            settings: settings.clone(),
            executor: executor.clone(),
        };
        let method_router = on(method_filter(route.method), handle::<E>).with_state(state);
        let method_router = match paths.remove(&path) {
            Some(existing) => existing.merge(method_router),
            None => method_router,
        };
        paths.insert(path, method_router);
    }

    let mut router = Router::new();
    if paths.contains_key(DESCRIPTION_PATH) {
        log::warn!(path = DESCRIPTION_PATH; "description declares this path, not serving the description");
    } else {
        router = router.route(
            DESCRIPTION_PATH,
            get(move || {
                let document = document.clone();
                async move { Json(document) }
            }),
        );
    }
    if paths.contains_key(HEALTH_PATH) {
        log::warn!(path = HEALTH_PATH; "description declares this path, not serving health checks");
    } else {
        router = router.route(HEALTH_PATH, get(|| async { "OK" }));
    }
    for (path, method_router) in paths {
        router = router.route(&path, method_router);
    }
    router.layer(DefaultBodyLimit::max(body_limit))
}

async fn handle<E: Executor>(
    State(state): State<RouteState<E>>,
    params: RawPathParams,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = params
        .iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect();
    adapter::serve(
        state.options,
        state.settings,
        state.executor,
        AdapterRequest {
            headers,
            query,
            path,
            body,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::InFlight;
    use crate::process::{Invocation, ProcessError};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use cli_adapter_api::api::ServiceDescription;
    use serde_json::json;
    use std::future::Future;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Answers with the arguments it was called with, one per line.
    #[derive(Clone, Default)]
    struct EchoArgs {
        calls: Arc<Mutex<Vec<Invocation>>>,
    }

    impl Executor for EchoArgs {
        fn execute(
            &self,
            invocation: Invocation,
        ) -> impl Future<Output = Result<Vec<u8>, ProcessError>> + Send {
            let stdout = invocation.args.join("\n").into_bytes();
            self.calls.lock().unwrap().push(invocation);
            std::future::ready(Ok(stdout))
        }
    }

    fn router(document: Value, executor: EchoArgs) -> Router {
        let description: ServiceDescription =
            serde_json::from_value(document.clone()).expect("valid description");
        routes(
            description.base_path.as_deref(),
            description.routes().expect("valid routes"),
            document,
            Arc::new(Settings {
                work_dir: std::env::temp_dir(),
                in_flight: InFlight::default(),
                body_limit: 16,
            }),
            executor,
        )
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn greeter() -> Value {
        json!({
            "swagger": "2.0",
            "basePath": "/v1",
            "paths": {
                "/greet/{name}": {
                    "get": { "x-cli": { "executable": "greet", "args": [":name", "=times"] } },
                    "delete": { "x-cli": { "executable": "forget", "args": ["=name"] } }
                }
            }
        })
    }

    #[tokio::test(flavor = "current_thread")]
    async fn path_and_query_parameters_reach_the_executable() {
        let executor = EchoArgs::default();
        let response = router(greeter(), executor.clone())
            .oneshot(request("GET", "/v1/greet/ferris?times=3"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "ferris\n3");
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].executable, "greet");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn every_declared_method_is_served() {
        let executor = EchoArgs::default();
        let response = router(greeter(), executor.clone())
            .oneshot(request("DELETE", "/v1/greet/ferris"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(executor.calls.lock().unwrap()[0].executable, "forget");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn undeclared_methods_are_not_allowed() {
        let response = router(greeter(), EchoArgs::default())
            .oneshot(request("POST", "/v1/greet/ferris"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_query_parameter_is_an_internal_error() {
        let executor = EchoArgs::default();
        let response = router(greeter(), executor.clone())
            .oneshot(request("GET", "/v1/greet/ferris"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(text(response).await, "Internal Server Error");
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    fn upload(size: usize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from(vec![b'x'; size]))
            .unwrap()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn oversized_bodies_are_rejected_before_execution() {
        let executor = EchoArgs::default();
        let document = json!({
            "paths": { "/upload": { "post": { "x-cli": { "executable": "store" } } } }
        });

        let response = router(document.clone(), executor.clone())
            .oneshot(upload(16))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(document, executor.clone())
            .oneshot(upload(17))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn description_is_served_as_json() {
        let response = router(greeter(), EchoArgs::default())
            .oneshot(request("GET", DESCRIPTION_PATH))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let served: Value = serde_json::from_str(&text(response).await).unwrap();
        assert_eq!(served, greeter());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn health_is_served() {
        let response = router(greeter(), EchoArgs::default())
            .oneshot(request("GET", HEALTH_PATH))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "OK");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn declared_paths_win_over_builtin_ones() {
        let executor = EchoArgs::default();
        let document = json!({
            "paths": { "/health": { "get": { "x-cli": { "executable": "check", "args": ["deep"] } } } }
        });
        let response = router(document, executor.clone())
            .oneshot(request("GET", HEALTH_PATH))
            .await
            .unwrap();

        assert_eq!(text(response).await, "deep");
        assert_eq!(executor.calls.lock().unwrap()[0].executable, "check");
    }
}
