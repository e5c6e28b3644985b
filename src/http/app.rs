//! Application assembly.
//!
//! # Middleware order (outermost first)
//! ```text
//! client info (X-Forwarded-* per trust setting)
//!     → access log
//!     → rate limiter
//!     → CORS             (when configured)
//!     → CSRF             (when configured)
//!     → compression
//!     → cookie parser
//!     → mounted routes
//! ```
//!
//! The order is fixed at assembly and reported by [`App::middleware`].
//! Routes may be mounted at any time; each mount re-wraps the route table
//! with the same middleware instances and publishes the result, so a
//! server that is already listening picks it up on the next request.
//!
//! Routes added with [`App::attach`] sit in front of the whole stack and
//! see the raw request (WebSocket upgrades).

use arc_swap::ArcSwap;
use axum::{
    extract::Request,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::MethodRouter,
    Router,
};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tower::ServiceExt;
use tower_http::{
    compression::{
        predicate::{And, NotForContentType, Predicate, SizeAbove},
        CompressionLayer,
    },
    cors::CorsLayer,
    services::ServeDir,
    CompressionLevel as Quality,
};

use crate::config::trust_proxy::InvalidTrustEntry;
use crate::config::{AppOptions, CompressionLevel, CompressionOptions, EnvSnapshot, TrustProxy};
use crate::http::cookies::{cookie_parser_middleware, CookieParser};
use crate::http::locals::Locals;
use crate::http::view::ViewEngine;
use crate::observability::access_log::{access_log_middleware, AccessLog, SharedSink};
use crate::terminal::Terminal;
use crate::security::client::{client_info_middleware, ClientResolver};
use crate::security::cors::{build_cors_layer, CorsError};
use crate::security::csrf::{csrf_middleware, CsrfError, CsrfState};
use crate::security::rate_limit::{rate_limit_middleware, RateLimitError, RateLimiterState};

type CompressionPredicate =
    And<And<And<SizeAbove, NotForContentType>, NotForContentType>, NotForContentType>;

/// A middleware stage of an assembled [`App`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Middleware {
    TrustProxy,
    AccessLog,
    RateLimit,
    Cors,
    Csrf,
    Compression,
    CookieParser,
}

/// Errors from assembling or using an [`App`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Cors(#[from] CorsError),

    #[error(transparent)]
    Csrf(#[from] CsrfError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    TrustProxy(#[from] InvalidTrustEntry),

    #[error("mount path must start with '/': {0:?}")]
    InvalidPath(String),

    #[error("cannot route {path}: {message}")]
    RouteConflict { path: String, message: String },

    #[error("no view engine configured")]
    NoViewEngine,

    #[error("failed to render view {view}: {message}")]
    Render { view: String, message: String },
}

/// The middleware instances shared by every published router.
struct Layers {
    client: ClientResolver,
    access_log: AccessLog,
    rate_limit: Arc<RateLimiterState>,
    cors: Option<CorsLayer>,
    csrf: Option<CsrfState>,
    compression: CompressionLayer<CompressionPredicate>,
    cookies: Arc<CookieParser>,
}

impl Layers {
    /// Each `.layer` wraps the previous ones, so the last call is outermost.
    fn wrap(&self, routes: Router) -> Router {
        // A fallback route lets the layers see unmatched requests too.
        let mut router = Router::new()
            .fallback_service(routes)
            .layer(from_fn_with_state(self.cookies.clone(), cookie_parser_middleware))
            .layer(self.compression.clone());
        if let Some(csrf) = &self.csrf {
            router = router.layer(from_fn_with_state(csrf.clone(), csrf_middleware));
        }
        if let Some(cors) = &self.cors {
            router = router.layer(cors.clone());
        }
        router
            .layer(from_fn_with_state(self.rate_limit.clone(), rate_limit_middleware))
            .layer(from_fn_with_state(self.access_log.clone(), access_log_middleware))
            .layer(from_fn_with_state(self.client.clone(), client_info_middleware))
    }
}

fn compression_layer(options: &CompressionOptions) -> CompressionLayer<CompressionPredicate> {
    let quality = match options.level {
        CompressionLevel::Fastest => Quality::Fastest,
        CompressionLevel::Default => Quality::Default,
        CompressionLevel::Best => Quality::Best,
    };
    let predicate = SizeAbove::new(options.threshold)
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE);
    CompressionLayer::new()
        .gzip(options.gzip)
        .br(options.br)
        .deflate(options.deflate)
        .zstd(options.zstd)
        .quality(quality)
        .compress_when(predicate)
}

#[derive(Clone, Default)]
struct RouteTable {
    /// Served through the middleware stack.
    routes: Router,
    /// Served ahead of it.
    attached: Router,
}

struct AppInner {
    layers: Layers,
    stack: Vec<Middleware>,
    trust_proxy: Option<TrustProxy>,
    routes: Mutex<RouteTable>,
    published: ArcSwap<Router>,
    view_engine: RwLock<Option<Arc<dyn ViewEngine>>>,
    locals: RwLock<Locals>,
}

/// An assembled application: fixed middleware around a mutable route table.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    /// Build the middleware stack described by `options`.
    ///
    /// `env` supplies `TRUST_PROXY` when `options.trust_proxy` is unset.
    pub fn assemble(
        options: &AppOptions,
        sink: SharedSink,
        env: &EnvSnapshot,
    ) -> Result<Self, AppError> {
        let trust_proxy = TrustProxy::resolve(options.trust_proxy.as_ref(), env);
        let client = ClientResolver::new(trust_proxy.as_ref())?;
        let rate_limit = Arc::new(RateLimiterState::new(&options.rate_limit)?);
        let cors = options.cors.as_ref().map(build_cors_layer).transpose()?;
        let csrf = options.csrf.as_ref().map(CsrfState::new).transpose()?;

        let mut stack = Vec::with_capacity(7);
        if client.trusts_proxies() {
            stack.push(Middleware::TrustProxy);
        }
        stack.extend([Middleware::AccessLog, Middleware::RateLimit]);
        if cors.is_some() {
            stack.push(Middleware::Cors);
        }
        if csrf.is_some() {
            stack.push(Middleware::Csrf);
        }
        stack.extend([Middleware::Compression, Middleware::CookieParser]);

        let layers = Layers {
            client,
            access_log: AccessLog::new(sink, Terminal::for_stdout(env)),
            rate_limit,
            cors,
            csrf,
            compression: compression_layer(&options.compression),
            cookies: Arc::new(CookieParser::new(&options.cookie)),
        };

        tracing::debug!(
            middleware = ?stack,
            trust_proxy = ?trust_proxy,
            "Application assembled"
        );

        let published = ArcSwap::from_pointee(layers.wrap(Router::new()));
        Ok(Self {
            inner: Arc::new(AppInner {
                layers,
                stack,
                trust_proxy,
                routes: Mutex::new(RouteTable::default()),
                published,
                view_engine: RwLock::new(None),
                locals: RwLock::new(Locals::new()),
            }),
        })
    }

    /// Middleware stages, outermost first. The cookie parser is always last.
    pub fn middleware(&self) -> &[Middleware] {
        &self.inner.stack
    }

    /// The trust setting in effect after environment fallback.
    pub fn trust_proxy(&self) -> Option<&TrustProxy> {
        self.inner.trust_proxy.as_ref()
    }

    /// Apply `f` to a copy of the route table and publish it. The stored
    /// table only changes when `f` succeeds.
    fn update(&self, path: &str, f: impl FnOnce(&mut RouteTable)) -> Result<(), AppError> {
        let mut table = self.inner.routes.lock().expect("route table mutex poisoned");
        let mut next = table.clone();
        // axum reports overlapping or malformed routes by panicking.
        catch_unwind(AssertUnwindSafe(|| f(&mut next))).map_err(|panic| {
            AppError::RouteConflict {
                path: path.to_string(),
                message: panic_message(panic.as_ref()).to_string(),
            }
        })?;
        let layered = self.inner.layers.wrap(next.routes.clone());
        self.inner
            .published
            .store(Arc::new(next.attached.clone().fallback_service(layered)));
        *table = next;
        Ok(())
    }

    fn update_routes(
        &self,
        path: &str,
        f: impl FnOnce(Router) -> Router,
    ) -> Result<(), AppError> {
        self.update(path, |table| table.routes = f(std::mem::take(&mut table.routes)))
    }

    /// Require a leading `/` and drop trailing ones, keeping the root as `/`.
    pub(crate) fn normalize_path(path: &str) -> Result<&str, AppError> {
        if !path.starts_with('/') {
            return Err(AppError::InvalidPath(path.to_string()));
        }
        let trimmed = path.trim_end_matches('/');
        Ok(if trimmed.is_empty() { "/" } else { trimmed })
    }

    /// Mount `router` under `path`; `/` merges it into the root.
    ///
    /// Routes that overlap existing ones are rejected with
    /// [`AppError::RouteConflict`] and leave the table as it was.
    pub fn mount(&self, path: &str, router: Router) -> Result<&Self, AppError> {
        let path = Self::normalize_path(path)?;
        self.update_routes(path, |routes| {
            if path == "/" {
                routes.merge(router)
            } else {
                routes.nest(path, router)
            }
        })?;
        tracing::debug!(path, "Router mounted");
        Ok(self)
    }

    /// Add a single route.
    pub fn route(&self, path: &str, method_router: MethodRouter) -> Result<&Self, AppError> {
        Self::normalize_path(path)?;
        self.update_routes(path, |routes| routes.route(path, method_router))?;
        Ok(self)
    }

    /// Route `path` ahead of the middleware stack: no access log, rate
    /// limit, CSRF check or client resolution.
    pub fn attach(&self, path: &str, method_router: MethodRouter) -> Result<&Self, AppError> {
        Self::normalize_path(path)?;
        self.update(path, |table| {
            table.attached = std::mem::take(&mut table.attached).route(path, method_router)
        })?;
        tracing::debug!(path, "Route attached ahead of middleware");
        Ok(self)
    }

    /// Serve files from `dir` under `path`. At `/` the directory answers
    /// every request no route claims.
    pub fn serve_dir(&self, path: &str, dir: impl AsRef<Path>) -> Result<&Self, AppError> {
        let path = Self::normalize_path(path)?;
        let service = ServeDir::new(dir.as_ref());
        self.update_routes(path, |routes| {
            if path == "/" {
                routes.fallback_service(service)
            } else {
                routes.nest_service(path, service)
            }
        })?;
        tracing::debug!(path, dir = %dir.as_ref().display(), "Static directory mounted");
        Ok(self)
    }

    pub fn set_view_engine(&self, engine: impl ViewEngine) -> &Self {
        *self
            .inner
            .view_engine
            .write()
            .expect("view engine lock poisoned") = Some(Arc::new(engine));
        self
    }

    /// Set an application-wide render local.
    pub fn set_local(&self, key: &str, value: impl Into<serde_json::Value>) -> &Self {
        self.inner
            .locals
            .write()
            .expect("app locals lock poisoned")
            .insert(key, value);
        self
    }

    /// Render `view` with the app locals overlaid by `locals`.
    pub fn render(&self, view: &str, locals: &Locals) -> Result<String, AppError> {
        let engine = self
            .inner
            .view_engine
            .read()
            .expect("view engine lock poisoned")
            .clone()
            .ok_or(AppError::NoViewEngine)?;
        let mut merged = self.inner.locals.read().expect("app locals lock poisoned").clone();
        merged.merge(locals);
        engine
            .render(view, &merged.into_value())
            .map_err(|e| AppError::Render {
                view: view.to_string(),
                message: e.to_string(),
            })
    }

    /// The currently published router, middleware included.
    pub fn router(&self) -> Router {
        Router::clone(&self.inner.published.load())
    }

    /// Dispatch one request through the currently published router.
    pub async fn handle(&self, request: Request) -> Response {
        match self.router().oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("route rejected")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorsOptions, CsrfOptions};
    use crate::constants::XSRF_LOCAL_KEY;
    use crate::http::cookies::Cookies;
    use crate::security::client::ClientInfo;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request as HttpRequest, StatusCode},
        routing::get,
    };
    use crate::http::view::RenderError;
    use crate::terminal::ColorLevel;
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    fn quiet() -> SharedSink {
        Arc::new(|_: &str| {})
    }

    fn get_req(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_default_stack_order() {
        let app = App::assemble(&AppOptions::default(), quiet(), &EnvSnapshot::empty()).unwrap();
        assert_eq!(
            app.middleware(),
            &[
                Middleware::AccessLog,
                Middleware::RateLimit,
                Middleware::Compression,
                Middleware::CookieParser,
            ]
        );
        assert_eq!(app.trust_proxy(), None);
    }

    #[test]
    fn test_full_stack_order() {
        let options = AppOptions {
            trust_proxy: Some(TrustProxy::Bool(true)),
            cors: Some(CorsOptions::default()),
            csrf: Some(CsrfOptions::new("s3cret")),
            ..AppOptions::default()
        };
        let app = App::assemble(&options, quiet(), &EnvSnapshot::empty()).unwrap();
        assert_eq!(
            app.middleware(),
            &[
                Middleware::TrustProxy,
                Middleware::AccessLog,
                Middleware::RateLimit,
                Middleware::Cors,
                Middleware::Csrf,
                Middleware::Compression,
                Middleware::CookieParser,
            ]
        );
        assert_eq!(app.middleware().last(), Some(&Middleware::CookieParser));
    }

    #[test]
    fn test_trust_proxy_from_env() {
        let env = EnvSnapshot::empty().with("TRUST_PROXY", "2");
        let app = App::assemble(&AppOptions::default(), quiet(), &env).unwrap();
        assert_eq!(app.trust_proxy(), Some(&TrustProxy::Hops(2)));
        assert_eq!(app.middleware()[0], Middleware::TrustProxy);

        // Explicit configuration wins over the environment.
        let options = AppOptions {
            trust_proxy: Some(TrustProxy::Bool(false)),
            ..AppOptions::default()
        };
        let app = App::assemble(&options, quiet(), &env).unwrap();
        assert_eq!(app.trust_proxy(), Some(&TrustProxy::Bool(false)));
        assert_eq!(app.middleware()[0], Middleware::AccessLog);
    }

    #[test]
    fn test_construction_errors_propagate() {
        let options = AppOptions {
            csrf: Some(CsrfOptions::new("")),
            ..AppOptions::default()
        };
        let err = App::assemble(&options, quiet(), &EnvSnapshot::empty()).err();
        assert!(matches!(err, Some(AppError::Csrf(CsrfError::EmptySecret))));

        let options = AppOptions {
            cors: Some(CorsOptions {
                credentials: true,
                ..CorsOptions::default()
            }),
            ..AppOptions::default()
        };
        let err = App::assemble(&options, quiet(), &EnvSnapshot::empty()).err();
        assert!(matches!(err, Some(AppError::Cors(CorsError::CredentialsWithWildcard))));

        let env = EnvSnapshot::empty().with("TRUST_PROXY", "not-an-address");
        let err = App::assemble(&AppOptions::default(), quiet(), &env).err();
        assert!(matches!(err, Some(AppError::TrustProxy(_))));
    }

    #[tokio::test]
    async fn test_mount_after_router_taken() {
        let app = App::assemble(&AppOptions::default(), quiet(), &EnvSnapshot::empty()).unwrap();
        let response = app.handle(get_req("/api/ping")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.mount("/api/", Router::new().route("/ping", get(|| async { "pong" })))
            .unwrap()
            .route("/", get(|| async { "root" }))
            .unwrap();

        let response = app.handle(get_req("/api/ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "pong");
        assert_eq!(body_string(app.handle(get_req("/")).await).await, "root");

        assert!(matches!(
            app.mount("api", Router::new()),
            Err(AppError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_conflicting_route_leaves_table_intact() {
        let app = App::assemble(&AppOptions::default(), quiet(), &EnvSnapshot::empty()).unwrap();
        app.route("/a", get(|| async { "first" })).unwrap();

        let err = app.route("/a", get(|| async { "second" })).err();
        assert!(matches!(err, Some(AppError::RouteConflict { ref path, .. }) if path == "/a"));
        let err = app
            .mount("/", Router::new().route("/a", get(|| async { "merged" })))
            .err();
        assert!(matches!(err, Some(AppError::RouteConflict { .. })));
        assert!(matches!(
            app.route("a", get(|| async { "relative" })),
            Err(AppError::InvalidPath(_))
        ));

        // Later registrations still work and the first route is still served.
        app.route("/b", get(|| async { "b" })).unwrap();
        app.attach("/raw", get(|| async { "raw" })).unwrap();
        assert!(matches!(
            app.attach("/raw", get(|| async { "again" })),
            Err(AppError::RouteConflict { .. })
        ));
        assert_eq!(body_string(app.handle(get_req("/a")).await).await, "first");
        assert_eq!(body_string(app.handle(get_req("/b")).await).await, "b");
        assert_eq!(body_string(app.handle(get_req("/raw")).await).await, "raw");
    }

    #[test]
    fn test_access_log_styling_follows_snapshot() {
        // An empty snapshot has no TERM, so access log lines stay plain.
        assert_eq!(Terminal::for_stdout(&EnvSnapshot::empty()).level(), ColorLevel::None);
        let forced = EnvSnapshot::empty().with("FORCE_COLOR", "3");
        assert_eq!(Terminal::for_stdout(&forced).level(), ColorLevel::TrueColor);
    }

    #[tokio::test]
    async fn test_attached_routes_skip_middleware() {
        let options = AppOptions {
            csrf: Some(CsrfOptions::new("s3cret")),
            ..AppOptions::default()
        };
        let app = App::assemble(&options, quiet(), &EnvSnapshot::empty()).unwrap();
        app.route("/guarded", get(|| async { "guarded" }))
            .unwrap()
            .attach("/raw", get(|| async { "raw" }))
            .unwrap();

        let raw = app.handle(get_req("/raw")).await;
        assert_eq!(raw.status(), StatusCode::OK);
        assert!(raw.headers().get(header::SET_COOKIE).is_none());
        assert!(raw.headers().get("ratelimit-limit").is_none());

        let guarded = app.handle(get_req("/guarded")).await;
        assert_eq!(guarded.status(), StatusCode::PRECONDITION_FAILED);
        assert!(guarded.headers().get("ratelimit-limit").is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_state_is_shared_across_mounts() {
        let options = AppOptions {
            rate_limit: crate::config::RateLimitOptions {
                limit: 2,
                ..Default::default()
            },
            ..AppOptions::default()
        };
        let app = App::assemble(&options, quiet(), &EnvSnapshot::empty()).unwrap();
        app.route("/a", get(|| async { "a" })).unwrap();
        assert_eq!(app.handle(get_req("/a")).await.status(), StatusCode::OK);

        app.route("/b", get(|| async { "b" })).unwrap();
        assert_eq!(app.handle(get_req("/b")).await.status(), StatusCode::OK);

        let blocked = app.handle(get_req("/a")).await;
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(blocked.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(
            body_string(blocked).await,
            "Too many requests, please try again later."
        );
    }

    #[tokio::test]
    async fn test_request_extensions_are_populated() {
        let options = AppOptions {
            trust_proxy: Some(TrustProxy::Bool(true)),
            cookie: crate::config::CookieOptions {
                secret: vec!["k".into()],
                decode: true,
            },
            ..AppOptions::default()
        };
        let app = App::assemble(&options, quiet(), &EnvSnapshot::empty()).unwrap();
        app.route(
            "/whoami",
            get(|client: ClientInfo, cookies: Cookies| async move {
                format!(
                    "{} {} {}",
                    client.ip.map(|ip| ip.to_string()).unwrap_or_default(),
                    client.protocol,
                    cookies.signed("sid").unwrap_or("-")
                )
            }),
        )
        .unwrap();

        let signed = crate::http::cookies::sign_cookie("u1", "k");
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("x-forwarded-for", "203.0.113.9")
            .header("x-forwarded-proto", "https")
            .header(header::COOKIE, format!("sid={}", signed))
            .extension(axum::extract::ConnectInfo(std::net::SocketAddr::from((
                [10, 0, 0, 1],
                4000,
            ))))
            .body(Body::empty())
            .unwrap();
        let response = app.handle(request).await;
        assert_eq!(body_string(response).await, "203.0.113.9 https u1");
    }

    #[tokio::test]
    async fn test_access_log_sees_unmatched_requests() {
        let lines = Arc::new(StdMutex::new(Vec::<String>::new()));
        let captured = lines.clone();
        let sink: SharedSink = Arc::new(move |line: &str| {
            captured.lock().unwrap().push(line.to_string());
        });
        let app = App::assemble(&AppOptions::default(), sink, &EnvSnapshot::empty()).unwrap();

        let response = app.handle(get_req("/missing?x=1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        drop(body_string(response).await);

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("GET /missing?x=1"));
        assert!(lines[0].contains("404"));
    }

    #[tokio::test]
    async fn test_render_merges_locals_with_csrf_token() {
        let options = AppOptions {
            csrf: Some(CsrfOptions::new("s3cret")),
            ..AppOptions::default()
        };
        let app = App::assemble(&options, quiet(), &EnvSnapshot::empty()).unwrap();
        assert!(matches!(
            app.render("index", &Locals::new()),
            Err(AppError::NoViewEngine)
        ));

        app.set_view_engine(|view: &str, locals: &Value| -> Result<String, RenderError> {
            Ok(format!(
                "{}:{}:{}",
                view,
                locals["title"].as_str().unwrap_or(""),
                locals[XSRF_LOCAL_KEY].as_str().map(|t| !t.is_empty()).unwrap_or(false)
            ))
        })
        .set_local("title", "Home");

        let page_app = app.clone();
        app.route(
            "/",
            get(move |locals: Locals| {
                let app = page_app.clone();
                async move { app.render("index", &locals).unwrap_or_default() }
            }),
        )
        .unwrap();

        // No header token: the CSRF layer answers before the handler.
        let rejected = app.handle(get_req("/")).await;
        assert_eq!(rejected.status(), StatusCode::PRECONDITION_FAILED);

        let token = crate::security::csrf::create_token("s3cret");
        let request = HttpRequest::builder()
            .uri("/")
            .header("x-xsrf-token", token)
            .body(Body::empty())
            .unwrap();
        let response = app.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "index:Home:true");

        let mut call = Locals::new();
        call.insert("title", "Override");
        assert_eq!(
            app.render("page", &call).unwrap(),
            "page:Override:false"
        );
    }
}
