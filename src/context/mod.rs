//! Per-request context.

use crate::config::AppOptions;
use crate::error::Result;
use crate::lifecycle::Application;
use crate::property::{AnyValue, CacheSlots, PropertyHost, PropertyTarget, Slot};
use axum::extract::{ConnectInfo, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use uuid::Uuid;

/// Names a module cannot define on the context.
pub(crate) const BUILTIN_PROPERTIES: &[&str] = &[
    "app",
    "core",
    "id",
    "method",
    "uri",
    "path",
    "headers",
    "host",
    "hostname",
    "ip",
    "ips",
    "subdomains",
    "options",
    "state",
];

tokio::task_local! {
    static CURRENT: Context;
}

/// State of one HTTP request, shared by every middleware and handler that
/// processes it.
///
/// Module-defined properties are read through [`PropertyHost`] or the typed
/// [`ContextProperty`](crate::ContextProperty) handles. Handlers can take the
/// context as an extractor:
///
/// ```rust,ignore
/// async fn whoami(ctx: Context) -> String {
///     format!("{} from {:?}", ctx.id(), ctx.ip())
/// }
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: Uuid,
    app: Application,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    peer: Option<SocketAddr>,
    cache: CacheSlots,
}

impl Context {
    pub(crate) fn for_request(app: Application, req: &Request) -> Self {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self {
            inner: Arc::new(ContextInner {
                id: Uuid::new_v4(),
                app,
                method: req.method().clone(),
                uri: req.uri().clone(),
                headers: req.headers().clone(),
                peer,
                cache: CacheSlots::default(),
            }),
        }
    }

    /// The context of the request being handled by the current task.
    pub fn current() -> Option<Context> {
        CURRENT.try_with(Context::clone).ok()
    }

    /// Runs `f` with `self` as the current context.
    pub(crate) async fn scope<F: Future>(self, f: F) -> F::Output {
        CURRENT.scope(self, f).await
    }

    /// Unique id of this request.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn app(&self) -> &Application {
        &self.inner.app
    }

    pub fn options(&self) -> &AppOptions {
        self.inner.app.options()
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn path(&self) -> &str {
        self.inner.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Address of the connected peer, when served by a real listener.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Requested host with port, honouring `X-Forwarded-Host` behind a proxy.
    pub fn host(&self) -> Option<&str> {
        let forwarded = self
            .options()
            .proxy
            .then(|| self.header("x-forwarded-host"))
            .flatten()
            .and_then(|value| value.split(',').next())
            .map(str::trim);
        forwarded
            .or_else(|| self.header(header::HOST.as_str()))
            .or_else(|| self.inner.uri.authority().map(|a| a.as_str()))
            .filter(|host| !host.is_empty())
    }

    /// [`Context::host`] without the port.
    pub fn hostname(&self) -> Option<&str> {
        let host = self.host()?;
        if let Some(rest) = host.strip_prefix('[') {
            // IPv6 literal
            return rest.split(']').next();
        }
        host.split(':').next()
    }

    /// Client address chain from the proxy header, when `proxy` is enabled.
    ///
    /// With `max_ips_count` set, only that many addresses nearest to the
    /// server are kept.
    pub fn ips(&self) -> Vec<String> {
        let options = self.options();
        if !options.proxy {
            return Vec::new();
        }
        let Some(value) = self.header(&options.proxy_ip_header) else {
            return Vec::new();
        };

        let mut ips: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .collect();
        if options.max_ips_count > 0 && ips.len() > options.max_ips_count {
            ips.drain(..ips.len() - options.max_ips_count);
        }
        ips
    }

    /// Client address: first of [`Context::ips`], else the peer address.
    pub fn ip(&self) -> Option<String> {
        self.ips()
            .into_iter()
            .next()
            .or_else(|| self.inner.peer.map(|addr| addr.ip().to_string()))
    }

    /// Host labels left of the `subdomain_offset` last ones, nearest first.
    ///
    /// `tobi.ferrets.example.com` with the default offset of 2 yields
    /// `["ferrets", "tobi"]`.
    pub fn subdomains(&self) -> Vec<String> {
        let Some(hostname) = self.hostname() else {
            return Vec::new();
        };
        if hostname.parse::<IpAddr>().is_ok() {
            return Vec::new();
        }
        hostname
            .split('.')
            .rev()
            .skip(self.options().subdomain_offset)
            .map(str::to_string)
            .collect()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name)?.to_str().ok()
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self, name: &str) -> bool {
        self.inner.cache.is_cached(name)
    }
}

impl PropertyHost for Context {
    const TARGET: PropertyTarget = PropertyTarget::Context;

    fn read_property(&self, name: &str) -> Result<Option<AnyValue>> {
        let registry = self.inner.app.context_properties();
        let slot = registry.slot(name).ok_or_else(|| registry.not_found(name))?;
        Ok(match slot {
            Slot::Value(value) => Some(value),
            Slot::Getter(get) => get(self),
            Slot::Cached(compute) => self.inner.cache.get_or_compute(name, || compute(self)),
        })
    }

    fn has_property(&self, name: &str) -> bool {
        self.inner.app.context_properties().contains(name)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .finish()
    }
}

impl<S> FromRequestParts<S> for Context
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<Context>().cloned().ok_or_else(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                crate::error::CoreError::MissingContext.to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::request::Builder;

    fn context(options: AppOptions, build: impl FnOnce(Builder) -> Builder) -> Context {
        let app = Application::new(options);
        let req = build(Request::builder().uri("/users?id=1"))
            .body(Body::empty())
            .unwrap();
        Context::for_request(app, &req)
    }

    fn proxied(max_ips_count: usize) -> AppOptions {
        AppOptions {
            proxy: true,
            max_ips_count,
            ..AppOptions::default()
        }
    }

    #[test]
    fn request_fields_are_copied() {
        let ctx = context(AppOptions::default(), |b| b.method("POST"));
        assert_eq!(ctx.method(), &Method::POST);
        assert_eq!(ctx.path(), "/users");
        assert_eq!(ctx.peer_addr(), None);
        assert_eq!(ctx.ip(), None);
    }

    #[test]
    fn each_request_gets_its_own_id() {
        let a = context(AppOptions::default(), |b| b);
        let b = context(AppOptions::default(), |b| b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn proxy_header_is_ignored_without_proxy() {
        let ctx = context(AppOptions::default(), |b| {
            b.header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
        });
        assert!(ctx.ips().is_empty());
    }

    #[test]
    fn ips_keep_the_nearest_addresses() {
        let ctx = context(proxied(0), |b| {
            b.header("x-forwarded-for", "10.0.0.1, 10.0.0.2 ,10.0.0.3")
        });
        assert_eq!(ctx.ips(), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert_eq!(ctx.ip().as_deref(), Some("10.0.0.1"));

        let ctx = context(proxied(2), |b| {
            b.header("x-forwarded-for", "10.0.0.1, 10.0.0.2, 10.0.0.3")
        });
        assert_eq!(ctx.ips(), vec!["10.0.0.2", "10.0.0.3"]);
        assert_eq!(ctx.ip().as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn peer_address_is_the_fallback_ip() {
        let app = Application::new(AppOptions::default());
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 9], 5000))));

        let ctx = Context::for_request(app, &req);
        assert_eq!(ctx.ip().as_deref(), Some("192.168.1.9"));
    }

    #[test]
    fn subdomains_skip_the_offset() {
        let ctx = context(AppOptions::default(), |b| {
            b.header("host", "tobi.ferrets.example.com:8080")
        });
        assert_eq!(ctx.hostname(), Some("tobi.ferrets.example.com"));
        assert_eq!(ctx.subdomains(), vec!["ferrets", "tobi"]);

        let ctx = context(AppOptions::default(), |b| b.header("host", "127.0.0.1:7001"));
        assert!(ctx.subdomains().is_empty());

        let ctx = context(AppOptions::default(), |b| b.header("host", "[::1]:7001"));
        assert_eq!(ctx.hostname(), Some("::1"));
        assert!(ctx.subdomains().is_empty());
    }

    #[test]
    fn forwarded_host_is_used_behind_proxy() {
        let ctx = context(proxied(0), |b| {
            b.header("host", "internal:80")
                .header("x-forwarded-host", "a.b.example.com, other")
        });
        assert_eq!(ctx.host(), Some("a.b.example.com"));
        assert_eq!(ctx.subdomains(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn current_is_scoped_to_the_request_task() {
        assert!(Context::current().is_none());

        let ctx = context(AppOptions::default(), |b| b);
        let id = ctx.id();
        let seen = ctx
            .scope(async { Context::current().map(|c| c.id()) })
            .await;
        assert_eq!(seen, Some(id));
        assert!(Context::current().is_none());
    }

    #[test]
    fn undefined_properties_are_reported() {
        let ctx = context(AppOptions::default(), |b| b);
        assert!(ctx.has_property("ip"));
        assert!(!ctx.has_property("user"));
        assert!(matches!(
            ctx.property::<String>("user"),
            Err(crate::error::CoreError::PropertyNotFound { .. })
        ));
    }
}
