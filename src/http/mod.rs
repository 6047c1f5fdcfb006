//! HTTP engine adapter
//!
//! Collects the routes and middleware contributed by modules and assembles
//! them into one `axum::Router`:
//!
//! ```text
//! request → context layer → layer #1 → layer #2 → ... → routes / 404
//! ```

use crate::context::Context;
use crate::error::{CoreError, Result};
use crate::lifecycle::Application;
use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use tracing::Instrument;

type DeferredLayer = Box<dyn FnOnce(Router) -> Router + Send>;

/// Router under construction.
///
/// Layers are kept aside until [`HttpEngine::take`] so they wrap every route,
/// including routes merged after the layer was registered.
pub(crate) struct HttpEngine {
    router: Option<Router>,
    layers: Vec<DeferredLayer>,
}

impl HttpEngine {
    pub(crate) fn new() -> Self {
        Self {
            router: Some(Router::new()),
            layers: Vec::new(),
        }
    }

    pub(crate) fn merge(&mut self, routes: Router) -> Result<()> {
        let router = self.router.take().ok_or(CoreError::HandlerTaken)?;
        self.router = Some(router.merge(routes));
        Ok(())
    }

    pub(crate) fn push_layer(&mut self, layer: DeferredLayer) -> Result<()> {
        if self.router.is_none() {
            return Err(CoreError::HandlerTaken);
        }
        self.layers.push(layer);
        Ok(())
    }

    pub(crate) fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub(crate) fn is_taken(&self) -> bool {
        self.router.is_none()
    }

    /// Finishes the router. Only the first call succeeds.
    ///
    /// `Router::layer` wraps what is already there, so the layers are applied
    /// last to first to make the first registered one outermost.
    pub(crate) fn take(&mut self, app: Application) -> Result<Router> {
        let mut router = self.router.take().ok_or(CoreError::HandlerTaken)?;
        tracing::debug!(layers = self.layer_count(), "Building request handler");
        for layer in self.layers.drain(..).rev() {
            router = layer(router);
        }
        Ok(router.layer(middleware::from_fn(move |req: Request, next: Next| {
            with_context(app.clone(), req, next)
        })))
    }
}

/// Outermost layer: creates the request context and scopes it for the
/// rest of the chain.
async fn with_context(app: Application, mut req: Request, next: Next) -> Response {
    let ctx = Context::for_request(app, &req);
    req.extensions_mut().insert(ctx.clone());

    let span = tracing::debug_span!(
        "request",
        request_id = %ctx.id(),
        method = %req.method(),
        uri = %req.uri(),
    );
    ctx.scope(next.run(req)).instrument(span).await
}
