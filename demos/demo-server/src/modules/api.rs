use modcore::prelude::*;
use std::time::Instant;

/// Request logging and the health endpoint.
pub async fn api(setup: SetupHandle) -> anyhow::Result<()> {
    setup.middleware(|ctx: Context, req: Request, next: Next| async move {
        let started = Instant::now();
        let res = next.run(req).await;
        tracing::info!(
            request_id = %ctx.id(),
            method = %ctx.method(),
            path = ctx.path(),
            ip = ?ctx.ip(),
            status = res.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request"
        );
        res
    })?;

    setup.routes(Router::new().route("/health", get(health)))?;
    Ok(())
}

async fn health(ctx: Context) -> Json<serde_json::Value> {
    let app = ctx.app();
    Json(serde_json::json!({
        "name": app.name(),
        "state": app.state().to_string(),
        "started_at": app.start_time().to_rfc3339(),
        "request_id": ctx.id(),
    }))
}
