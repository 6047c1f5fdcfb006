use modcore::prelude::*;

mod database;
mod modules;

use database::database;
use modules::api::api;
use modules::user::user;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    tracing::info!("🚀 Starting Demo Server...");

    let config = ConfigService::new();
    let options = AppOptions {
        exit_on_stop: true,
        ..AppOptions::from_config(&config)
    };
    let app = Application::builder().config(config).options(options).build();

    // database first, user depends on it; api wraps everything
    app.setup(database)?
        .setup_with(api, SetupOptions::new().order(10))?
        .setup(user)?;

    // boot, listen on PORT (7001 by default), wait for SIGINT/SIGTERM
    app.start(None).await?;

    tracing::info!("👋 Server stopped");
    Ok(())
}
