use chat_widget::config::Settings;
use chat_widget::startup::Application;
use dotenvy::dotenv;
use tracing::info;
use widget_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        "chat-widget",
        &settings.server.log_level,
        settings.server.log_format,
        settings.server.otlp_endpoint.as_deref(),
    );

    let app = Application::build(settings.clone()).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        anyhow::anyhow!("Startup error: {}", e)
    })?;

    info!(
        "Starting chat-widget on {}:{}",
        settings.server.host,
        app.port()
    );
    app.run_until_stopped().await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}
