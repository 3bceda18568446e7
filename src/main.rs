use ach_gateway::config::Config;
use ach_gateway::observability::init_tracing;
use ach_gateway::Application;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().expect("Failed to load configuration");

    init_tracing("info");
    ach_gateway::services::metrics::init_metrics();

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
