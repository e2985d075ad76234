#[tokio::main]
async fn main() -> anyhow::Result<()> {
    herald_observability::init();

    let config = herald_infra::config::Config::from_env()?;
    herald_server::bootstrap::run(config).await
}
