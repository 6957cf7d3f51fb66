use cabtrack::Config;
use cabtrack::app;
use env_logger::Env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    env_logger::Builder::from_env(Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    // Start the web application
    app::run(config).await?;

    Ok(())
}
