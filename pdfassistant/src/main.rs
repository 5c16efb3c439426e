use pdfassistant::{init, server::run_server, Configuration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pdfassistant=info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match Configuration::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e:#}");
            std::process::exit(1);
        }
    };
    info!(
        db = %config.db_url,
        documents = config.document_urls.len(),
        model = %config.groq_model,
        "loaded configuration"
    );
    if let Some(warning) = config.warning() {
        warn!("{warning}");
    }

    if let Err(e) = run_server(config).await {
        error!("server error: {e:#}");
        std::process::exit(1);
    }
}
