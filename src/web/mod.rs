mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, Method};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::pipeline::{EntryExtractor, HttpFetcher, PageSource, TopicScraper};
use crate::summarizer::{ChatCompletionsClient, Summarizer, TextCompleter};

pub use routes::format_digest;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub source: Arc<dyn PageSource>,
    pub scraper: Arc<TopicScraper>,
    pub summarizer: Arc<Summarizer>,
}

impl AppState {
    /// Wire the HTTP fetcher and summarizer described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: Config) -> Result<Self> {
        let source: Arc<dyn PageSource> =
            Arc::new(HttpFetcher::from_config(&config).context("Failed to build page fetcher")?);
        let completer = ChatCompletionsClient::from_config(&config)
            .context("Failed to build completion client")?
            .map(|client| Arc::new(client) as Arc<dyn TextCompleter>);
        if completer.is_none() {
            info!("AI_API_URL not set; summaries will be statistical");
        }
        let summarizer = Summarizer::new(completer, config.ai_max_input_chars);
        Ok(Self::with_parts(config, source, summarizer))
    }

    /// Build state around an existing page source and summarizer.
    #[must_use]
    pub fn with_parts(config: Config, source: Arc<dyn PageSource>, summarizer: Summarizer) -> Self {
        let scraper = TopicScraper::new(
            Arc::clone(&source),
            EntryExtractor::from_config(&config),
            config.scrape_settings(),
        );
        Self {
            config: Arc::new(config),
            source,
            scraper: Arc::new(scraper),
            summarizer: Arc::new(summarizer),
        }
    }
}

/// Start the web server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn serve(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.web_host, config.web_port)
        .parse()
        .context("Invalid web server address")?;

    let state = AppState::from_config(config)?;
    let app = create_app(state);

    info!(addr = %addr, "Starting HTTP web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app)
        .await
        .context("Web server error")?;

    Ok(())
}

/// Router with CORS, compression and request tracing.
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .merge(routes::router())
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
