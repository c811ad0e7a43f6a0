use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::{http::HeaderValue, Router};
use clap::{Parser, Subcommand};
use meteo_kb::{
    api,
    app_state::{KnowledgeState, WeatherState},
    config::{CorsOrigins, KnowledgeBaseConfig, ServerConfig, VectorBackend, WeatherConfig},
    ingest::KnowledgeBase,
    llm::CohereClient,
    neo4j_client::Neo4jVectorStore,
    open_meteo::OpenMeteoClient,
    vector_store::{LocalVectorStore, VectorStore},
    weather_api,
    weather_service::WeatherService,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meteo_kb", version, about = "Proxy meteorológico y base de conocimiento semántica")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Proxy sobre la API de Open-Meteo.
    Weather,
    /// Subida, búsqueda y borrado de documentos.
    KnowledgeBase,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Weather => run_weather().await,
        Command::KnowledgeBase => run_knowledge_base().await,
    }
}

async fn run_weather() -> Result<()> {
    let cfg = WeatherConfig::from_env().context("Error al cargar la configuración")?;
    let client = http_client(&cfg.server)?;

    let api = Arc::new(OpenMeteoClient::new(client, cfg.forecast_url.clone()));
    let state = WeatherState {
        weather: WeatherService::from_config(api, &cfg),
        config: cfg.clone(),
    };

    let app = weather_api::create_router(state);
    serve(&cfg.server, app).await
}

async fn run_knowledge_base() -> Result<()> {
    let cfg = KnowledgeBaseConfig::from_env().context("Error al cargar la configuración")?;
    let client = http_client(&cfg.server)?;

    // Vector store según VECTOR_STORE
    let store: Arc<dyn VectorStore> = match cfg.vector_backend {
        VectorBackend::Local => Arc::new(LocalVectorStore::open(&cfg.db_path).await?),
        VectorBackend::Neo4j => {
            let neo4j = cfg
                .neo4j
                .as_ref()
                .ok_or_else(|| anyhow!("Falta la configuración de Neo4j"))?;
            Arc::new(
                Neo4jVectorStore::connect(neo4j)
                    .await
                    .context("Error conectando a Neo4j")?,
            )
        }
    };

    let cohere = Arc::new(CohereClient::from_config(client, &cfg));
    let kb = KnowledgeBase::new(store, cohere.clone(), cohere, cfg.upload_dir.clone(), cfg.search);
    kb.reconcile()
        .await
        .context("Error reconciliando documentos y vector store")?;

    let state = KnowledgeState::new(cfg.clone(), kb);
    let app = api::create_router(state).fallback_service(ServeDir::new(&cfg.static_dir));
    serve(&cfg.server, app).await
}

fn http_client(cfg: &ServerConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(cfg.http_timeout)
        .build()
        .context("No se pudo crear el cliente HTTP")
}

fn cors_layer(origins: &CorsOrigins) -> Result<CorsLayer> {
    let allow_origin = match origins {
        CorsOrigins::Any => AllowOrigin::any(),
        CorsOrigins::List(list) => {
            let values = list
                .iter()
                .map(|o| {
                    o.parse::<HeaderValue>()
                        .with_context(|| format!("Origen CORS inválido: {o}"))
                })
                .collect::<Result<Vec<_>>>()?;
            AllowOrigin::list(values)
        }
    };
    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

async fn serve(cfg: &ServerConfig, app: Router) -> Result<()> {
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&cfg.cors_origins)?);

    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Señal de apagado recibida, iniciando cierre del servidor."),
        Err(e) => error!("No se pudo escuchar la señal de apagado: {e}"),
    }
}
