use std::{
    error::Error,
    fs::OpenOptions,
    path::Path,
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware,
};
use axum_server::Handle;
use clap::Parser;
use rusqlite::Connection;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use family_ledger::{
    AppState, Config, build_router,
    bot::{Conversation, run_bot},
    find_timezone, graceful_shutdown, logging_middleware,
    parsing::{ChatCompletionClient, ChatModel, CommandOcr, ExpenseParser},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // A missing .env file is fine, the settings may come from the environment.
    let _ = dotenvy::dotenv();

    let config = Config::parse();
    setup_logging(&config.log_path)?;

    std::fs::create_dir_all(&config.upload_dir)?;

    let conn = Connection::open(&config.db_path)?;
    let conn = Arc::new(Mutex::new(conn));
    let state = AppState::new(conn.clone(), &config.upload_dir, &config.local_timezone)?;

    let bot_task = match config.telegram_bot_token() {
        Some(token) => {
            let conversation =
                Conversation::new(conn, build_parser(&config)?, &config.upload_dir);
            let token = token.to_owned();
            Some(tokio::spawn(async move { run_bot(&token, conversation).await }))
        }
        None => {
            tracing::warn!("TELEGRAM_BOT_TOKEN is not set, the Telegram bot will not run.");
            None
        }
    };

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(
        build_router(state).layer(middleware::from_fn(logging_middleware)),
    );

    let addr = config.bind_address();
    tracing::info!("HTTP server listening on {}", addr);
    let result = axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await;

    if let Some(bot_task) = bot_task {
        tracing::info!("Stopping Telegram bot");
        bot_task.abort();
    }

    result?;
    Ok(())
}

fn build_parser(config: &Config) -> Result<ExpenseParser, Box<dyn Error>> {
    let model: Option<Arc<dyn ChatModel>> = match config.llm_api_key() {
        Some(api_key) => Some(Arc::new(ChatCompletionClient::new(
            &config.llm_base_url,
            api_key,
            &config.llm_model,
            config.llm_timeout(),
        )?)),
        None => {
            tracing::warn!("DEEPSEEK_API_KEY is not set, messages are parsed with keywords only.");
            None
        }
    };

    let ocr = CommandOcr::from_command_line(&config.ocr_command, config.ocr_timeout())?;
    let timezone = find_timezone(&config.local_timezone)?;

    Ok(ExpenseParser::new(model, Arc::new(ocr), timezone))
}

fn setup_logging(log_path: &Path) -> Result<(), Box<dyn Error>> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let log_file = OpenOptions::new().create(true).append(true).open(log_path)?;

    let debug_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Arc::new(log_file))
        .with_filter(filter::LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(debug_log)
        .init();

    Ok(())
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // Errors are logged by the error handlers, so `TraceLayer` does not need to log 5xx responses.
        .on_failure(());

    router.layer(tracing_layer)
}
