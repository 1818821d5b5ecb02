use std::path::Path;
use std::sync::Arc;

use parley_agent::ClaudeCli;
use parley_brain::scheduler::Scheduler;
use parley_brain::store::SessionStore;
use parley_brain::{Controller, ControllerSettings};
use parley_core::config::Config;
use parley_core::error::Result;
use parley_store::Store;
use parley_telegram::bot::TelegramBot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn fatal(msg: &str, e: impl std::fmt::Display) -> ! {
    error!(error = %e, "{msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("PARLEY_CONFIG").unwrap_or_else(|_| "parley.toml".to_string());

    let config = Config::load(Path::new(&config_path))
        .unwrap_or_else(|e| fatal("failed to load config", e));

    if config.telegram.token.is_empty() {
        fatal("telegram token missing", "set PARLEY_TELEGRAM_TOKEN");
    }
    if config.telegram.allowed_user_ids.is_empty() {
        warn!("no allowed users configured, every message will be ignored");
    }

    info!(config = %config_path, "parley: starting");

    let store = Store::open(&config.database.path)
        .await
        .unwrap_or_else(|e| fatal("failed to open database", e));
    store
        .init()
        .await
        .unwrap_or_else(|e| fatal("failed to initialize database", e));
    let store: Arc<dyn SessionStore> = Arc::new(store);

    let bot = TelegramBot::new(config.telegram.token.clone());
    match bot.get_me().await {
        Ok(me) => info!(
            username = me.username.as_deref().unwrap_or("?"),
            "connected to telegram"
        ),
        Err(e) => warn!(error = %e, "could not reach telegram, will keep retrying"),
    }

    let controller = Arc::new(Controller::new(
        Arc::new(bot.clone()),
        Arc::new(ClaudeCli::from_config(&config.agent)),
        Arc::clone(&store),
        ControllerSettings::from_config(&config),
    ));

    let scheduler = if config.scheduler.tasks.is_empty() {
        None
    } else {
        Some(
            Scheduler::from_config(Arc::clone(&controller), &config.scheduler)
                .unwrap_or_else(|e| fatal("invalid scheduler config", e)),
        )
    };

    let http = config.http.clone();
    let http_controller = Arc::clone(&controller);

    tokio::select! {
        result = parley_brain::telegram::run_poller(
            controller,
            bot,
            store,
            config.telegram.poll_timeout_secs,
        ) => exit_on_error("telegram poller", result),
        _ = async {
            match scheduler {
                Some(s) => s.run().await,
                None => std::future::pending::<()>().await,
            }
        } => {}
        result = async {
            if http.enabled {
                parley_brain::http::serve(http.port, http_controller, http.api_token).await
            } else {
                std::future::pending::<Result<()>>().await
            }
        } => exit_on_error("http server", result),
        _ = tokio::signal::ctrl_c() => {
            info!("parley: shutting down");
        }
    }
}

fn exit_on_error(component: &str, result: Result<()>) {
    if let Err(e) = result {
        fatal(&format!("{component} stopped"), e);
    }
}
