use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::update_listeners::polling_default;
use tg_courier::access::AccessVerifier;
use tg_courier::bot::DenialCooldown;
use tg_courier::bridge::http::WebhookState;
use tg_courier::bridge::{DeliveryMode, UpdateBridge, UpdateInjector};
use tg_courier::config::{
    Settings, ACCESS_CACHE_MAX_ENTRIES, PROBE_INTERVAL_SECS, UNAUTHORIZED_COOLDOWN_SECS,
    UNAUTHORIZED_MAX_ENTRIES, UNAUTHORIZED_TTL_SECS, WEBHOOK_PENDING_THRESHOLD,
    WEBHOOK_RECHECK_SECS,
};
use tg_courier::pipeline::AppContext;
use tg_courier::session::SessionCoordinator;
use tg_courier::storage::VolatileStore;
use tg_courier::{bridge, plugins};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting bot tokens from log output. The webhook
/// URL embeds the token as its path secret, so raw request logs would
/// otherwise leak it.
struct RedactionPatterns {
    url_token: Regex,
    bare_token: Regex,
    prefixed_token: Regex,
}

impl RedactionPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            url_token: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            bare_token: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            prefixed_token: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .url_token
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .bare_token
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .prefixed_token
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length to satisfy the contract even when the
        // redacted string differs in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile redaction patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting restricted-content courier bot...");

    let settings = init_settings();
    if let Err(e) = settings.parsed_api_id() {
        error!("API_ID must be an integer: {e}");
        std::process::exit(1);
    }
    init_directories(&settings).await;

    // Start the three platform identities. A mandatory identity failing to
    // start is the one unrecoverable condition.
    let coordinator = Arc::new(SessionCoordinator::new(settings.clone()));
    let handles = match coordinator.ensure_started().await {
        Ok(handles) => {
            info!("All identities started");
            handles
        }
        Err(e) => {
            error!("Critical error starting identities: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(AppContext {
        settings: settings.clone(),
        coordinator: Arc::clone(&coordinator),
        verifier: Arc::new(AccessVerifier::new(ACCESS_CACHE_MAX_ENTRIES)),
        store: Arc::new(VolatileStore::new()),
        shutdown: shutdown.clone(),
    });
    let cooldown = Arc::new(DenialCooldown::new(
        UNAUTHORIZED_COOLDOWN_SECS,
        UNAUTHORIZED_TTL_SECS,
        UNAUTHORIZED_MAX_ENTRIES,
    ));

    // Inbound update bridge and HTTP front door.
    let injector = UpdateInjector::new();
    let update_bridge = match UpdateBridge::new(
        handles.bot.clone(),
        injector.clone(),
        settings.webhook_url.as_deref(),
        &settings.bot_token,
        WEBHOOK_PENDING_THRESHOLD,
    ) {
        Ok(update_bridge) => Arc::new(update_bridge),
        Err(e) => {
            error!("Invalid webhook configuration: {e}");
            std::process::exit(1);
        }
    };
    spawn_http_front_door(&settings, injector, shutdown.clone());

    let mode = update_bridge.establish().await;
    spawn_maintenance(
        Arc::clone(&coordinator),
        Arc::clone(&update_bridge),
        mode,
        shutdown.clone(),
    );
    spawn_signal_watcher(shutdown.clone());

    // Assemble the dispatch tree from the plugin registry and run it on
    // the selected update source. Push and poll feed the same tree.
    let loaded = plugins::discover();
    let handler = plugins::build_handler(&loaded);
    let mut dispatcher = Dispatcher::builder(handles.bot.clone(), handler)
        .dependencies(dptree::deps![ctx, cooldown])
        .enable_ctrlc_handler()
        .build();

    info!("Bot is running...");
    let listener_error_handler =
        LoggingErrorHandler::with_custom_text("An error from the update listener");
    match mode {
        DeliveryMode::Push => {
            dispatcher
                .dispatch_with_listener(update_bridge.listener(), listener_error_handler)
                .await;
        }
        DeliveryMode::Poll => {
            let listener = polling_default(handles.bot.clone()).await;
            dispatcher
                .dispatch_with_listener(listener, listener_error_handler)
                .await;
        }
    }

    // Dispatcher stopped: cancel auxiliary tasks and let in-flight cleanup
    // drain.
    shutdown.cancel();
    info!("Shutdown complete");
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_directories(settings: &Settings) {
    for dir in [&settings.download_dir, &settings.thumb_dir] {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!(dir = %dir, "failed to create directory: {e}");
            std::process::exit(1);
        }
    }
}

fn spawn_http_front_door(
    settings: &Settings,
    injector: UpdateInjector,
    shutdown: CancellationToken,
) {
    let state = Arc::new(WebhookState {
        injector,
        bot_token: settings.bot_token.clone(),
    });
    let app = bridge::http::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind HTTP front door on {addr}: {e}");
                return;
            }
        };
        info!(%addr, "HTTP front door listening");
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!("HTTP front door error: {e}");
        }
    });
}

fn spawn_maintenance(
    coordinator: Arc<SessionCoordinator>,
    update_bridge: Arc<UpdateBridge>,
    mode: DeliveryMode,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut probe = tokio::time::interval(Duration::from_secs(PROBE_INTERVAL_SECS));
        let mut recheck = tokio::time::interval(Duration::from_secs(WEBHOOK_RECHECK_SECS));
        // Both intervals fire immediately on the first tick; skip those.
        probe.tick().await;
        recheck.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = probe.tick() => coordinator.probe().await,
                _ = recheck.tick() => {
                    if mode == DeliveryMode::Push {
                        update_bridge.requalify().await;
                    }
                }
            }
        }
    });
}

fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });
}
