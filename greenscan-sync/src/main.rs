//! greenscan - GreenScan sync client
//!
//! Follows live plant analyses in the realtime database and uploads new
//! images for analysis.
//!
//! - `home`: live cards for every tracked category
//! - `details <category>`: live view of one category
//! - `upload <category> <image>`: analyze an image and store the result
//!
//! Interactive views read commands from stdin: `r` retries after an error,
//! `d` dismisses it, `q` quits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use greenscan_common::config::{Environment, TomlConfig};
use greenscan_common::events::{SyncEvent, UploadState};
use greenscan_common::Category;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt};
use tracing_subscriber::{EnvFilter, Registry};

use greenscan_sync::media::{FileMediaSource, MediaKind};
use greenscan_sync::reconciler::ViewState;
use greenscan_sync::screen::{
    card_title, details_title, format_last_updated, LiveScreen, Route, UploadScreen,
};
use greenscan_sync::AppContext;

/// Command-line arguments for greenscan
#[derive(Parser, Debug)]
#[command(name = "greenscan")]
#[command(about = "GreenScan plant analysis sync client")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "GREENSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Realtime database URL (overrides config)
    #[arg(long, env = "GREENSCAN_DATABASE_URL")]
    database_url: Option<String>,

    /// Analysis backend URL for the active environment (overrides config)
    #[arg(long, env = "GREENSCAN_BACKEND_URL")]
    backend_url: Option<String>,

    /// Use an in-process store instead of the realtime database
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live analysis cards for every tracked category
    Home {
        /// Print once every category has loaded, then exit
        #[arg(long)]
        once: bool,
    },
    /// Live analysis of one category
    Details {
        category: Category,

        /// Print once the category has loaded, then exit
        #[arg(long)]
        once: bool,
    },
    /// Analyze an image and save the result
    Upload {
        category: Category,

        /// Image file to analyze
        image: PathBuf,

        /// Treat the image as a camera capture instead of a gallery pick
        #[arg(long)]
        camera: bool,
    },
}

/// Log filter until the configured level is known
const STARTUP_LOG_LEVEL: &str = "info";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Install the global subscriber
///
/// Returns a handle for applying the configured level, or None when
/// RUST_LOG is set (it then wins over the config file).
fn init_tracing() -> Option<FilterHandle> {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(STARTUP_LOG_LEVEL), false),
    };
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    (!from_env).then_some(handle)
}

fn apply_log_level(handle: &FilterHandle, level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid logging.level '{}'", level))?;
    handle.reload(filter).context("Failed to apply log level")?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing first so config resolution is logged
    let filter_handle = init_tracing();

    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(url) = &args.database_url {
        config.store.database_url = Some(url.clone());
    }
    if let Some(url) = &args.backend_url {
        match config.environment {
            Environment::Development => config.backend.development_url = url.clone(),
            Environment::Production => config.backend.production_url = Some(url.clone()),
        }
    }
    config.validate().context("Invalid configuration")?;

    if let Some(handle) = &filter_handle {
        apply_log_level(handle, &config.logging.level)?;
    }

    info!(
        "Starting greenscan v{} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let ctx = AppContext::from_config(config, args.offline)
        .context("Failed to initialize client")?;

    match args.command {
        Command::Home { once } => {
            let screen = LiveScreen::home(ctx.store.clone(), ctx.root_path(), ctx.categories());
            run_live(screen, once).await
        }
        Command::Details { category, once } => {
            let screen = LiveScreen::details(ctx.store.clone(), ctx.root_path(), category);
            run_live(screen, once).await
        }
        Command::Upload {
            category,
            image,
            camera,
        } => run_upload(&ctx, category, image, camera).await,
    }
}

enum Action {
    Render(ViewState),
    Retry,
    Dismiss,
    Ignore,
    Quit,
}

/// Drive a live screen until quit, Ctrl+C, or (with `once`) first full load
async fn run_live(mut screen: LiveScreen, once: bool) -> Result<()> {
    let route = screen.route();
    render(route, screen.state());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = !once;

    loop {
        let action = tokio::select! {
            state = screen.next_state() => match state {
                Some(state) => Action::Render(state.clone()),
                None => Action::Quit,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "r" => Action::Retry,
                    "d" => Action::Dismiss,
                    "q" => Action::Quit,
                    "" => Action::Ignore,
                    other => {
                        warn!("Unknown command '{}' (r = retry, d = dismiss, q = quit)", other);
                        Action::Ignore
                    }
                },
                Ok(None) | Err(_) => {
                    stdin_open = false;
                    Action::Ignore
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving screen");
                Action::Quit
            }
        };

        match action {
            Action::Render(state) => {
                render(route, &state);
                if once && screen.is_settled() {
                    break;
                }
            }
            Action::Ignore => {}
            Action::Retry => {
                let state = screen.retry().clone();
                render(route, &state);
            }
            Action::Dismiss => {
                let state = screen.dismiss_error().clone();
                render(route, &state);
            }
            Action::Quit => break,
        }
    }

    let failed = once && screen.state().error.is_some();
    screen.leave();
    if failed {
        bail!("Failed to load data");
    }
    Ok(())
}

fn render(route: Route, state: &ViewState) {
    match route {
        Route::Details(category) => println!("== {} ==", details_title(category)),
        _ => println!("== GreenScan =="),
    }

    if state.loading {
        println!("Loading...");
    }

    for entity in &state.entities {
        if matches!(route, Route::Details(_)) {
            if let Some(image) = &entity.image_reference {
                println!("Image: {} bytes", image.len());
            }
        } else {
            println!("[{}]", card_title(entity.category));
        }
        println!("  {}", entity.analysis_text);
        println!("  Last updated: {}", format_last_updated(entity.last_updated_at));
    }

    if let Some(error) = &state.error {
        println!("Error: {} (r to retry, d to dismiss)", error);
    }
    println!();
}

/// Pick the image, submit it, then show the details screen once
async fn run_upload(
    ctx: &AppContext,
    category: Category,
    image: PathBuf,
    camera: bool,
) -> Result<()> {
    let kind = if camera { MediaKind::Camera } else { MediaKind::Gallery };
    let media = Arc::new(FileMediaSource::new(image));

    let mut progress = ctx.event_bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            if let SyncEvent::UploadStateChanged { new_state, .. } = event {
                match new_state {
                    UploadState::ImageSelected => println!("Image selected"),
                    UploadState::Uploading => println!("Processing..."),
                    UploadState::Succeeded => println!("Analysis saved"),
                    UploadState::Failed => println!("Upload failed"),
                    UploadState::Idle => {}
                }
            }
        }
    });

    let mut screen = UploadScreen::enter(category, ctx.root_path(), media, ctx.event_bus.clone());
    let route = if screen.pick_image(kind).await {
        screen
            .submit(ctx.store.clone(), ctx.analysis.clone())
            .await
    } else {
        None
    };

    let error = screen.session().error_message();
    screen.leave();
    // let the printer drain pending transitions
    tokio::task::yield_now().await;
    printer.abort();

    match (route, error) {
        (Some(Route::Details(category)), _) => {
            let details = LiveScreen::details(ctx.store.clone(), ctx.root_path(), category);
            run_live(details, true).await
        }
        (_, Some(message)) => bail!(message),
        _ => bail!("Upload did not complete"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_startup_filter_then_configured_level() {
        let captured = Captured::default();
        let writer = captured.clone();
        let (filter, handle) = reload::Layer::new(EnvFilter::new(STARTUP_LOG_LEVEL));
        let subscriber = tracing_subscriber::registry().with(filter).with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            warn!("No config file found, using built-in defaults");
            tracing::debug!("hidden at startup");

            apply_log_level(&handle, "debug").unwrap();
            tracing::debug!("shown after config");
        });

        let text = captured.text();
        assert!(text.contains("No config file found"));
        assert!(!text.contains("hidden at startup"));
        assert!(text.contains("shown after config"));
    }

    #[test]
    fn test_invalid_configured_level_rejected() {
        let (_filter, handle): (reload::Layer<EnvFilter, Registry>, _) =
            reload::Layer::new(EnvFilter::new(STARTUP_LOG_LEVEL));
        assert!(apply_log_level(&handle, "greenscan=verbose").is_err());
    }
}
