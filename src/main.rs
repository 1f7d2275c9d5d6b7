use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use medtracker_alerts::config::ConnectionArgs;
use medtracker_alerts::notifications::display::local_now;
use medtracker_alerts::{App, UserId};

mod cli_style;
use cli_style::{get_styles, print_alert, print_alerts, print_badge, print_stream_status};

/// Follows the live medicine alerts of a user and prints them as they arrive.
#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Log in with this email instead of using a configured token.
    #[clap(long, requires = "password")]
    pub email: Option<String>,

    /// Password for --email.
    #[clap(long, env = "MEDTRACKER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let config = cli_args.connection.resolve()?;
    info!(
        "Using API at {} and broker at {}",
        config.api_url, config.stream.ws_url
    );

    let app = App::start(&config)?;

    if let (Some(email), Some(password)) = (&cli_args.email, &cli_args.password) {
        let session = app.login(email, password).await?;
        info!("Logged in as {} ({})", session.email, session.user_id);
    } else if config.session.is_none() {
        warn!("No credentials configured, nothing to follow. Use --token/--user-id or --email.");
    }

    let result = follow(&app).await;
    app.shutdown().await;
    result
}

async fn follow(app: &App) -> Result<()> {
    let mut pushes = app.store.subscribe_pushes();
    let mut unread = app.store.subscribe_unread();
    let mut status = app.watch_stream();
    let mut listed: Option<UserId> = None;
    if app.store.has_baseline() {
        print_alerts(&app.store.records(), local_now());
        print_badge(app.store.unread_count());
        listed = app.store.owner();
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, shutting down");
                return Ok(());
            }
            push = pushes.recv() => match push {
                Ok(record) => {
                    print_alert(&record, local_now());
                    print_badge(app.store.unread_count());
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} pushed alerts while printing", skipped);
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            changed = unread.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let owner = app.store.owner();
                if owner.is_some() && owner != listed && app.store.has_baseline() {
                    print_alerts(&app.store.records(), local_now());
                    listed = owner;
                }
                print_badge(*unread.borrow_and_update());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = status.borrow_and_update().clone();
                print_stream_status(&current);
            }
        }
    }
}
