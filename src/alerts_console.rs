use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_style;

use cli_style::{get_styles, print_alert, print_alerts, print_badge, print_stream_status};

use medtracker_alerts::config::ConnectionArgs;
use medtracker_alerts::notifications::display::local_now;
use medtracker_alerts::notifications::StoreError;
use medtracker_alerts::session::SessionState;
use medtracker_alerts::App;

use rustyline::{
    completion::Completer,
    highlight::Highlighter,
    history::FileHistory,
    validate::Validator,
    CompletionType, Config, Editor, Helper,
};

/// Interactive console over the live medicine alerts.
#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Parser)]
#[command(styles=get_styles(),name = "")]
struct InnerCli {
    #[command(subcommand)]
    command: InnerCommand,
}

#[derive(Subcommand)]
enum InnerCommand {
    /// Shows every held alert, newest pushes first.
    List,

    /// Fetches the alert history and unread count again.
    Refresh,

    /// Marks the alert with the given id as read.
    Read { id: String },

    /// Marks every alert as read.
    ReadAll,

    /// Shows the session, the stream state and the unread badge.
    Status,

    /// Logs in and switches the stream to the new user.
    Login { email: String, password: String },

    /// Logs out and tears the stream down.
    Logout,

    /// Close this program.
    Exit,
}

enum CommandExecutionResult {
    Ok,
    Exit,
    Error(String),
}

const PROMPT: &str = ">> ";

fn describe_store_error(err: StoreError) -> String {
    match err {
        StoreError::Api(api) if api.is_unauthorized() => {
            format!("{}. The session expired, please log in again.", api)
        }
        other => other.to_string(),
    }
}

fn execute_command(line: String, app: &App, runtime: &Runtime) -> CommandExecutionResult {
    if line.is_empty() {
        return CommandExecutionResult::Ok;
    }

    let args =
        shlex::split(&line).unwrap_or_else(|| line.split_whitespace().map(String::from).collect());

    let cli = InnerCli::try_parse_from(std::iter::once(" ").chain(args.iter().map(String::as_str)));

    match cli {
        Ok(cli) => match cli.command {
            InnerCommand::List => {
                print_alerts(&app.store.records(), local_now());
                print_badge(app.store.unread_count());
            }
            InnerCommand::Refresh => {
                if app.session.user_id().is_none() {
                    return CommandExecutionResult::Error("Not logged in.".to_string());
                }
                if let Err(err) = runtime.block_on(app.store.load_baseline()) {
                    return CommandExecutionResult::Error(describe_store_error(err));
                }
                print_badge(app.store.unread_count());
            }
            InnerCommand::Read { id } => match runtime.block_on(app.store.mark_read(&id)) {
                Ok(true) => print_badge(app.store.unread_count()),
                Ok(false) => println!("Nothing to do for alert {}", id),
                Err(err) => return CommandExecutionResult::Error(describe_store_error(err)),
            },
            InnerCommand::ReadAll => match runtime.block_on(app.store.mark_all_read()) {
                Ok(true) => print_badge(app.store.unread_count()),
                Ok(false) => println!("No unread alerts"),
                Err(err) => return CommandExecutionResult::Error(describe_store_error(err)),
            },
            InnerCommand::Status => {
                match app.session.state() {
                    SessionState::Unresolved => println!("Session: unresolved"),
                    SessionState::Absent => println!("Session: logged out"),
                    SessionState::Active(session) => {
                        println!("Session: {} ({})", session.user_id, session.email)
                    }
                }
                print_stream_status(&app.stream_status());
                print_badge(app.store.unread_count());
            }
            InnerCommand::Login { email, password } => {
                match runtime.block_on(app.login(&email, &password)) {
                    Ok(session) => println!("Logged in as {}", session.user_id),
                    Err(err) => return CommandExecutionResult::Error(format!("{:#}", err)),
                }
            }
            InnerCommand::Logout => {
                app.logout();
                println!("Logged out");
            }
            InnerCommand::Exit => return CommandExecutionResult::Exit,
        },

        Err(e) => {
            if let Err(_) = e.print() {
                println!("{}", e);
            }
        }
    }
    CommandExecutionResult::Ok
}

#[derive(rustyline_derive::Hinter)]
struct ConsoleHelper {
    commands_names: Vec<String>,
}

impl ConsoleHelper {
    pub fn new() -> Self {
        let commands_names: Vec<String> = InnerCli::command()
            .get_subcommands()
            .map(|sc| sc.get_name().to_string())
            .collect();

        ConsoleHelper { commands_names }
    }
}

impl Completer for ConsoleHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if line.contains(" ") {
            return Ok((0, Vec::with_capacity(0)));
        }
        let matches = self
            .commands_names
            .iter()
            .filter(|c| c.starts_with(line))
            .map(|c| c.to_string())
            .collect::<Vec<_>>();

        Ok((0, matches))
    }
}

impl Highlighter for ConsoleHelper {}
impl Validator for ConsoleHelper {}
impl Helper for ConsoleHelper {}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let config = cli_args.connection.resolve()?;

    let runtime = Runtime::new().context("Failed to start the async runtime")?;
    let app = {
        let _guard = runtime.enter();
        App::start(&config)?
    };

    let mut pushes = app.store.subscribe_pushes();
    let store = app.store.clone();
    runtime.spawn(async move {
        loop {
            match pushes.recv().await {
                Ok(record) => {
                    println!();
                    print_alert(&record, local_now());
                    print_badge(store.unread_count());
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    InnerCli::command().print_long_help()?;

    let rl_config = Config::builder()
        .completion_type(CompletionType::List)
        .build();

    let mut rl = Editor::<ConsoleHelper, FileHistory>::with_config(rl_config)?;
    rl.set_helper(Some(ConsoleHelper::new()));

    loop {
        let readline = rl.readline(PROMPT);

        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);
                match execute_command(line, &app, &runtime) {
                    CommandExecutionResult::Ok => {}
                    CommandExecutionResult::Exit => {
                        break;
                    }
                    CommandExecutionResult::Error(err) => {
                        eprintln!("Error: {}", err);
                        continue;
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("CTRL-D: exiting.");
                break;
            }
            Err(e) => {
                println!("Error: {:?}", e);
                break;
            }
        }
    }

    runtime.block_on(app.shutdown());
    Ok(())
}
