use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{debug, info, warn};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use helios::config::{self, APP_NAME, AppConfig, AppPaths};
use helios::logging::{self, LogSettings};
use helios::protocol::OutboundMessage;
use helios::realtime::{Endpoint, RealtimeChannel, StoreDispatcher, WsConnector};
use helios::storage::{StateStorage, create_storage};
use helios::store::{AppState, Store};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_watch(ctx: RuntimeContext, cmd: WatchCommand) -> Result<()> {
    handle_watch(&ctx, cmd).await
}

#[tokio::main]
async fn async_send(ctx: RuntimeContext, cmd: SendCommand) -> Result<()> {
    handle_send(&ctx, cmd).await
}

#[tokio::main]
async fn async_state(ctx: RuntimeContext, command: StateCommand) -> Result<()> {
    handle_state(&ctx, command).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    match cli.command {
        Command::Watch(cmd) => async_watch(ctx, cmd),
        Command::Send(cmd) => async_send(ctx, cmd),
        Command::State { command } => async_state(ctx, command),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Helios - realtime client for the Helios agent service.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Print state and messages as JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Print state as YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// When to colour log output
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Report what would be written or sent without doing it
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow a realtime stream and report state changes until Ctrl-C
    Watch(WatchCommand),
    /// Send one message over a realtime stream
    Send(SendCommand),
    /// Inspect or clear the persisted client state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ScopeArgs {
    /// User stream to follow (defaults to session.user_id)
    #[arg(long, value_name = "ID")]
    user: Option<String>,
    /// Task conversation stream to follow (wins over --user)
    #[arg(long, value_name = "ID")]
    task: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct WatchCommand {
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Clone, Args)]
struct SendCommand {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Event name, e.g. USER_MESSAGE
    #[arg(long, value_name = "NAME")]
    event: String,
    /// JSON payload
    #[arg(long, value_name = "JSON")]
    payload: Option<String>,
}

#[derive(Debug, Subcommand)]
enum StateCommand {
    /// Print the persisted state
    Show,
    /// Forget the persisted state
    Clear,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone()).context("resolving paths")?;
        let config = load_or_init_config(&paths, &common)?;
        let paths = paths
            .apply_overrides(&config)
            .context("applying path overrides")?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        let ansi = match self.common.color {
            ColorOption::Always => true,
            ColorOption::Never => false,
            ColorOption::Auto => env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal(),
        };
        let settings = LogSettings {
            level: logging::resolve_level(
                self.common.quiet,
                self.common.verbose,
                &self.config.logging.level,
            ),
            json: self.common.json,
            ansi,
            file: self.config.logging.file_path(),
        };
        logging::init(&settings).with_context(|| match &settings.file {
            Some(path) => format!("opening log file {}", path.display()),
            None => "initialising logging".to_string(),
        })
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure data dir {} and state dir {}",
                self.paths.data_dir.display(),
                self.paths.state_dir.display()
            );
            return Ok(());
        }

        std::fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        std::fs::create_dir_all(&self.paths.state_dir).with_context(|| {
            format!(
                "creating state directory {}",
                self.paths.state_dir.display()
            )
        })?;
        Ok(())
    }

    fn endpoint(&self, scope: &ScopeArgs) -> Result<Endpoint> {
        let user = scope
            .user
            .as_deref()
            .or(self.config.session.user_id.as_deref());
        Endpoint::for_scope(user, scope.task.as_deref())
            .ok_or_else(|| anyhow!("no stream selected (use --user, --task or set session.user_id)"))
    }

    fn storage(&self) -> Result<Arc<dyn StateStorage>> {
        let storage_config = self
            .config
            .storage_config(&self.paths)
            .context("resolving storage location")?;
        Ok(create_storage(storage_config))
    }

    fn emit<T: serde::Serialize + std::fmt::Debug>(&self, value: &T) -> Result<()> {
        if self.common.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("serializing output to JSON")?
            );
        } else if self.common.yaml {
            println!(
                "{}",
                serde_yaml::to_string(value).context("serializing output to YAML")?
            );
        } else {
            println!("{value:#?}");
        }
        Ok(())
    }
}

fn load_or_init_config(paths: &AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            config::write_default_config(&paths.config_file)
                .context("writing default config")?;
        }
    }

    config::load_config(&paths.config_file)
        .with_context(|| format!("loading config from {}", paths.config_file.display()))
}

async fn handle_watch(ctx: &RuntimeContext, cmd: WatchCommand) -> Result<()> {
    let endpoint = ctx.endpoint(&cmd.scope)?;
    let store = Store::open(ctx.storage()?).await;
    let dispatcher = StoreDispatcher::new(store.clone(), endpoint.task_id().map(str::to_string));
    let channel = RealtimeChannel::spawn(
        ctx.config.channel_config(endpoint),
        Arc::new(WsConnector),
        Arc::new(dispatcher),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, closing channel");
        }
        on_signal.cancel();
    });

    channel.connect().await;

    let mut previous = store.snapshot();
    let mut updates = WatchStream::from_changes(store.subscribe());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = updates.next() => match next {
                Some(state) => {
                    report_changes(ctx, &previous, &state)?;
                    previous = state;
                }
                None => break,
            },
        }
    }

    channel.shutdown().await;
    Ok(())
}

/// Print what changed between two snapshots.
fn report_changes(ctx: &RuntimeContext, before: &AppState, after: &AppState) -> Result<()> {
    let connection_changed = before.connection.state != after.connection.state
        || before.connection.exhausted != after.connection.exhausted;
    if connection_changed {
        let connection = &after.connection;
        if connection.exhausted {
            warn!("Connection gave up after {} attempts", connection.retries);
        } else {
            info!("Connection {}", connection.state);
        }
    }

    if before.system_status != after.system_status {
        let status = &after.system_status;
        match &status.details {
            Some(details) => info!("System status: {} ({})", status.status, details),
            None => info!("System status: {}", status.status),
        }
    }

    for message in after
        .agent_messages
        .iter()
        .filter(|m| !before.agent_messages.contains(m))
    {
        if ctx.common.json {
            println!(
                "{}",
                serde_json::to_string(message).context("serializing message to JSON")?
            );
        } else {
            println!(
                "[{}] {}: {}",
                message.timestamp.format("%H:%M:%S"),
                message.agent_name.as_deref().unwrap_or("agent"),
                message.content
            );
        }
    }

    if before.tasks != after.tasks {
        info!("Tasks updated ({} total)", after.tasks.len());
    }
    if before.plans != after.plans {
        info!("Plans updated ({} total)", after.plans.len());
    }
    if after.feedback.len() > before.feedback.len() {
        info!("Feedback processed ({} total)", after.feedback.len());
    }
    Ok(())
}

async fn handle_send(ctx: &RuntimeContext, cmd: SendCommand) -> Result<()> {
    let endpoint = ctx.endpoint(&cmd.scope)?;
    let message = match cmd.payload.as_deref() {
        Some(text) => {
            let payload = serde_json::from_str(text).context("parsing --payload as JSON")?;
            OutboundMessage::new(cmd.event, payload)
        }
        None => OutboundMessage {
            event: cmd.event,
            payload: None,
        },
    };

    if ctx.common.dry_run {
        info!(
            "dry-run: would send {} to {}",
            message.to_json().context("serializing message")?,
            endpoint
        );
        return Ok(());
    }

    let channel_config = ctx.config.channel_config(endpoint.clone());
    let connect_timeout = channel_config.connect_timeout;
    let channel = RealtimeChannel::spawn(
        channel_config,
        Arc::new(WsConnector),
        Arc::new(StoreDispatcher::new(
            Store::new(),
            endpoint.task_id().map(str::to_string),
        )),
    );

    channel.connect().await;
    if !channel.wait_until_open(connect_timeout).await {
        channel.shutdown().await;
        bail!("could not connect to {endpoint} within {connect_timeout:?}");
    }

    let result = channel.send(&message).await;
    channel.shutdown().await;
    result.with_context(|| format!("sending {} to {endpoint}", message.event))?;

    info!("Sent {} to {}", message.event, endpoint);
    Ok(())
}

async fn handle_state(ctx: &RuntimeContext, command: StateCommand) -> Result<()> {
    let storage = ctx.storage()?;
    match command {
        StateCommand::Show => {
            let state = storage
                .load()
                .await
                .with_context(|| format!("reading state from {}", storage.location()))?
                .unwrap_or_default();
            ctx.emit(&state)
        }
        StateCommand::Clear => {
            if ctx.common.dry_run {
                info!("dry-run: would clear state at {}", storage.location());
                return Ok(());
            }
            storage
                .clear()
                .await
                .with_context(|| format!("clearing state at {}", storage.location()))?;
            info!("Cleared state at {}", storage.location());
            Ok(())
        }
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    config::write_default_config(&ctx.paths.config_file).context("writing default config")
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => ctx.emit(&ctx.config),
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            config::write_default_config(&ctx.paths.config_file).context("writing default config")
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}
