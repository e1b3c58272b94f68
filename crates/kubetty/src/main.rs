use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use kubetty::session::{
    AuthMode, Session, SessionRequest, SessionService, TerminalConfig, plan_session,
};

const APP_NAME: &str = "kubetty";

/// Env overrides look like `KUBETTY__TERMINAL__NAMESPACE`.
const ENV_PREFIX: &str = "KUBETTY";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_create(ctx: RuntimeContext, cmd: CreateCommand) -> Result<()> {
    handle_create(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("config file: {}", ctx.paths.config_file.display());

    match cli.command {
        Command::Create(cmd) => async_create(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "kubetty - per-user web terminals on Kubernetes.",
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
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Print what would be created without touching the cluster or disk
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
    /// Provision a terminal session
    Create(CreateCommand),
    /// Create the config directory and default config file
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
struct CreateCommand {
    /// User name exported to the terminal
    #[arg(long, env = "KUBETTY_USER", default_value = "")]
    user: String,
    /// User token exported to the terminal (token mode)
    #[arg(long, env = "KUBETTY_USER_TOKEN", hide_env_values = true, default_value = "")]
    token: String,
    /// API server address exported to the terminal (token mode)
    #[arg(long)]
    apiserver: Option<String>,
    /// The user's namespace, exported to the terminal
    #[arg(long, default_value = "default")]
    namespace: String,
    /// How the terminal authenticates: token or kubeconfig
    #[arg(long, default_value = "token")]
    auth_mode: AuthMode,
    /// Kubeconfig to mount into the terminal (kubeconfig mode)
    #[arg(long, value_name = "PATH")]
    kubeconfig: Option<PathBuf>,
    /// Terminal container image
    #[arg(long)]
    image: Option<String>,
}

impl CreateCommand {
    fn into_request(self) -> Result<SessionRequest> {
        let kubeconfig_path = self.kubeconfig.map(expand_path).transpose()?;
        Ok(SessionRequest {
            user: self.user,
            user_token: self.token,
            apiserver: self.apiserver,
            namespace: self.namespace,
            auth_mode: self.auth_mode,
            kubeconfig_path,
            image: self.image,
        })
    }
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
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&paths, &common)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level}")));

        // Logs go to stderr so stdout stays parseable with --json/--yaml.
        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.trace),
                )
                .try_init()
                .ok();
        }

        // The library logs through the log crate.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self { config_file })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    terminal: TerminalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

async fn handle_create(ctx: &RuntimeContext, cmd: CreateCommand) -> Result<()> {
    let request = cmd.into_request()?;
    let config = ctx.config.terminal.clone();

    if ctx.common.dry_run {
        // Token and kubeconfig contents never reach stdout.
        let plan = plan_session(&config, &request)
            .await
            .context("building terminal manifests")?
            .redacted();
        info!("dry-run: would create the following objects in {}", plan.namespace);
        // Manifests read best as YAML when no format was asked for.
        let format = match ctx.common.format() {
            OutputFormat::Text => OutputFormat::Yaml,
            other => other,
        };
        println!("{}", render(&plan, format)?.unwrap_or_default());
        return Ok(());
    }

    let span = tracing::info_span!(
        "create_session",
        user = %request.user,
        auth_mode = %request.auth_mode
    );
    let service = SessionService::connect(&request, config)
        .with_context(|| format!("connecting to the cluster ({} mode)", request.auth_mode))?;
    let session = service
        .create(&request)
        .instrument(span)
        .await
        .context("provisioning terminal session")?;

    print_session(ctx, &session)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl CommonOpts {
    fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else if self.yaml {
            OutputFormat::Yaml
        } else {
            OutputFormat::Text
        }
    }
}

/// Serialize `value` for stdout. `None` for [`OutputFormat::Text`], which
/// each command renders itself.
fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<Option<String>> {
    let output = match format {
        OutputFormat::Text => return Ok(None),
        OutputFormat::Json => serde_json::to_string_pretty(value).context("serializing to JSON")?,
        OutputFormat::Yaml => serde_yaml::to_string(value).context("serializing to YAML")?,
    };
    Ok(Some(output))
}

fn print_session(ctx: &RuntimeContext, session: &Session) -> Result<()> {
    let output = if let Some(output) = render(session, ctx.common.format())? {
        output
    } else {
        let mut text = format!(
            "terminal:   {}\nendpoint:   {}\nnamespace:  {}\ndeployment: {}\nservice:    {}",
            session.id, session.endpoint, session.namespace, session.deployment, session.service
        );
        if let Some(ref secret) = session.secret {
            text.push_str(&format!("\nsecret:     {secret}"));
        }
        text
    };

    println!("{output}");
    Ok(())
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

    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let output = render(&ctx.config, ctx.common.format())?
                .unwrap_or_else(|| format!("{:#?}", ctx.config));
            println!("{output}");
            Ok(())
        }
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
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn load_or_init_config(paths: &AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut config: AppConfig = built.try_deserialize()?;
    config.terminal.default_kubeconfig = expand_path(config.terminal.default_kubeconfig)?;

    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# {APP_NAME} configuration ({})\n\
         # Any key can be overridden from the environment, e.g.\n\
         # {ENV_PREFIX}__TERMINAL__NAMESPACE=terminals\n\n",
        path.display()
    )
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}
