mod config;
mod credentials;
mod forge;
mod health;
mod http;
mod links;
mod metrics;
mod repo;
mod solution;
mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::forge::github::GitHubApi;
use crate::metrics::MetricsRegistry;
use crate::repo::{FileWrite, RepositoryRef};
use crate::solution::Problem;
use crate::writer::{RemoteFileWriter, WriterSettings, DEFAULT_BRANCH};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "codesave",
    version,
    about = "Save solutions to a hosted git repository"
)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply without one.
    #[arg(short, long, env = "CODESAVE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Access token. Overrides the environment variable named in config.
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Problem metadata that places a solution in the weekly folder layout.
#[derive(Args, Debug, Default)]
struct ProblemArgs {
    /// Problem slug, e.g. `two-sum`. Used for the remote path when --path is absent.
    #[arg(long)]
    slug: Option<String>,
    #[arg(long)]
    question_id: Option<String>,
    #[arg(long)]
    title: Option<String>,
    /// Editor language. Defaults to the local file's extension.
    #[arg(long)]
    language: Option<String>,
}

impl ProblemArgs {
    fn into_problem(self, file: &Path) -> Option<Problem> {
        let slug = self.slug.filter(|s| !s.trim().is_empty())?;
        let language = self.language.or_else(|| {
            file.extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_string)
        });
        Some(Problem {
            slug,
            question_id: self.question_id,
            title: self.title,
            language,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the token is accepted and report write access.
    Verify {
        /// `owner/name` or repository URL; defaults to target.repository.
        #[arg(short, long)]
        repository: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Create or update one file.
    Write {
        #[arg(short, long)]
        repository: Option<String>,
        /// Local file to upload; `-` reads standard input.
        #[arg(short, long)]
        file: PathBuf,
        /// Remote path. Defaults to the solution path for --slug, else the
        /// file name, under target.path_prefix.
        #[arg(short, long)]
        path: Option<String>,
        /// Commit message. Empty uses the problem title or commit.default_message.
        #[arg(short, long, default_value = "")]
        message: String,
        /// Branch to write to instead of the repository default.
        #[arg(short, long)]
        branch: Option<String>,
        #[command(flatten)]
        problem: ProblemArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print a prefilled "create new file" link for manual upload.
    NewFileUrl {
        #[arg(short, long)]
        repository: Option<String>,
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long)]
        path: Option<String>,
        /// Defaults to the repository's default branch when a token is available.
        #[arg(short, long)]
        branch: Option<String>,
        #[command(flatten)]
        problem: ProblemArgs,
    },
    /// Run the HTTP commit server.
    Serve {
        /// Overrides server.listen.
        #[arg(long)]
        listen: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared by the commit server's handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: MetricsRegistry,
    pub http_client: reqwest::Client,
    pub writer: Arc<RemoteFileWriter>,
    /// `--token`, if given; otherwise the token is read from the environment
    /// on every request.
    pub token_override: Option<String>,
    /// Key callers must present, when `server.api_key_env` is configured.
    pub api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn init_tracing(format: LogFormat) {
    let json = (format == LogFormat::Json)
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text = (format == LogFormat::Text)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json)
        .with(text)
        .init();
}

fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(&config.upstream.user_agent)
        .timeout(Duration::from_secs(config.upstream.request_timeout_secs))
        .build()
        .context("failed to build reqwest client")
}

fn build_writer(
    config: &Config,
    http_client: reqwest::Client,
    metrics: &MetricsRegistry,
) -> RemoteFileWriter {
    let api = GitHubApi::new(&config.upstream, http_client, metrics.clone());
    RemoteFileWriter::new(
        Arc::new(api),
        WriterSettings::from(&config.commit),
        metrics.clone(),
    )
}

fn resolve_repository(arg: Option<&str>, config: &Config) -> Result<RepositoryRef> {
    match arg {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("invalid repository `{arg}`")),
        None => config
            .target
            .repository
            .clone()
            .context("no repository given: pass --repository or set target.repository"),
    }
}

async fn read_input(file: &Path) -> Result<Vec<u8>> {
    if file == Path::new("-") {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("failed to read standard input")?;
        return Ok(buf);
    }
    tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))
}

/// Explicit remote path, else the solution path for `problem`, else the
/// local file name, the latter two under the configured prefix.
fn remote_path(
    explicit: Option<String>,
    problem: Option<&Problem>,
    file: &Path,
    config: &Config,
    today: NaiveDate,
) -> Result<String> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(problem) = problem {
        return Ok(config.target.remote_path(&problem.relative_path(today)?));
    }
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| *n != "-")
        .context("cannot derive a remote path from this input; pass --path")?;
    Ok(config.target.remote_path(name))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run_verify(
    config: &Config,
    token: Option<&str>,
    repository: Option<String>,
    json: bool,
) -> Result<()> {
    let repo = resolve_repository(repository.as_deref(), config)?;
    let (credential, _) = credentials::resolve_credential(&config.credentials, token)?;
    let metrics = MetricsRegistry::new();
    let writer = build_writer(config, build_http_client(config)?, &metrics);

    let verification = writer
        .verify(&repo, &credential)
        .await
        .with_context(|| format!("verification against {repo} failed"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verification)?);
    } else {
        let access = match verification.writable {
            Some(true) => "yes",
            Some(false) => "no",
            None => "unknown",
        };
        println!(
            "{repo}: token accepted ({}), write access: {access}, default branch: {}",
            verification.scheme.as_str(),
            verification.default_branch
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_write(
    config: &Config,
    token: Option<&str>,
    repository: Option<String>,
    file: PathBuf,
    path: Option<String>,
    message: String,
    branch: Option<String>,
    problem: ProblemArgs,
    json: bool,
) -> Result<()> {
    let repo = resolve_repository(repository.as_deref(), config)?;
    let (credential, _) = credentials::resolve_credential(&config.credentials, token)?;
    let content = read_input(&file).await?;
    let problem = problem.into_problem(&file);
    let path = remote_path(path, problem.as_ref(), &file, config, solution::today())?;
    let message = match &problem {
        Some(problem) if message.trim().is_empty() => problem.commit_message(),
        _ => message,
    };

    let mut write = FileWrite::new(&path, content, message)?;
    if let Some(branch) = branch {
        write = write.on_branch(branch);
    }

    let metrics = MetricsRegistry::new();
    let writer = build_writer(config, build_http_client(config)?, &metrics);

    match writer.write(&repo, &write, &credential).await {
        Ok(outcome) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "{} (branch {}, {})",
                    outcome.target_ref,
                    outcome.branch,
                    outcome.route.as_str()
                );
            }
            Ok(())
        }
        Err(err) => {
            for line in err.diagnostics() {
                eprintln!("remote said: {line}");
            }
            // The manual link carries the content in its query string.
            if let Ok(text) = std::str::from_utf8(write.content()) {
                let branch = match write.branch() {
                    Some(branch) => branch.to_string(),
                    None => writer.default_branch(&repo, &credential).await,
                };
                match links::new_file_url(writer.web_url(), &repo, &branch, write.path(), text) {
                    Ok(url) => eprintln!("create the file manually: {url}"),
                    Err(e) => tracing::warn!(error = %e, "could not build manual fallback link"),
                }
            }
            Err(err).with_context(|| format!("writing {} to {repo} failed", write.path()))
        }
    }
}

async fn run_new_file_url(
    config: &Config,
    token: Option<&str>,
    repository: Option<String>,
    file: PathBuf,
    path: Option<String>,
    branch: Option<String>,
    problem: ProblemArgs,
) -> Result<()> {
    let repo = resolve_repository(repository.as_deref(), config)?;
    let content = read_input(&file).await?;
    let content = String::from_utf8(content).context("content must be UTF-8 text")?;
    let problem = problem.into_problem(&file);
    let path = remote_path(path, problem.as_ref(), &file, config, solution::today())?;
    let branch = match branch {
        Some(branch) => branch,
        None => match credentials::resolve_credential(&config.credentials, token) {
            Ok((credential, _)) => {
                let metrics = MetricsRegistry::new();
                let writer = build_writer(config, build_http_client(config)?, &metrics);
                writer.default_branch(&repo, &credential).await
            }
            Err(e) => {
                tracing::warn!(error = %e, fallback = DEFAULT_BRANCH, "no token to read the default branch");
                DEFAULT_BRANCH.to_string()
            }
        },
    };
    let url = links::new_file_url(&config.upstream.web_url, &repo, &branch, &path, &content)?;
    println!("{url}");
    Ok(())
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(config: Arc<Config>, token: Option<String>, listen: Option<String>) -> Result<()> {
    let api_key = match &config.server.api_key_env {
        Some(name) => Some(
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("server.api_key_env names {name}, which is not set"))?,
        ),
        None => {
            tracing::warn!("server.api_key_env not set; commit endpoint is unauthenticated");
            None
        }
    };
    if token.is_none() && !credentials::credential_present(&config.credentials) {
        tracing::warn!(
            token_env = %config.credentials.token_env,
            "no access token in environment; writes will fail until it is set"
        );
    }

    let metrics = MetricsRegistry::new();
    let http_client = build_http_client(&config)?;
    let writer = build_writer(&config, http_client.clone(), &metrics);

    let state = AppState {
        config: Arc::clone(&config),
        metrics,
        http_client,
        writer: Arc::new(writer),
        token_override: token,
        api_key,
    };
    let app = http::handler::create_router(Arc::new(state));

    let listen = listen.unwrap_or_else(|| config.server.listen.clone());
    let listen_addr: std::net::SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "commit server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("commit server shut down cleanly");
    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    init_tracing(cli.log_format);

    // ---- Config ----
    let config = config::load_config(cli.config.as_deref())?;
    let config = Arc::new(config);
    tracing::debug!(config_path = ?cli.config, "configuration loaded");

    let token = cli.token;
    match cli.command {
        Command::Verify { repository, json } => {
            run_verify(&config, token.as_deref(), repository, json).await
        }
        Command::Write {
            repository,
            file,
            path,
            message,
            branch,
            problem,
            json,
        } => {
            run_write(
                &config,
                token.as_deref(),
                repository,
                file,
                path,
                message,
                branch,
                problem,
                json,
            )
            .await
        }
        Command::NewFileUrl {
            repository,
            file,
            path,
            branch,
            problem,
        } => {
            run_new_file_url(
                &config,
                token.as_deref(),
                repository,
                file,
                path,
                branch,
                problem,
            )
            .await
        }
        Command::Serve { listen } => run_http_server(config, token, listen).await,
    }
}
