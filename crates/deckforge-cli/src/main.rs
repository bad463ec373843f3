//! CLI binary for indexing documents and generating slide decks.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use deckforge_access::{
    mask_presentation, AccessGuard, Action, Admission, AuditLog, AuditOutcome, Identity, Role,
    SessionMemory, TokenSigner, UserStore,
};
use deckforge_llm::{CostTrackingMiddleware, LlmClient, LoggingMiddleware};
use deckforge_pipeline::{DeckFormat, PipelineConfig, PipelineEvent, PresentationPipeline};
use deckforge_retrieval::{ContextRetriever, LexicalIndex};
use deckforge_types::{DeckError, FinalPresentation};

#[derive(Parser)]
#[command(name = "deckforge", version, about = "Turn a topic and your documents into a reviewed slide deck")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Session token printed by `deckforge login`
    #[arg(long, global = true, env = "DECKFORGE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// User store (JSON)
    #[arg(long, global = true, env = "DECKFORGE_USERS", default_value = "config/users.json")]
    users: PathBuf,

    /// Pipeline settings (TOML)
    #[arg(long, global = true, env = "DECKFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Audit log file (JSON lines)
    #[arg(long, global = true, default_value = "logs/audit.log")]
    audit_log: PathBuf,

    /// Session memory file
    #[arg(long, global = true, default_value = "memory/session_memory.json")]
    memory_file: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a password and print a session token
    Login {
        #[arg(long, env = "DECKFORGE_USER")]
        user: String,

        #[arg(long, env = "DECKFORGE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Manage user accounts (Executive only, except for the first user)
    User {
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Add .txt / .md documents to the retrieval index
    Index {
        /// Files to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Index file
        #[arg(long, default_value = "data/index.json")]
        index: PathBuf,
    },

    /// Generate a deck for a topic
    Generate {
        topic: String,

        /// Number of slides (default: from config, 15)
        #[arg(long)]
        slides: Option<usize>,

        /// Slides per formatting request (default: from config, 5)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Model for every stage
        #[arg(long)]
        model: Option<String>,

        /// Index file
        #[arg(long, default_value = "data/index.json")]
        index: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Re-render a saved deck, masked for roles that require it
    Export {
        /// Deck JSON written by `generate`
        presentation: PathBuf,

        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },

    /// Inspect or clear session memory
    Memory {
        #[command(subcommand)]
        action: MemoryCommand,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Create a user or reset their password and role
    Add {
        username: String,

        /// Executive, Senior Manager, Analyst or Junior Staff
        #[arg(long)]
        role: String,

        #[arg(long, env = "DECKFORGE_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Delete a user
    Remove { username: String },
    /// List users and their roles
    List,
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// Show recent turns
    Show {
        #[arg(long, default_value = "10")]
        last: usize,
    },
    /// Forget every turn
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

impl From<OutputFormat> for DeckFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => DeckFormat::Json,
            OutputFormat::Markdown => DeckFormat::Markdown,
        }
    }
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; keys may come from the environment.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Setup tracing; stdout is reserved for rendered decks.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        let code = err
            .downcast_ref::<DeckError>()
            .map(DeckError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let guard = AccessGuard::new().with_audit(Arc::new(AuditLog::new(&cli.audit_log)));

    match cli.command {
        Commands::Login { user, password } => {
            let store = UserStore::open(&cli.users).await?;
            let token = cmd_login(&store, &TokenSigner::from_env()?, &user, &password)?;
            println!("{token}");
            Ok(())
        }
        Commands::User { action } => {
            let store = UserStore::open(&cli.users).await?;
            // An empty store can only be seeded; everything else needs a session.
            let identity = if store.is_empty() {
                None
            } else {
                Some(session(cli.token.as_deref())?)
            };
            cmd_user(&guard, store, identity.as_ref(), action).await
        }
        Commands::Index { paths, index } => {
            let identity = session(cli.token.as_deref())?;
            cmd_index(&guard, &identity, &paths, &index).await
        }
        Commands::Generate {
            topic,
            slides,
            batch_size,
            model,
            index,
            out,
            format,
        } => {
            let identity = session(cli.token.as_deref())?;
            let config = load_config(cli.config.as_deref(), slides, batch_size, model.as_deref())?;
            cmd_generate(
                &guard,
                &identity,
                &topic,
                config,
                &index,
                &cli.memory_file,
                out.as_deref(),
                format.into(),
            )
            .await
        }
        Commands::Export {
            presentation,
            out,
            format,
        } => {
            let identity = session(cli.token.as_deref())?;
            cmd_export(&guard, &identity, &presentation, out.as_deref(), format.into()).await
        }
        Commands::Memory { action } => {
            let identity = session(cli.token.as_deref())?;
            cmd_memory(&guard, &identity, &cli.memory_file, action).await
        }
    }
}

fn session(token: Option<&str>) -> Result<Identity, DeckError> {
    resolve_identity(token, &TokenSigner::from_env()?)
}

/// The caller's identity, taken only from a token whose signature checks out.
fn resolve_identity(token: Option<&str>, signer: &TokenSigner) -> Result<Identity, DeckError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| DeckError::Unauthenticated {
            reason: "no session token (run `deckforge login`, then pass --token or set DECKFORGE_TOKEN)"
                .into(),
        })?;
    signer.verify(token)
}

fn load_config(
    path: Option<&Path>,
    slides: Option<usize>,
    batch_size: Option<usize>,
    model: Option<&str>,
) -> Result<PipelineConfig, DeckError> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(n) = slides {
        config = config.with_slide_count(n);
    }
    if let Some(n) = batch_size {
        config = config.with_batch_size(n);
    }
    if let Some(model) = model {
        config = config.with_model(model);
    }
    config.validate()?;
    Ok(config)
}

/// Run `work` for an admitted command and audit how it ended.
async fn audited<T, F>(
    guard: &AccessGuard,
    admission: Admission,
    detail: &str,
    work: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match work.await {
        Ok(value) => {
            guard.finish(admission, AuditOutcome::Success, detail).await;
            Ok(value)
        }
        Err(e) => {
            guard
                .finish(admission, AuditOutcome::Failed, &format!("{detail}: {e:#}"))
                .await;
            Err(e)
        }
    }
}

fn write_output(out: Option<&Path>, body: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, body)
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{body}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_login(
    store: &UserStore,
    signer: &TokenSigner,
    user: &str,
    password: &str,
) -> Result<String, DeckError> {
    let identity = store.authenticate(user, password)?;
    tracing::info!(subject = %identity.subject, role = %identity.role, "login succeeded");
    signer.issue(&identity)
}

async fn cmd_user(
    guard: &AccessGuard,
    mut store: UserStore,
    identity: Option<&Identity>,
    action: UserCommand,
) -> anyhow::Result<()> {
    let Some(identity) = identity else {
        return seed_first_user(&mut store, action).await;
    };

    let admission = guard.admit(identity, Action::ManageUsers, "").await?;
    match action {
        UserCommand::Add {
            username,
            role,
            password,
        } => {
            let role: Role = role.parse()?;
            let detail = format!("add {} as {role}", username.trim());
            audited(guard, admission, &detail, async {
                store.upsert(&username, &password, role).await?;
                eprintln!("Saved {} ({role})", username.trim());
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
        UserCommand::Remove { username } => {
            let detail = format!("remove {}", username.trim());
            audited(guard, admission, &detail, async {
                if !store.remove(&username).await? {
                    anyhow::bail!(DeckError::ConfigError(format!("no user '{}'", username.trim())));
                }
                eprintln!("Removed {}", username.trim());
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
        UserCommand::List => {
            audited(guard, admission, "list users", async {
                for user in store.users() {
                    println!("{:<32} {}", user.username, user.role);
                }
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
    }
}

/// With no users yet, the only thing allowed is creating the first Executive.
async fn seed_first_user(store: &mut UserStore, action: UserCommand) -> anyhow::Result<()> {
    if !store.is_empty() {
        anyhow::bail!(DeckError::Unauthenticated {
            reason: "managing users requires a session token".into(),
        });
    }
    let UserCommand::Add {
        username,
        role,
        password,
    } = action
    else {
        println!("No users.");
        return Ok(());
    };

    let role: Role = role.parse()?;
    if role != Role::Executive {
        anyhow::bail!(DeckError::ConfigError(
            "the first user must be an Executive".into()
        ));
    }
    store.upsert(&username, &password, role).await?;
    tracing::info!(user = %username.trim(), path = %store.path().display(), "created first user");
    eprintln!("Created {} ({role})", username.trim());
    Ok(())
}

async fn cmd_index(
    guard: &AccessGuard,
    identity: &Identity,
    paths: &[PathBuf],
    index_path: &Path,
) -> anyhow::Result<()> {
    let admission = guard.admit(identity, Action::IndexDocuments, "").await?;
    let detail = format!("{} file(s) into {}", paths.len(), index_path.display());

    audited(guard, admission, &detail, async {
        let index = LexicalIndex::open(index_path).await?;
        let report = index.index(paths).await?;
        println!(
            "Indexed {} document(s), {} chunk(s) into {}",
            report.documents,
            report.chunks,
            index_path.display()
        );
        for skipped in &report.skipped {
            println!("  skipped {} (unsupported type)", skipped.display());
        }
        Ok::<_, anyhow::Error>(())
    })
    .await
}

#[allow(clippy::too_many_arguments)]
async fn cmd_generate(
    guard: &AccessGuard,
    identity: &Identity,
    topic: &str,
    config: PipelineConfig,
    index_path: &Path,
    memory_path: &Path,
    out: Option<&Path>,
    format: DeckFormat,
) -> anyhow::Result<()> {
    if topic.trim().is_empty() {
        anyhow::bail!(DeckError::ConfigError("topic must not be empty".into()));
    }
    let admission = guard.admit(identity, Action::Generate, topic).await?;
    let detail = format!("topic={topic} slides={}", config.slide_count);

    let deck = audited(guard, admission, &detail, async {
        let index = LexicalIndex::open(index_path).await?;
        if index.is_empty() {
            tracing::warn!(index = %index_path.display(), "retrieval index is empty; statements cannot be verified");
        }

        let cost = CostTrackingMiddleware::new();
        let client = LlmClient::from_env()?
            .with_middleware(LoggingMiddleware)
            .with_middleware(cost.clone());

        let pipeline = PresentationPipeline::new(Arc::new(client), Arc::new(index), config);
        let progress = tokio::spawn(report_progress(pipeline.events().subscribe()));
        let deck = pipeline.run(topic).await;
        drop(pipeline);
        let _ = progress.await;

        eprintln!(
            "Tokens: {} in / {} out across {} request(s)",
            cost.total_input_tokens(),
            cost.total_output_tokens(),
            cost.request_count()
        );

        let body = format.sink().render(&deck)?;
        write_output(out, &body)?;

        if deck.is_pipeline_failure() {
            anyhow::bail!("pipeline execution failed; see the log for the cause");
        }
        Ok::<_, anyhow::Error>(deck)
    })
    .await?;

    let memory = SessionMemory::open(memory_path).await?;
    memory
        .add_turn(topic, format!("{} slides; {}", deck.slides.len(), deck.summary))
        .await?;
    eprintln!("{}", deck.summary);
    Ok(())
}

/// Print one line per finished stage until the run's emitter is dropped.
async fn report_progress(mut rx: tokio::sync::broadcast::Receiver<PipelineEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match rx.recv().await {
            Ok(PipelineEvent::StageCompleted {
                stage,
                items,
                fallbacks,
                duration_ms,
                ..
            }) => {
                eprintln!(
                    "  {:<10} {items} item(s), {fallbacks} fallback(s), {duration_ms} ms",
                    stage.as_str()
                );
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

async fn cmd_export(
    guard: &AccessGuard,
    identity: &Identity,
    presentation: &Path,
    out: Option<&Path>,
    format: DeckFormat,
) -> anyhow::Result<()> {
    let admission = guard.admit(identity, Action::Export, "").await?;
    let detail = format!("{}", presentation.display());

    audited(guard, admission, &detail, async {
        let raw = std::fs::read_to_string(presentation)
            .with_context(|| format!("reading {}", presentation.display()))?;
        let deck: FinalPresentation = serde_json::from_str(&raw)
            .map_err(DeckError::from)
            .with_context(|| format!("{} is not a deck", presentation.display()))?;

        let deck = if identity.role.requires_masking() {
            tracing::info!(role = %identity.role, "masking sensitive data for export");
            mask_presentation(&deck)
        } else {
            deck
        };
        write_output(out, &format.sink().render(&deck)?)
    })
    .await
}

async fn cmd_memory(
    guard: &AccessGuard,
    identity: &Identity,
    memory_path: &Path,
    action: MemoryCommand,
) -> anyhow::Result<()> {
    let memory = SessionMemory::open(memory_path).await?;
    match action {
        MemoryCommand::Show { last } => {
            let admission = guard.admit(identity, Action::ReadMemory, "").await?;
            audited(guard, admission, "memory show", async {
                let turns = memory.recent(last).await;
                if turns.is_empty() {
                    println!("No session memory.");
                }
                for turn in turns {
                    println!("[{}] {}", turn.ts.format("%Y-%m-%d %H:%M"), turn.user);
                    println!("    {}", turn.ai);
                }
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
        MemoryCommand::Clear => {
            let admission = guard.admit(identity, Action::ClearMemory, "").await?;
            audited(guard, admission, "memory clear", async {
                memory.clear().await?;
                println!("Session memory cleared.");
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
    }
}
