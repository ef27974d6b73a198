use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use learnpath::{
    load_competencies, AnthropicProvider, AssistantSettings, CatalogScraper, ChatMessage,
    CollectionName, CompetencyIndex, CompetencySearch, CourseLookup, CourseSource, EmbedBackend,
    Embedder, Event, HashingEmbedder, LlmBackend, LlmProvider, OpenAiEmbedder, OpenAiProvider,
    Phase, QdrantEmbedder, RecommendationComposer, Role, SessionState, SessionStore,
    SettingsArgs, WorkflowController,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "learnpath",
    version,
    about = "Find competencies for a learning goal and recommend matching courses"
)]
struct Cli {
    /// Log format written to stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive session on stdin/stdout
    Chat {
        /// Persist the session to this JSON file after every tick
        #[arg(long)]
        session: Option<PathBuf>,
    },
    /// Advance a persisted session by a single tick
    Tick {
        /// Session JSON file (created when missing)
        #[arg(long)]
        session: PathBuf,
        /// Submit a new query instead of refreshing
        #[arg(long)]
        input: Option<String>,
    },
    /// Print the competencies matching a query
    Search {
        /// Free-text learning goal
        #[arg(long)]
        query: String,
        /// Override the number of matches returned
        #[arg(long)]
        limit: Option<usize>,
        /// Override the similarity threshold
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Run one course lookup against the catalog
    Courses {
        /// Competency name to search for
        #[arg(long)]
        competency: String,
        /// Override the number of titles kept
        #[arg(long)]
        max: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);
    cli.settings.validate()?;
    let settings = cli.settings.build_settings();
    match cli.command {
        Command::Chat { session } => {
            let assistant = Assistant::initialize(&cli.settings, settings)?;
            run_chat(&assistant, session)
        }
        Command::Tick { session, input } => {
            let assistant = Assistant::initialize(&cli.settings, settings)?;
            run_tick(&assistant, session, input)
        }
        Command::Search {
            query,
            limit,
            threshold,
        } => {
            let index = build_index(&cli.settings, &settings)?;
            let limit = limit.unwrap_or(settings.top_n());
            let threshold = threshold.unwrap_or(settings.similarity_threshold());
            let matches = index.search(&query, limit, threshold)?;
            if matches.is_empty() {
                println!("No competencies scored above {threshold}.");
            }
            for (rank, m) in matches.iter().enumerate() {
                println!("{}. {} ({:.3})", rank + 1, m.name, m.similarity_score);
                println!("   {}", m.description);
            }
            Ok(())
        }
        Command::Courses { competency, max } => {
            let scraper = build_scraper(&cli.settings)?;
            match scraper.lookup(&competency, max.unwrap_or(settings.max_courses())) {
                CourseLookup::Found(titles) => {
                    for title in titles {
                        println!("- {title}");
                    }
                    Ok(())
                }
                CourseLookup::Empty => {
                    println!("{}", learnpath::courses::NO_COURSES_SENTINEL);
                    Ok(())
                }
                CourseLookup::Failed(reason) => bail!(reason),
            }
        }
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "learnpath=warn",
        1 => "learnpath=info",
        2 => "learnpath=debug",
        _ => "learnpath=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
        }
    }
}

/// Everything a session needs, built once per process.
struct Assistant {
    settings: AssistantSettings,
    index: CompetencyIndex,
    scraper: CatalogScraper,
    composer: RecommendationComposer,
}

impl Assistant {
    fn initialize(args: &SettingsArgs, settings: AssistantSettings) -> Result<Self> {
        let index = build_index(args, &settings)?;
        let scraper = build_scraper(args)?;
        let generator = build_generator(args, &settings)?;
        let composer =
            RecommendationComposer::new(generator, args.temperature, args.max_completion_tokens);
        info!(
            competencies = index.len(),
            generator = composer.has_generator(),
            "assistant initialized"
        );
        Ok(Self {
            settings,
            index,
            scraper,
            composer,
        })
    }

    fn controller(&self) -> WorkflowController<'_> {
        WorkflowController::new(&self.index, &self.scraper, &self.composer, &self.settings)
    }
}

fn build_index(args: &SettingsArgs, settings: &AssistantSettings) -> Result<CompetencyIndex> {
    let corpus = load_competencies(settings.corpus_path(), args.corpus_delimiter_byte()?)?;
    let embedder = build_embedder(args, settings)?;
    let collection = CollectionName::new(settings.collection())?;
    let index = CompetencyIndex::build(&corpus, embedder, collection, args.query_cache_size)?;
    Ok(index)
}

fn build_embedder(args: &SettingsArgs, settings: &AssistantSettings) -> Result<Box<dyn Embedder>> {
    let model = settings.embed_model().to_string();
    let embedder: Box<dyn Embedder> = match args.embed_backend {
        EmbedBackend::Fastembed => build_local_embedder(args, &model)?,
        EmbedBackend::Hashing => Box::new(HashingEmbedder::new(
            args.hashing_dimension(),
            args.embed_batch_size,
        )?),
        EmbedBackend::Openai => {
            let key = args
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set for the OpenAI embedder"))?;
            Box::new(OpenAiEmbedder::new(
                key,
                args.openai_base_url.clone(),
                model,
                args.embed_dimensions,
                args.embed_timeout(),
                args.embed_max_retries,
                args.embed_batch_size,
            )?)
        }
        EmbedBackend::Qdrant => {
            let key = args
                .qdrant_api_key
                .clone()
                .ok_or_else(|| anyhow!("QDRANT_API_KEY must be set for the Qdrant embedder"))?;
            let endpoint = args
                .qdrant_endpoint
                .clone()
                .ok_or_else(|| anyhow!("--qdrant-endpoint is required for the Qdrant embedder"))?;
            Box::new(QdrantEmbedder::new(
                key,
                endpoint,
                model,
                args.embed_timeout(),
                args.embed_max_retries,
                args.embed_batch_size,
            )?)
        }
    };
    Ok(embedder)
}

#[cfg(feature = "local-model")]
fn build_local_embedder(args: &SettingsArgs, model: &str) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(learnpath::FastEmbedEmbedder::new(
        model,
        args.model_cache_dir.clone(),
        args.embed_batch_size,
    )?))
}

#[cfg(not(feature = "local-model"))]
fn build_local_embedder(_args: &SettingsArgs, _model: &str) -> Result<Box<dyn Embedder>> {
    bail!("this build lacks the `local-model` feature; use --embed-backend hashing, openai or qdrant")
}

fn build_scraper(args: &SettingsArgs) -> Result<CatalogScraper> {
    CatalogScraper::new(
        &args.course_search_url,
        args.course_timeout(),
        args.course_max_retries,
    )
}

/// A missing API key leaves the assistant usable; recommendations then fall
/// back to the composer's fixed reply.
fn build_generator(
    args: &SettingsArgs,
    settings: &AssistantSettings,
) -> Result<Option<Box<dyn LlmProvider>>> {
    let Some(model) = settings.llm_model().map(str::to_string) else {
        return Ok(None);
    };
    let generator: Option<Box<dyn LlmProvider>> = match args.llm_provider {
        LlmBackend::None => None,
        LlmBackend::Openai => match args.openai_api_key.clone() {
            Some(key) => Some(Box::new(OpenAiProvider::new(
                key,
                model,
                &args.openai_base_url,
                args.llm_timeout(),
            )?)),
            None => {
                warn!("OPENAI_API_KEY not set; recommendations are disabled");
                None
            }
        },
        LlmBackend::Anthropic => match args.anthropic_api_key.clone() {
            Some(key) => Some(Box::new(AnthropicProvider::new(
                key,
                model,
                args.llm_timeout(),
            )?)),
            None => {
                warn!("ANTHROPIC_API_KEY not set; recommendations are disabled");
                None
            }
        },
    };
    Ok(generator)
}

fn run_chat(assistant: &Assistant, session: Option<PathBuf>) -> Result<()> {
    let store = session.map(SessionStore::new);
    let mut state = match &store {
        Some(store) => store.load()?,
        None => SessionState::default(),
    };
    let controller = assistant.controller();
    let mut stdout = io::stdout().lock();
    for message in &state.messages {
        print_message(&mut stdout, message)?;
    }

    let mut lines = io::stdin().lock().lines();
    loop {
        let event = if state.phase() == Phase::Idle {
            write!(stdout, "> ")?;
            stdout.flush()?;
            let Some(line) = lines.next() else {
                break;
            };
            let line = line.context("failed to read from stdin")?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if matches!(trimmed, "exit" | "quit") {
                break;
            }
            Event::Input(line)
        } else {
            if let Some(status) = controller.announce(&mut state) {
                print_message(&mut stdout, &status)?;
            }
            Event::Refresh
        };
        let (next, output) = controller.step(state, event);
        state = next;
        for message in output.messages.iter().filter(|m| m.role == Role::Assistant) {
            print_message(&mut stdout, message)?;
        }
        if let Some(store) = &store {
            store.save(&state)?;
        }
    }
    Ok(())
}

fn run_tick(assistant: &Assistant, session: PathBuf, input: Option<String>) -> Result<()> {
    let store = SessionStore::new(session);
    let state = store.load()?;
    let event = input.map_or(Event::Refresh, Event::Input);
    let (state, output) = assistant.controller().step(state, event);
    store.save(&state)?;
    info!(work = ?output.work, phase = ?state.phase(), "tick complete");
    let mut stdout = io::stdout().lock();
    for message in &output.messages {
        print_message(&mut stdout, message)?;
    }
    Ok(())
}

fn print_message(out: &mut impl Write, message: &ChatMessage) -> Result<()> {
    let label = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    writeln!(out, "[{label}]\n{}\n", message.content)?;
    Ok(())
}
