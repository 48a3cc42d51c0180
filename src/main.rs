//! # Spindle CLI (`spindle`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `spindle code [PATH]...` | Cleaned source lines per file |
//! | `spindle git [SOURCE]` | Commit messages from a local or remote repository |
//! | `spindle web <URL>` | Readable text of a web page |
//! | `spindle youtube <URL>` | Duration, transcript, comments and metadata of a video |
//! | `spindle pptx get <FILE>` | Slide text, notes and deck metadata |
//! | `spindle pptx set <FILE>` | Replace slide text or notes |
//! | `spindle save <STUB>` | Tee stdin into a dated markdown file |
//! | `spindle fabric process` | Run text through a pattern and a model |
//! | `spindle fabric setup` / `update` / `models` | Keys, patterns, model discovery |
//! | `spindle ticket jira --file F` | Create Jira issues from JSON |
//! | `spindle env get/set/list/remove` | Manage stored credentials |
//! | `spindle completions <SHELL>` | Shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! spindle code src --ext rs --format plaintext
//! spindle git https://github.com/org/repo --start 0 --end 20 --tickets
//! spindle web https://example.com/post --method readability --metadata
//! spindle pptx get deck.pptx --slides 1-3 --no-metadata --output slides.yaml --format yaml
//! pbpaste | spindle fabric process --pattern summarize --stream
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use spindle::config::{self, Config};
use spindle::decorators::{FetchReporter, LoggingFetcher, StderrReporter, TimingFetcher};
use spindle::env_store::EnvStore;
use spindle::fabric::{self, ProcessRequest};
use spindle::factory::{
    CodeFetcherFactory, CodeOverrides, FetcherFactory, GitFetcherFactory, GitOverrides,
    HandlerSpec, PptxEditFetcherFactory, PptxEditOverrides, PptxFetcherFactory,
    SaveFetcherFactory, WebFetcherFactory, WebOverrides, YouTubeFetcherFactory,
};
use spindle::fetcher::Fetcher;
use spindle::handler::{CompositeHandler, Handler};
use spindle::logging;
use spindle::models::{Payload, ResultMapping};
use spindle::provider::ProviderKind;
use spindle::source_git::CommitSelection;
use spindle::source_pptx::{EditTarget, PptxOptions, SlideSelection};
use spindle::source_save::SaveOptions;
use spindle::ticket::{self, JiraClient, JiraOverrides, JiraSettings};
use spindle::visitor::StatisticsVisitor;

/// Spindle: content extraction and AI orchestration.
#[derive(Parser)]
#[command(name = "spindle", version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults to `<config dir>/spindle/spindle.toml` when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Credential store. Defaults to `<config dir>/spindle/.env`.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Increase log verbosity (`-v` info, `-vv` debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Output flags shared by every extraction command.
#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Write to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: json, plaintext or yaml.
    #[arg(short, long, default_value = "json")]
    format: String,

    /// Also print to the console when writing a file.
    #[arg(long)]
    console: bool,

    /// Append to the output file.
    #[arg(long)]
    append: bool,

    /// Print fetch statistics to stderr.
    #[arg(long)]
    stats: bool,

    /// Report how long the fetch took.
    #[arg(long)]
    timing: bool,

    /// Report fetch start and finish.
    #[arg(long)]
    log_fetch: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract cleaned source lines from code trees.
    Code {
        /// Directories to scan.
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// File extensions to include (repeatable). Replaces the configured list.
        #[arg(short, long = "ext")]
        extensions: Vec<String>,

        /// Directory names to skip (repeatable). Replaces the configured list.
        #[arg(long = "exclude-dir")]
        exclude_dirs: Vec<String>,

        /// File names to skip (repeatable). Replaces the configured list.
        #[arg(long = "exclude-file")]
        exclude_files: Vec<String>,

        /// Truncate lines longer than this.
        #[arg(long)]
        max_line_length: Option<usize>,

        /// Keep comments.
        #[arg(long)]
        keep_comments: bool,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Extract commit messages from a git repository.
    Git {
        /// Local path or remote URL.
        #[arg(default_value = ".")]
        source: String,

        /// Only report the number of commits.
        #[arg(long)]
        count: bool,

        /// Commits whose hash starts with this prefix.
        #[arg(long, conflicts_with_all = ["start", "end"])]
        hash: Option<String>,

        /// First commit position (0 = newest).
        #[arg(long)]
        start: Option<usize>,

        /// Position after the last commit.
        #[arg(long)]
        end: Option<usize>,

        /// Extract ticket numbers from messages.
        #[arg(long)]
        tickets: bool,

        /// Truncate messages longer than this.
        #[arg(long)]
        max_length: Option<usize>,

        /// Leave the first word as written.
        #[arg(long)]
        no_capitalize: bool,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Extract readable text from a web page.
    Web {
        url: String,

        /// custom, raw, html2text or readability.
        #[arg(short, long)]
        method: Option<String>,

        /// Include title, word count and read time.
        #[arg(long)]
        metadata: bool,

        /// Strip URLs from the text.
        #[arg(long)]
        remove_urls: bool,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Extract data from a YouTube video. No part flags means all parts.
    Youtube {
        url: String,

        #[arg(long)]
        duration: bool,

        #[arg(long)]
        transcript: bool,

        #[arg(long)]
        comments: bool,

        #[arg(long)]
        metadata: bool,

        /// Transcript language.
        #[arg(long)]
        lang: Option<String>,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Read or edit PowerPoint decks.
    Pptx {
        #[command(subcommand)]
        action: PptxAction,
    },

    /// Save stdin to `<output_path>/<date>-<stub>.md`.
    Save {
        /// File name stub.
        stub: String,

        /// Extra frontmatter tags (repeatable).
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Leave out the configured frontmatter tags.
        #[arg(long)]
        nofabric: bool,

        /// Do not echo the input or report the saved path.
        #[arg(short, long)]
        silent: bool,

        /// Echo the input even when silent.
        #[arg(long)]
        passthrough: bool,

        /// Target directory. Overrides `[save] output_path`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Pattern-based prompting.
    Fabric {
        #[command(subcommand)]
        action: FabricAction,
    },

    /// Create tickets in external trackers.
    Ticket {
        #[command(subcommand)]
        action: TicketAction,
    },

    /// Manage the credential store.
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },

    /// Print a shell completion script.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum PptxAction {
    /// Slide text, notes and metadata.
    Get {
        file: PathBuf,

        /// Slide `N` or range `A-B` (1-based, inclusive).
        #[arg(short, long)]
        slides: Option<String>,

        #[arg(long)]
        only_content: bool,

        #[arg(long)]
        only_notes: bool,

        #[arg(long)]
        only_metadata: bool,

        #[arg(long)]
        no_metadata: bool,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Replace the text or notes of a slide.
    Set {
        file: PathBuf,

        /// Slide number (1-based). All slides when omitted.
        #[arg(long)]
        slide: Option<usize>,

        /// Replacement text.
        #[arg(short, long)]
        text: String,

        /// Edit speaker notes instead of slide text.
        #[arg(long)]
        notes: bool,

        /// Write the deck here instead of over the input.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum FabricAction {
    /// Process text with a pattern.
    Process {
        /// Text to process. Read from stdin or prompted for when omitted.
        #[arg(short, long)]
        text: Option<String>,

        /// Pattern name.
        #[arg(short, long)]
        pattern: Option<String>,

        /// Extra context prepended to the pattern.
        #[arg(short, long)]
        context: Option<String>,

        /// Model name.
        #[arg(short, long)]
        model: Option<String>,

        /// Provider to use, bypassing model-name routing.
        #[arg(long)]
        provider: Option<String>,

        /// Print the reply as it arrives.
        #[arg(short, long)]
        stream: bool,

        /// Also save the reply to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store API keys and the default model.
    Setup,

    /// Download the latest patterns.
    Update,

    /// List models per reachable provider.
    Models,

    /// List installed patterns.
    Patterns,
}

#[derive(Subcommand)]
enum TicketAction {
    /// Create Jira issues from a JSON file.
    Jira {
        /// JSON array of `{title, description, steps?, labels?}`.
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long)]
        server: Option<String>,

        #[arg(short, long)]
        username: Option<String>,

        /// API token. Defaults to `JIRA_TOKEN`.
        #[arg(short, long)]
        token: Option<String>,

        #[arg(short = 'P', long)]
        project: Option<String>,

        /// Labels for every ticket (repeatable).
        #[arg(short = 'g', long = "tag")]
        tags: Vec<String>,

        /// Assignee account id.
        #[arg(short, long)]
        assignee: Option<String>,

        /// Move each created ticket to this status.
        #[arg(long)]
        transition: Option<String>,
    },
}

#[derive(Subcommand)]
enum EnvAction {
    Get { key: String },
    Set { key: String, value: String },
    Remove { key: String },
    /// Stored keys with masked values.
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::resolve_config(cli.config.as_deref())?;
    let env_path = cli.env_file.clone().unwrap_or_else(EnvStore::default_path);
    let mut env = EnvStore::open(env_path)?;

    match cli.command {
        Commands::Code {
            paths,
            extensions,
            exclude_dirs,
            exclude_files,
            max_line_length,
            keep_comments,
            out,
        } => {
            let factory = CodeFetcherFactory::new(cfg.code.clone());
            let overrides = CodeOverrides {
                extensions: non_empty(extensions),
                excluded_dirs: non_empty(exclude_dirs),
                excluded_files: non_empty(exclude_files),
                max_line_length,
                keep_comments,
            };
            let fetcher = decorate(factory.create_fetcher(&overrides)?, &out);
            let mut result = ResultMapping::new();
            for path in &paths {
                result.extend(fetcher.fetch(&path.to_string_lossy())?);
            }
            deliver(fetcher.as_ref(), result, make_handler(&factory, &out)?.as_ref(), &out)?;
        }

        Commands::Git {
            source,
            count,
            hash,
            start,
            end,
            tickets,
            max_length,
            no_capitalize,
            out,
        } => {
            let factory = GitFetcherFactory::from_config(&cfg);
            let handler = make_handler(&factory, &out)?;
            if count {
                let log = factory.create_log();
                let repo = log.resolve(&source)?;
                let mut result = ResultMapping::new();
                result.insert("commit_count".into(), log.count(&repo)?.into());
                handler.handle(&Payload::Mapping(result))?;
                return Ok(());
            }
            let selection = match hash {
                Some(prefix) => CommitSelection::Hash(prefix),
                None => CommitSelection::range(start, end)?,
            };
            let overrides = GitOverrides {
                selection,
                extract_ticket_number: tickets.then_some(true),
                max_length,
                capitalize_first_word: no_capitalize.then_some(false),
            };
            let fetcher = decorate(factory.create_fetcher(&overrides)?, &out);
            let result = fetcher.fetch(&source)?;
            deliver(fetcher.as_ref(), result, handler.as_ref(), &out)?;
        }

        Commands::Web {
            url,
            method,
            metadata,
            remove_urls,
            out,
        } => {
            let factory = WebFetcherFactory::new(cfg.web.clone());
            let overrides = WebOverrides {
                method,
                extract_metadata: metadata.then_some(true),
                remove_urls: remove_urls.then_some(true),
            };
            let fetcher = decorate(factory.create_fetcher(&overrides)?, &out);
            let result = fetcher.fetch(&url)?;
            deliver(fetcher.as_ref(), result, make_handler(&factory, &out)?.as_ref(), &out)?;
        }

        Commands::Youtube {
            url,
            duration,
            transcript,
            comments,
            metadata,
            lang,
            out,
        } => {
            let factory = YouTubeFetcherFactory::from_config(&cfg, &env);
            let mut options = factory.default_options();
            options.duration = duration;
            options.transcript = transcript;
            options.comments = comments;
            options.metadata = metadata;
            if let Some(lang) = lang {
                options.lang = lang;
            }
            let fetcher = decorate(factory.create_fetcher(&options)?, &out);
            let result = fetcher.fetch(&url)?;
            deliver(fetcher.as_ref(), result, make_handler(&factory, &out)?.as_ref(), &out)?;
        }

        Commands::Pptx { action } => run_pptx(action)?,

        Commands::Save {
            stub,
            tags,
            nofabric,
            silent,
            passthrough,
            output,
        } => {
            let mut factory = SaveFetcherFactory::new(cfg.save.clone());
            if let Some(dir) = output {
                factory.set_output_path(dir);
            }
            factory.set_silent(silent);
            factory.set_passthrough(passthrough);
            let options = SaveOptions {
                stub,
                tags,
                nofabric,
            };
            let fetcher = factory.create_fetcher(&options)?;
            let handler = factory.create_handler(&HandlerSpec::default())?;
            handler.handle(&Payload::Mapping(fetcher.fetch("stdin")?))?;
        }

        Commands::Fabric { action } => run_fabric(action, &cfg, &mut env)?,

        Commands::Ticket {
            action:
                TicketAction::Jira {
                    file,
                    server,
                    username,
                    token,
                    project,
                    tags,
                    assignee,
                    transition,
                },
        } => {
            let overrides = JiraOverrides {
                server,
                username,
                token,
                project,
                assignee,
                labels: tags,
                transition,
            };
            let settings = JiraSettings::resolve(&cfg.jira, &env, overrides)?;
            let tickets = ticket::load_tickets(&file)?;
            let client = JiraClient::new(settings)?;
            ticket::create_tickets(&client, &tickets, &mut std::io::stdout())?;
        }

        Commands::Env { action } => run_env(action, &mut env)?,

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "spindle", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn run_pptx(action: PptxAction) -> Result<()> {
    match action {
        PptxAction::Get {
            file,
            slides,
            only_content,
            only_notes,
            only_metadata,
            no_metadata,
            out,
        } => {
            let selection = match slides {
                Some(spec) => spec.parse::<SlideSelection>()?,
                None => SlideSelection::All,
            };
            let factory = PptxFetcherFactory::new();
            let options = PptxOptions {
                selection,
                only_content,
                only_notes,
                only_metadata,
                no_metadata,
            };
            let fetcher = decorate(factory.create_fetcher(&options)?, &out);
            let result = fetcher.fetch(&file.to_string_lossy())?;
            deliver(fetcher.as_ref(), result, make_handler(&factory, &out)?.as_ref(), &out)?;
        }

        PptxAction::Set {
            file,
            slide,
            text,
            notes,
            output,
        } => {
            let slide_index = match slide {
                Some(0) => bail!("Slide numbers start at 1"),
                Some(n) => Some(n - 1),
                None => None,
            };
            let factory = PptxEditFetcherFactory::new();
            let overrides = PptxEditOverrides {
                slide_index,
                text,
                target: if notes {
                    EditTarget::Notes
                } else {
                    EditTarget::Content
                },
            };
            let destination = output.unwrap_or_else(|| file.clone());
            let handler = factory.create_handler(&HandlerSpec {
                output: Some(destination.clone()),
                ..HandlerSpec::default()
            })?;
            let result = factory.create_fetcher(&overrides)?.fetch(&file.to_string_lossy())?;
            let updated = result.get("updated_slides").cloned().unwrap_or_default();
            handler.handle(&Payload::Mapping(result))?;
            println!("Updated slides {} in {}", updated, destination.display());
        }
    }
    Ok(())
}

fn run_fabric(action: FabricAction, cfg: &Config, env: &mut EnvStore) -> Result<()> {
    match action {
        FabricAction::Process {
            text,
            pattern,
            context,
            model,
            provider,
            stream,
            output,
        } => {
            let request = ProcessRequest {
                pattern,
                text,
                context,
                model,
                provider: provider.as_deref().map(str::parse::<ProviderKind>).transpose()?,
                stream,
                output,
            };
            fabric::process(cfg, env, request, &mut std::io::stdout())?;
        }
        FabricAction::Setup => fabric::setup(env)?,
        FabricAction::Update => {
            let installed = fabric::update(cfg)?;
            println!("{installed} patterns installed in {}", cfg.patterns_dir().display());
        }
        FabricAction::Models => {
            let found = fabric::models(cfg, env)?;
            if found.is_empty() {
                println!("No providers available. Run `spindle fabric setup` to add API keys.");
            }
            for (provider, models) in found {
                println!("{provider}:");
                for model in models {
                    println!("  - {model}");
                }
            }
        }
        FabricAction::Patterns => {
            for name in fabric::list_patterns(&cfg.patterns_dir())? {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn run_env(action: EnvAction, env: &mut EnvStore) -> Result<()> {
    match action {
        EnvAction::Get { key } => match env.get(&key) {
            Some(value) => println!("{value}"),
            None => bail!("{} is not set", key),
        },
        EnvAction::Set { key, value } => {
            env.set(&key, &value)?;
            println!("Saved {key} to {}", env.path().display());
        }
        EnvAction::Remove { key } => {
            if !env.remove(&key)? {
                bail!("{} is not set", key);
            }
            println!("Removed {key}");
        }
        EnvAction::List => {
            for (key, value) in env.get_all() {
                println!("{key}={}", mask(value));
            }
        }
    }
    Ok(())
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(chars.len() - 4))
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

/// Wrap `fetcher` in the decorators the flags ask for.
fn decorate(fetcher: Box<dyn Fetcher>, out: &OutputArgs) -> Box<dyn Fetcher> {
    let reporter: Arc<dyn FetchReporter> = Arc::new(StderrReporter);
    let mut fetcher = fetcher;
    if out.timing {
        fetcher = Box::new(TimingFetcher::new(fetcher, reporter.clone()));
    }
    if out.log_fetch {
        fetcher = Box::new(LoggingFetcher::new(fetcher, reporter));
    }
    fetcher
}

/// Console handler, file handler, or both behind a composite.
fn make_handler<F: FetcherFactory>(factory: &F, out: &OutputArgs) -> Result<Box<dyn Handler>> {
    let Some(path) = &out.output else {
        return Ok(factory.create_handler(&HandlerSpec::console(out.format.clone()))?);
    };
    let file = factory
        .create_handler(&HandlerSpec {
            append: out.append,
            ..HandlerSpec::file(path, out.format.clone())
        })
        .with_context(|| format!("Cannot write to {}", path.display()))?;
    if !out.console {
        return Ok(file);
    }
    let console = factory.create_handler(&HandlerSpec::console(out.format.clone()))?;
    let mut composite = CompositeHandler::new();
    composite.add_handler(Arc::from(file));
    composite.add_handler(Arc::from(console));
    Ok(Box::new(composite))
}

/// Report statistics when asked, then hand the result to `handler`.
fn deliver(
    fetcher: &dyn Fetcher,
    result: ResultMapping,
    handler: &dyn Handler,
    out: &OutputArgs,
) -> Result<()> {
    if out.stats {
        let mut visitor = StatisticsVisitor::new(&result);
        fetcher.accept(&mut visitor);
        for (name, value) in visitor.stats() {
            eprintln!("{name}: {value}");
        }
    }
    handler.handle(&Payload::Mapping(result))?;
    Ok(())
}
