//! # Rapid Review CLI (`rrc`)
//!
//! Question answering over a corpus of research articles.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rrc init` | Create the SQLite store and its tables |
//! | `rrc extract <src_dir> --out <dir>` | Extract PDF/DOCX text into article JSON files |
//! | `rrc refs <export> --out <dir>` | Turn a Zotero CSV or CSL-JSON export into articles |
//! | `rrc sample <dir>` | Show a random sample of articles |
//! | `rrc plan "<query>"` | Show the context budget for a prompt and query |
//! | `rrc retrieve "<query>"` | Retrieve the most relevant chunks |
//! | `rrc ask "<query>"` | Retrieve and generate an answer |
//!
//! ## Examples
//!
//! ```bash
//! rrc extract ./pdfs --out ./corpus
//! rrc init --config ./config/rrc.toml
//! rrc ask "What was the sample size?" --top-k 3 --config ./config/rrc.toml
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use rapid_review::commands::{self, MetadataSource};
use rapid_review::config;
use rapid_review::logging;
use rapid_review::progress::ProgressMode;
use rapid_review::session::QueryParams;

const DEFAULT_PROMPT: &str = "{documents}\n\nQuestion: {query}\nAnswer:";

/// Rapid Review CLI: retrieve-then-generate question answering over
/// extracted research articles.
#[derive(Parser)]
#[command(name = "rrc", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rrc.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to human when stderr is a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(p: ProgressArg) -> Self {
        match p {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store schema. Safe to run repeatedly.
    Init,

    /// Extract text from PDF and DOCX files into article JSON files.
    Extract {
        /// Directory holding the source files.
        src_dir: PathBuf,

        /// Directory to write one `<article_id>.json` per file into.
        #[arg(long)]
        out: PathBuf,

        /// Metadata CSV (e.g. a Zotero export) listing the files to extract.
        #[arg(long)]
        metadata: Option<PathBuf>,

        /// Metadata column holding file paths.
        #[arg(long, default_value = "File Attachments")]
        paths_col: String,

        /// Metadata column holding article ids; defaults to the file stem.
        #[arg(long)]
        id_col: Option<String>,

        /// Copy every metadata column into the article.
        #[arg(long)]
        include_meta: bool,
    },

    /// Convert a reference-manager export into article JSON files.
    Refs {
        /// Zotero CSV or CSL-JSON export.
        path: PathBuf,

        #[arg(long)]
        out: PathBuf,

        /// `csv` or `json`; inferred from the extension when omitted.
        #[arg(long)]
        format: Option<String>,
    },

    /// Print a random sample of articles from a corpus directory.
    Sample {
        dir: PathBuf,

        #[arg(long, default_value_t = 3)]
        n: usize,

        #[arg(long, default_value = "json")]
        extension: String,
    },

    /// Show the token budget for a prompt and query.
    Plan {
        query: String,

        /// Prompt template with `{documents}` and `{query}` placeholders.
        #[arg(long, default_value = DEFAULT_PROMPT)]
        prompt: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Index the corpus and print the chunks retrieved for a query.
    Retrieve {
        query: String,

        #[arg(long, default_value = DEFAULT_PROMPT)]
        prompt: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Only retrieve chunks from this article.
        #[arg(long)]
        article: Option<String>,
    },

    /// Retrieve and generate an answer.
    Ask {
        query: String,

        #[arg(long, default_value = DEFAULT_PROMPT)]
        prompt: String,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        article: Option<String>,

        /// Print the full run as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let progress = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    // Commands that don't require config
    match &cli.command {
        Commands::Refs { path, out, format } => {
            return commands::run_refs(path, out, format.as_deref());
        }
        Commands::Sample { dir, n, extension } => {
            return commands::run_sample(dir, extension, *n);
        }
        Commands::Extract {
            src_dir,
            out,
            metadata,
            paths_col,
            id_col,
            include_meta,
        } => {
            // Use config if available, otherwise a minimal default
            let cfg =
                config::load_config(&cli.config).unwrap_or_else(|_| config::Config::minimal());
            let metadata = metadata.as_ref().map(|path| MetadataSource {
                path: path.clone(),
                paths_col: Some(paths_col.clone()),
                id_col: id_col.clone(),
            });
            return commands::run_extract(
                &cfg,
                src_dir,
                out,
                metadata,
                *include_meta,
                progress.reporter().as_ref(),
            );
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Plan {
            query,
            prompt,
            top_k,
        } => {
            commands::run_plan(&cfg, &prompt, &query, top_k)?;
        }
        Commands::Retrieve {
            query,
            prompt,
            top_k,
            article,
        } => {
            commands::run_retrieve(
                &cfg,
                &prompt,
                &query,
                &QueryParams { top_k },
                article.as_deref(),
                progress.reporter(),
            )
            .await?;
        }
        Commands::Ask {
            query,
            prompt,
            top_k,
            article,
            json,
        } => {
            commands::run_ask(
                &cfg,
                &prompt,
                &query,
                &QueryParams { top_k },
                article.as_deref(),
                json,
                progress.reporter(),
            )
            .await?;
        }
        Commands::Refs { .. } | Commands::Sample { .. } | Commands::Extract { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
