mod display;
mod logging;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use redline_core::{AnalysisFamily, AnalysisResult, Tier, Utf16Text};
use redline_pipeline::decoder::Decoder;
use redline_pipeline::scorer::{self, CorrectionCandidate, ScoringContext};
use redline_pipeline::{
    AnalyzeOptions, Annotator, CancelToken, PipelineConfig, PromptContext, chunker,
    process_response,
};
use redline_requester::{HttpConfig, HttpRequester};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "redline",
    version,
    about = "Grammar and style annotations from a language model"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Pipeline configuration file (JSON)
    #[arg(long, env = "REDLINE_CONFIG", global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Annotation family, overriding the configuration file
    #[arg(long, value_enum, global = true)]
    family: Option<Family>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyse a text file (`-` for stdin)
    Analyze(AnalyzeArgs),
    /// Show how a file would be split into chunks
    Chunks {
        file: PathBuf,
    },
    /// Decode a saved model response against its source text, offline
    Decode {
        /// File holding the raw model response
        response: PathBuf,
        /// The text the response refers to
        #[arg(long)]
        text: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct AnalyzeArgs {
    file: PathBuf,

    /// Skip the fast tier
    #[arg(long)]
    thorough: bool,

    #[arg(long)]
    no_cache: bool,

    /// Use the streaming endpoint
    #[arg(long)]
    stream: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Also print suggestions ranked by confidence score
    #[arg(long)]
    rank: bool,

    #[arg(long)]
    language: Option<String>,

    #[arg(long)]
    audience: Option<String>,

    /// Extra instructions appended to the prompt
    #[arg(long)]
    instructions: Option<String>,

    #[command(flatten)]
    http: HttpArgs,
}

#[derive(Args)]
struct HttpArgs {
    #[arg(long, env = "REDLINE_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "REDLINE_BASE_URL", default_value = "https://api.anthropic.com")]
    base_url: String,

    #[arg(long, env = "REDLINE_FAST_MODEL", default_value = "claude-haiku-4-5")]
    fast_model: String,

    #[arg(long, env = "REDLINE_THOROUGH_MODEL", default_value = "claude-sonnet-4-5")]
    thorough_model: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

impl From<HttpArgs> for HttpConfig {
    fn from(args: HttpArgs) -> Self {
        Self {
            base_url: args.base_url,
            api_key: args.api_key,
            fast_model: args.fast_model,
            thorough_model: args.thorough_model,
            timeout_secs: args.timeout,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Family {
    Grammar,
    Style,
}

impl From<Family> for AnalysisFamily {
    fn from(f: Family) -> Self {
        match f {
            Family::Grammar => AnalysisFamily::Grammar,
            Family::Style => AnalysisFamily::Style,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    info!("redline v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(family) = cli.family {
        config.family = family.into();
    }

    match cli.command {
        Command::Analyze(args) => analyze(config, args).await,
        Command::Chunks { file } => {
            let text = read_input(&file)?;
            let chunking = &config.chunking;
            let chunks = chunker::split(
                &Utf16Text::new(&text),
                chunking.max_chunk_size,
                chunking.chunk_overlap,
            );
            display::print_chunks(&chunks);
            Ok(())
        }
        Command::Decode {
            response,
            text,
            json,
        } => {
            let raw = read_input(&response)?;
            let text = read_input(&text)?;
            let result = decode_offline(&config, &raw, &text);
            emit(&result, &text, json)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

async fn analyze(config: PipelineConfig, args: AnalyzeArgs) -> anyhow::Result<()> {
    let text = read_input(&args.file)?;
    let scoring = config.scoring.clone();
    let requester = HttpRequester::new(args.http.into()).context("building HTTP client")?;
    let annotator = Annotator::new(config, Arc::new(requester));

    let options = AnalyzeOptions {
        force_thorough: args.thorough,
        use_cache: !args.no_cache,
        context: PromptContext {
            language: args.language,
            audience: args.audience,
            instructions: args.instructions,
        },
    };

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling analysis");
            trigger.cancel();
        }
    });

    let result = if args.stream {
        annotator.analyze_streaming(&text, &options, &cancel).await
    } else {
        annotator.analyze_with_cancel(&text, &options, &cancel).await
    };

    emit(&result, &text, args.json)?;
    if args.rank && !args.json {
        let candidates: Vec<CorrectionCandidate> =
            result.annotations.iter().map(CorrectionCandidate::from).collect();
        let ranked = scorer::rank(candidates, &ScoringContext::default(), &scoring);
        let auto = ranked
            .first()
            .is_some_and(|top| scorer::should_auto_apply(top, scoring.auto_apply_threshold));
        display::print_ranking(&ranked, auto);
    }
    Ok(())
}

/// Decode, validate and deduplicate a saved response without any network.
fn decode_offline(config: &PipelineConfig, raw: &str, text: &str) -> AnalysisResult {
    let decoder = Decoder::new(config.family);
    process_response(&decoder, raw, &Utf16Text::new(text), Tier::Fast)
}

fn emit(result: &AnalysisResult, text: &str, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        display::print_result(result, &Utf16Text::new(text));
    }
    Ok(())
}
