use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use spark_tts_rs::{
    engines::spark::SparkEngine,
    request::next_output_path,
    sanitizer::LadderMode,
    AppConfig, Orchestrator, SynthesisRequestBuilder, TaskRunner,
};

#[derive(Debug, Parser)]
#[command(name = "spark-tts")]
#[command(about = "Voice-cloning speech synthesis with Spark-TTS")]
struct Cli {
    /// Log more detail (repeat for debug output). RUST_LOG overrides this.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Synthesize text in the voice of a reference recording.
    Synthesize(SynthesizeArgs),
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct TextInput {
    /// Text to speak.
    #[arg(long)]
    text: Option<String>,
    /// Read the text to speak from a UTF-8 file.
    #[arg(long)]
    text_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SynthesizeArgs {
    #[command(flatten)]
    text: TextInput,
    /// Transcript of the reference recording.
    #[arg(long)]
    prompt_text: String,
    /// Reference recording (.wav or .mp3).
    #[arg(long)]
    prompt_audio: PathBuf,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Output file name prefix.
    #[arg(long)]
    prefix: Option<String>,
    /// Split long text into chunks and merge them with ffmpeg.
    #[arg(long)]
    chunked: bool,
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
    #[arg(long)]
    model_dir: Option<PathBuf>,
    #[arg(long)]
    device: Option<u32>,
    #[arg(long, value_enum)]
    ladder: Option<LadderMode>,
    /// Send the text to the engine without the initial format cleanup.
    #[arg(long)]
    no_preclean: bool,
    /// Print the final result as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn synthesize(args: SynthesizeArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(ffmpeg) = args.ffmpeg {
        config.ffmpeg_path = ffmpeg;
    }
    if let Some(model_dir) = args.model_dir {
        config.engine.model_dir = model_dir;
    }
    if let Some(device) = args.device {
        config.engine.device = device;
    }
    if let Some(ladder) = args.ladder {
        config.ladder = ladder;
    }
    if args.no_preclean {
        config.preclean_text = false;
    }

    let text = match (args.text.text, args.text.text_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        (None, None) => return Err("either --text or --text-file is required".into()),
    };

    let prefix = args
        .prefix
        .unwrap_or_else(|| config.prefix_for(args.chunked).to_string());
    let output_path = next_output_path(&config.resolved_output_dir(), &prefix)?;

    let request = SynthesisRequestBuilder::default()
        .text(text)
        .prompt_text(args.prompt_text)
        .prompt_audio_path(args.prompt_audio)
        .output_path(output_path)
        .chunked(args.chunked)
        .build()?;

    let orchestrator = Orchestrator::from_config(SparkEngine::new(config.engine.clone()), &config);
    if request.chunked && !orchestrator.can_concatenate() {
        eprintln!("warning: ffmpeg not found, chunked output cannot be merged");
    }

    let json = args.json;
    let handle = TaskRunner::new().submit(orchestrator, request)?;
    let (result, _) = handle.wait_with(|event| {
        let line = format!("[{}] {}", event.clock(), event.message);
        if json {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if let Some(path) = &result.output_path {
        println!("Saved to {}", path.display());
    } else if let Some(diagnostic) = &result.diagnostic {
        eprintln!("error: {diagnostic}");
    }
    Ok(result.success)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Commands::Synthesize(args) => synthesize(args),
    };
    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}
