use anyhow::Result;
use clap::{Parser, Subcommand};
use robot_voice::{gateway, router, Config};
use tracing::info;

/// Voice pipeline for the robot: wake word, speech capture and speech output
#[derive(Parser)]
#[command(name = "robot-voice", version, about)]
struct Cli {
    /// Config file, without extension (toml, yaml or json)
    #[arg(short, long, default_value = "config/robot-voice")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wake word, speech capture and playback sharing the microphone
    Run,
    /// Reply to transcripts with spoken answers
    Router,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Robot Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Bus: {} (base '{}')", cfg.bus.url, cfg.bus.base);

    match cli.command {
        Command::Run => {
            info!("Wake: {}  STT: {}  TTS: {}", cfg.wake.endpoint, cfg.stt.endpoint, cfg.tts.endpoint);
            gateway::run(cfg).await
        }
        Command::Router => router::run(cfg).await,
    }
}
