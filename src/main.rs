use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lingua_voice::voice::{AudioOutput, CpalOutput, DecodedAudio, SAMPLE_RATE};
use lingua_voice::{Config, PlaybackEnd, SpeechEngine, VoiceId};

/// Lingua - speak words and phrases for language practice
#[derive(Parser)]
#[command(name = "lingua", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synthesize and speak text
    Say {
        /// Text to speak
        text: String,
        /// Voice to use (defaults to the configured voice)
        #[arg(long, env = "LINGUA_TTS_VOICE")]
        voice: Option<VoiceId>,
        /// Also write the audio to a WAV file
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Only synthesize; do not play
        #[arg(long)]
        silent: bool,
    },
    /// Synthesize several texts concurrently without playing them
    Prefetch {
        /// Texts to synthesize; duplicates share one request
        #[arg(required = true)]
        texts: Vec<String>,
        /// Voice to use (defaults to the configured voice)
        #[arg(long)]
        voice: Option<VoiceId>,
    },
    /// List available voices
    Voices,
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,lingua_voice=info",
        1 => "info,lingua_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Say {
            text,
            voice,
            out,
            silent,
        } => say(&text, voice, out, silent).await,
        Command::Prefetch { texts, voice } => prefetch(&texts, voice).await,
        Command::Voices => {
            list_voices();
            Ok(())
        }
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Speak `text`, optionally saving it as WAV
async fn say(
    text: &str,
    voice: Option<VoiceId>,
    out: Option<PathBuf>,
    silent: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let engine = SpeechEngine::from_config(&config)?;

    if silent {
        if engine.fetch(text, voice).await.is_none() {
            anyhow::bail!("speech unavailable for {text:?}");
        }
    } else {
        match engine.play_and_wait(text, voice).await {
            PlaybackEnd::Finished => tracing::info!("playback finished"),
            PlaybackEnd::Unavailable => anyhow::bail!("speech unavailable for {text:?}"),
            PlaybackEnd::Cancelled => tracing::warn!("playback cancelled"),
        }
    }

    if let Some(path) = out {
        let audio = engine
            .get(text)
            .ok_or_else(|| anyhow::anyhow!("speech unavailable for {text:?}"))?;
        std::fs::write(&path, audio.to_wav()?)?;
        println!(
            "Wrote {} samples ({:.2}s) to {}",
            audio.len(),
            audio.duration().as_secs_f32(),
            path.display()
        );
    }

    Ok(())
}

/// Warm the cache for every text concurrently and report the outcome
async fn prefetch(texts: &[String], voice: Option<VoiceId>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let engine = SpeechEngine::from_config(&config)?;

    futures::future::join_all(texts.iter().map(|t| engine.prefetch(t, voice))).await;

    let mut failed = 0;
    for text in texts {
        match engine.get(text) {
            Some(audio) => println!("✓ {text:?}: {:.2}s", audio.duration().as_secs_f32()),
            None => {
                failed += 1;
                println!("✗ {text:?}: unavailable");
            }
        }
    }

    println!("\n{} cached, {failed} failed", engine.cache().len());

    if failed > 0 {
        anyhow::bail!("{failed} text(s) could not be synthesized");
    }
    Ok(())
}

fn list_voices() {
    let config = Config::load().ok();
    let default = config.map_or_else(VoiceId::default, |c| c.speech.voice);

    for voice in VoiceId::ALL {
        let marker = if voice == default { " (default)" } else { "" };
        println!("{voice}{marker}");
    }
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let output = CpalOutput::new();
    output.resume().await?;

    let frequency = 440.0_f32;
    let num_samples = SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), SAMPLE_RATE);

    let started = output.start(&DecodedAudio::new(samples))?;
    let _ = started.finished.await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
