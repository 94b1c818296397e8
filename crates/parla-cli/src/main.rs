//! Terminal front-end for the parla tutoring backend.
//!
//! Reads user turns from stdin, streams the tutor's reply token by token,
//! and speaks it through the voice pipeline while it is still arriving.
//! Ctrl+C during a turn stops the reply (and its audio) without exiting.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use parla_voice::{
    AudioSink, ChatClient, FileSink, MemorySink, PlaybackDevice, PlaybackStatus, RodioPlayer,
    SpeechConfig, SpeechError, SpeechEvent, SpeechPipeline, TeachMode,
};

#[derive(Parser)]
#[command(name = "parla", about = "Conversational language tutor with streaming speech")]
struct Cli {
    /// Backend API base URL.
    #[arg(long, env = "PARLA_API_URL", default_value = "http://localhost:8787")]
    api_url: String,

    /// Language being practiced (sent with each turn).
    #[arg(long, env = "PARLA_LANG", default_value = "en")]
    language: String,

    /// TTS voice identifier.
    #[arg(long, env = "PARLA_VOICE", default_value = "default")]
    voice: String,

    /// Session id, so the backend keeps conversation context.
    #[arg(long, env = "PARLA_SESSION", default_value = "local-dev-session")]
    session: String,

    /// Tutoring feedback requested after each turn.
    #[arg(long, value_enum, default_value_t = TeachArg::Tutor)]
    teach: TeachArg,

    /// Keep synthesized audio in memory instead of the cache directory.
    #[arg(long)]
    in_memory: bool,

    /// Disable audio output (text only).
    #[arg(long)]
    mute: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum TeachArg {
    Off,
    Hint,
    Tutor,
}

impl From<TeachArg> for TeachMode {
    fn from(arg: TeachArg) -> Self {
        match arg {
            TeachArg::Off => Self::Off,
            TeachArg::Hint => Self::Hint,
            TeachArg::Tutor => Self::Tutor,
        }
    }
}

/// Playback device for `--mute`: accepts every asset and reports it
/// finished as soon as it is asked to play, so the pipeline drains at
/// full speed without touching the audio stack.
struct SilentDevice {
    status_tx: tokio::sync::mpsc::UnboundedSender<PlaybackStatus>,
}

impl PlaybackDevice for SilentDevice {
    fn replace(&self, _asset: &parla_voice::AudioAsset) -> Result<(), SpeechError> {
        Ok(())
    }

    fn seek_to_start(&self) {}

    fn play(&self) {
        let _ = self.status_tx.send(PlaybackStatus {
            is_loaded: true,
            is_playing: false,
            just_finished: true,
            ..PlaybackStatus::default()
        });
    }

    fn pause(&self) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = SpeechConfig {
        api_url: cli.api_url.clone(),
        session_id: cli.session.clone(),
        language: cli.language.clone(),
        voice: cli.voice.clone(),
        ..SpeechConfig::default()
    };

    let http = reqwest::Client::new();
    let chat = ChatClient::new(http.clone(), config.clone());
    chat.ping().await;

    let sink: Arc<dyn AudioSink> = if cli.in_memory {
        Arc::new(MemorySink)
    } else {
        Arc::new(FileSink::in_cache_dir().context("failed to create audio cache directory")?)
    };

    let (player, status_rx): (Arc<dyn PlaybackDevice>, _) = if cli.mute {
        let (status_tx, status_rx) = tokio::sync::mpsc::unbounded_channel();
        (Arc::new(SilentDevice { status_tx }), status_rx)
    } else {
        let (player, status_rx) = RodioPlayer::spawn().context("failed to open audio output")?;
        (Arc::new(player), status_rx)
    };

    let synth = Arc::new(parla_voice::HttpSynthesizer::new(http, &config));
    let (pipeline, mut events) = SpeechPipeline::spawn(synth, sink, player, status_rx);

    // Pipeline events are diagnostics here; the reply text is printed from
    // the token stream directly.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SpeechEvent::ChunkQueued { run, seq, text } => {
                    tracing::debug!(run, seq, text = %text, "chunk queued");
                }
                SpeechEvent::SpeakingStarted { run } => tracing::debug!(run, "speaking"),
                SpeechEvent::SpeakingFinished { run } => tracing::debug!(run, "finished speaking"),
                SpeechEvent::ChunkSkipped { run, seq, message } => {
                    tracing::warn!(run, seq, message = %message, "chunk audio skipped");
                }
            }
        }
    });

    println!("parla — type a message, Ctrl+C stops a reply, Ctrl+D exits");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break };
        let user_text = line.trim();
        if user_text.is_empty() {
            continue;
        }

        run_turn(&chat, &pipeline, user_text, cli.teach.into()).await;
    }

    println!();
    pipeline.shutdown().await;
    Ok(())
}

/// One full turn: stream + speak the reply, then fetch tutoring feedback.
async fn run_turn(chat: &ChatClient, pipeline: &SpeechPipeline, user_text: &str, teach: TeachMode) {
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let turn = chat.stream_turn(user_text, pipeline, &cancel, |token| {
        print!("{token}");
        let _ = std::io::stdout().flush();
    });

    let result = tokio::select! {
        result = turn => result,
        _ = tokio::signal::ctrl_c() => {
            // Dropping the stream future aborts the transport; the pipeline
            // still needs an explicit stop for audio already in flight.
            stop.cancel();
            let _ = pipeline.cancel();
            println!();
            println!("(stopped)");
            return;
        }
    };

    println!();

    let talk_text = match result {
        Ok(text) => text,
        Err(SpeechError::Cancelled) => {
            println!("(stopped)");
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "turn failed");
            println!("network error — is the backend running?");
            return;
        }
    };

    match chat.teach(user_text, &talk_text, teach).await {
        Ok(Some(feedback)) => {
            println!();
            println!("tutor: {feedback}");
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "teach request failed"),
    }
}
