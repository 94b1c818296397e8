//! Playback device boundary — the surface the sequencer drives.
//!
//! The pipeline plays exactly one asset at a time through a
//! [`PlaybackDevice`]. Completion is reported asynchronously as
//! [`PlaybackStatus`] notifications: an explicit `just_finished` flag where
//! the device supports it, otherwise inferred from position closing in on
//! duration while playback is no longer active.
//!
//! [`RodioPlayer`] is the local implementation. `rodio::OutputStream` is
//! `!Send` on some platforms, so the player confines it to a dedicated OS
//! thread and proxies every call through a command channel.

use std::io::BufReader;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};

use crate::asset::{AssetSource, AudioAsset};
use crate::error::SpeechError;

/// Tolerance when inferring "finished" from position vs duration.
pub const FINISH_TOLERANCE: Duration = Duration::from_millis(150);

/// Upper bound on waiting for the audio thread to load an asset. Loading
/// is local decode setup and normally takes milliseconds; hitting this
/// means the audio thread is wedged.
const REPLACE_TIMEOUT: Duration = Duration::from_secs(5);

// ── Status ─────────────────────────────────────────────────────────

/// Asynchronous status notification from a playback device.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackStatus {
    /// Whether an asset is loaded.
    pub is_loaded: bool,

    /// Whether audio is currently sounding.
    pub is_playing: bool,

    /// Playhead position.
    pub position: Duration,

    /// Total duration of the loaded asset (zero if unknown).
    pub duration: Duration,

    /// Set once when the loaded asset finishes naturally.
    pub just_finished: bool,
}

impl PlaybackStatus {
    /// Whether this status marks the end of the loaded asset — either the
    /// explicit finished flag, or the playhead within [`FINISH_TOLERANCE`]
    /// of a known duration while playback has stopped.
    #[must_use]
    pub fn ended(&self) -> bool {
        self.just_finished
            || (self.is_loaded
                && !self.is_playing
                && self.duration > Duration::ZERO
                && self.position + FINISH_TOLERANCE >= self.duration)
    }
}

// ── Device trait ───────────────────────────────────────────────────

/// Abstraction over the audio output device.
///
/// Object-safe; the pipeline holds an `Arc<dyn PlaybackDevice>`. Status
/// notifications travel over a separate channel wired up at pipeline
/// construction.
pub trait PlaybackDevice: Send + Sync {
    /// Load an asset, replacing whatever is currently loaded.
    fn replace(&self, asset: &AudioAsset) -> Result<(), SpeechError>;

    /// Rewind the loaded asset to the start.
    fn seek_to_start(&self);

    /// Begin or resume playback.
    fn play(&self);

    /// Halt playback immediately, keeping the asset loaded.
    fn pause(&self);
}

// ── Rodio implementation ───────────────────────────────────────────

/// Commands sent from the pipeline to the audio thread.
enum PlayerCommand {
    Replace {
        asset: AudioAsset,
        reply: mpsc::Sender<Result<(), SpeechError>>,
    },
    Play,
    Pause,
    SeekToStart,
    Shutdown,
}

/// Local playback device backed by rodio on a dedicated OS thread.
///
/// Emits a `just_finished` status when the loaded asset drains naturally:
/// a watcher thread parks in `sleep_until_end`, since rodio sinks expose
/// no completion callback.
pub struct RodioPlayer {
    cmd_tx: mpsc::Sender<PlayerCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RodioPlayer {
    /// Spawn the audio thread and return the player plus its status stream.
    pub fn spawn() -> Result<
        (
            Self,
            tokio::sync::mpsc::UnboundedReceiver<PlaybackStatus>,
        ),
        SpeechError,
    > {
        let (cmd_tx, cmd_rx) = mpsc::channel::<PlayerCommand>();
        let (status_tx, status_rx) = tokio::sync::mpsc::unbounded_channel();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), SpeechError>>();

        let thread = thread::Builder::new()
            .name("parla-audio".into())
            .spawn(move || Self::run(cmd_rx, status_tx, init_tx))
            .map_err(|e| SpeechError::Playback(format!("failed to spawn audio thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| SpeechError::Playback("audio thread died during init".to_string()))??;

        Ok((
            Self {
                cmd_tx,
                thread: Some(thread),
            },
            status_rx,
        ))
    }

    /// Audio thread body. Owns the `OutputStream` and the current sink for
    /// their entire lifetime — neither crosses a thread boundary.
    fn run(
        cmd_rx: mpsc::Receiver<PlayerCommand>,
        status_tx: tokio::sync::mpsc::UnboundedSender<PlaybackStatus>,
        init_tx: mpsc::Sender<Result<(), SpeechError>>,
    ) {
        let (stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                let _ = init_tx.send(Err(SpeechError::Playback(e.to_string())));
                return;
            }
        };
        let _stream: OutputStream = stream; // must stay alive

        if init_tx.send(Ok(())).is_err() {
            return;
        }

        let mut current: Option<Arc<Sink>> = None;
        // Generation counter so a watcher for a replaced sink never reports
        // a finish for the asset that superseded it.
        let generation = Arc::new(AtomicU64::new(0));

        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                PlayerCommand::Replace { asset, reply } => {
                    if let Some(old) = current.take() {
                        old.stop();
                    }
                    let this_gen = generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let result = load_sink(&handle, &asset).map(|sink| {
                        let sink = Arc::new(sink);
                        spawn_drain_watcher(
                            Arc::clone(&sink),
                            this_gen,
                            Arc::clone(&generation),
                            status_tx.clone(),
                        );
                        current = Some(sink);
                    });
                    let _ = reply.send(result);
                }

                PlayerCommand::Play => {
                    if let Some(sink) = &current {
                        sink.play();
                    }
                }

                PlayerCommand::Pause => {
                    if let Some(sink) = &current {
                        sink.pause();
                    }
                }

                PlayerCommand::SeekToStart => {
                    if let Some(sink) = &current {
                        // Not all sources are seekable; best effort.
                        let _ = sink.try_seek(Duration::ZERO);
                    }
                }

                PlayerCommand::Shutdown => break,
            }
        }

        if let Some(sink) = current.take() {
            sink.stop();
        }
        tracing::debug!("Audio thread shutting down");
    }
}

/// Create a paused sink loaded with the asset's decoded audio.
fn load_sink(handle: &OutputStreamHandle, asset: &AudioAsset) -> Result<Sink, SpeechError> {
    let sink = Sink::try_new(handle).map_err(|e| SpeechError::Playback(e.to_string()))?;
    sink.pause();

    match &asset.source {
        AssetSource::File(path) => {
            let file = std::fs::File::open(path).map_err(|e| {
                SpeechError::Playback(format!("open {}: {e}", path.display()))
            })?;
            let decoder = Decoder::new(BufReader::new(file))
                .map_err(|e| SpeechError::Playback(e.to_string()))?;
            sink.append(decoder);
        }
        AssetSource::Memory(bytes) => {
            let decoder = Decoder::new(std::io::Cursor::new(bytes.clone()))
                .map_err(|e| SpeechError::Playback(e.to_string()))?;
            sink.append(decoder);
        }
    }

    Ok(sink)
}

/// Watch a sink until it drains and report `just_finished` — unless the
/// sink has been superseded by a later `replace` in the meantime.
fn spawn_drain_watcher(
    sink: Arc<Sink>,
    this_gen: u64,
    generation: Arc<AtomicU64>,
    status_tx: tokio::sync::mpsc::UnboundedSender<PlaybackStatus>,
) {
    thread::spawn(move || {
        sink.sleep_until_end();

        if generation.load(Ordering::SeqCst) != this_gen {
            // Replaced or stopped — the pipeline already moved on.
            return;
        }

        let _ = status_tx.send(PlaybackStatus {
            is_loaded: true,
            is_playing: false,
            just_finished: true,
            ..PlaybackStatus::default()
        });
    });
}

/// Wait for the audio thread's reply, bounded so a wedged thread surfaces
/// as a playback error instead of stalling the pipeline actor.
fn await_reply(
    rx: &mpsc::Receiver<Result<(), SpeechError>>,
    timeout: Duration,
) -> Result<(), SpeechError> {
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            Err(SpeechError::Playback("audio thread unresponsive".to_string()))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(SpeechError::Playback("audio thread died".to_string()))
        }
    }
}

impl PlaybackDevice for RodioPlayer {
    fn replace(&self, asset: &AudioAsset) -> Result<(), SpeechError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(PlayerCommand::Replace {
                asset: asset.clone(),
                reply: tx,
            })
            .map_err(|_| SpeechError::Playback("audio thread died".to_string()))?;
        await_reply(&rx, REPLACE_TIMEOUT)
    }

    fn seek_to_start(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::SeekToStart);
    }

    fn play(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Play);
    }

    fn pause(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Pause);
    }
}

impl Drop for RodioPlayer {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_finished_flag_marks_ended() {
        let status = PlaybackStatus {
            is_loaded: true,
            just_finished: true,
            ..PlaybackStatus::default()
        };
        assert!(status.ended());
    }

    #[test]
    fn position_near_duration_marks_ended() {
        let status = PlaybackStatus {
            is_loaded: true,
            is_playing: false,
            position: Duration::from_millis(4_900),
            duration: Duration::from_millis(5_000),
            just_finished: false,
        };
        assert!(status.ended());
    }

    #[test]
    fn mid_playback_status_is_not_ended() {
        let status = PlaybackStatus {
            is_loaded: true,
            is_playing: true,
            position: Duration::from_millis(1_000),
            duration: Duration::from_millis(5_000),
            just_finished: false,
        };
        assert!(!status.ended());
    }

    #[test]
    fn reply_wait_times_out_when_audio_thread_is_silent() {
        let (tx, rx) = mpsc::channel::<Result<(), SpeechError>>();
        // Sender alive but never replying — a wedged audio thread.
        let err = await_reply(&rx, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, SpeechError::Playback(_)));
        drop(tx);
    }

    #[test]
    fn reply_wait_errors_when_audio_thread_is_gone() {
        let (tx, rx) = mpsc::channel::<Result<(), SpeechError>>();
        drop(tx);
        let err = await_reply(&rx, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SpeechError::Playback(_)));
    }

    #[test]
    fn reply_wait_passes_through_load_result() {
        let (tx, rx) = mpsc::channel();
        tx.send(Ok(())).unwrap();
        assert!(await_reply(&rx, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn unknown_duration_never_infers_ended() {
        let status = PlaybackStatus {
            is_loaded: true,
            is_playing: false,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            just_finished: false,
        };
        assert!(!status.ended());
    }
}
