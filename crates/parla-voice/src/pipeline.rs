//! Speech pipeline orchestrator — the single owner of all streaming state.
//!
//! ```text
//!   tokens → segmenter → pending queue → prefetch (≤ MAX_PREFETCH jobs)
//!          → synthesis → resequencing buffer → playback (one at a time)
//! ```
//!
//! One tokio task owns every queue, counter and flag; everything else talks
//! to it through commands. Completed synthesis jobs report back as messages
//! the actor consumes synchronously, so there are no fire-and-forget
//! completion chains and no locks around shared state.
//!
//! A monotonically increasing run id invalidates stale work: it is bumped on
//! every new turn, user stop, or input-mode switch, and checked at every
//! asynchronous resumption point. Work from a previous run is dropped
//! wherever it surfaces — admission, synthesis completion, playback.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::asset::{AudioAsset, AudioSink};
use crate::error::SpeechError;
use crate::playback::{PlaybackDevice, PlaybackStatus};
use crate::segment::SentenceSegmenter;
use crate::synth::Synthesizer;

/// Maximum number of synthesis requests in flight at once.
///
/// Matches the synthesis endpoint's concurrent-generation capacity.
pub const MAX_PREFETCH: usize = 2;

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the pipeline to the application layer.
#[derive(Debug, Clone)]
pub enum SpeechEvent {
    /// A speakable chunk was extracted from the token stream.
    ChunkQueued { run: u64, seq: u64, text: String },

    /// The first asset of the current turn started playing.
    SpeakingStarted { run: u64 },

    /// All audio for the current turn has finished playing.
    SpeakingFinished { run: u64 },

    /// A chunk's audio was skipped after a synthesis or playback failure.
    /// The turn continues; the sentence already appeared in text.
    ChunkSkipped { run: u64, seq: u64, message: String },
}

// ── Introspection ──────────────────────────────────────────────────

/// Snapshot of the pipeline's internal counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Current run id.
    pub run: u64,

    /// Chunks waiting for a synthesis slot.
    pub pending: usize,

    /// Synthesis jobs in flight (always ≤ [`MAX_PREFETCH`]).
    pub in_flight: usize,

    /// Completed assets waiting in the resequencing buffer.
    pub queued: usize,

    /// Whether an asset is currently playing.
    pub playing: bool,
}

// ── Commands ───────────────────────────────────────────────────────

/// Why in-flight work is being invalidated.
#[derive(Debug, Clone, Copy)]
enum CancelReason {
    NewTurn,
    UserStop,
    ModeSwitch,
}

enum Command {
    BeginTurn {
        reply: oneshot::Sender<u64>,
    },
    PushToken(String),
    EndOfStream,
    Cancel(CancelReason),
    SynthDone {
        job: u64,
        run: u64,
        seq: u64,
        outcome: Result<AudioAsset, SpeechError>,
    },
    PlayerStatus(PlaybackStatus),
    Stats {
        reply: oneshot::Sender<PipelineStats>,
    },
    Shutdown,
}

// ── Handle ─────────────────────────────────────────────────────────

/// Handle to a running speech pipeline, constructed once per chat session.
///
/// Dropping the handle shuts the pipeline down; [`shutdown`](Self::shutdown)
/// does so explicitly and waits for the actor to exit.
pub struct SpeechPipeline {
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SpeechPipeline {
    /// Spawn the pipeline actor.
    ///
    /// `status_rx` is the playback device's status notification stream —
    /// typically the receiver returned by
    /// [`RodioPlayer::spawn`](crate::playback::RodioPlayer::spawn).
    ///
    /// Returns the handle and a receiver for [`SpeechEvent`]s.
    #[must_use]
    pub fn spawn(
        synth: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        player: Arc<dyn PlaybackDevice>,
        mut status_rx: mpsc::UnboundedReceiver<PlaybackStatus>,
    ) -> (Self, mpsc::UnboundedReceiver<SpeechEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Forward device statuses into the command stream so the actor
        // remains the only consumer of pipeline state.
        let status_fwd = cmd_tx.clone();
        tokio::spawn(async move {
            while let Some(status) = status_rx.recv().await {
                if status_fwd.send(Command::PlayerStatus(status)).is_err() {
                    break;
                }
            }
        });

        let actor = Actor {
            run: 0,
            segmenter: SentenceSegmenter::new(),
            next_seq: 0,
            pending: VecDeque::new(),
            in_flight: 0,
            jobs: HashMap::new(),
            next_job: 0,
            play_queue: BTreeMap::new(),
            next_play_seq: 0,
            playing: false,
            current: None,
            stream_ended: false,
            spoke: false,
            synth,
            sink,
            player,
            cmd_tx: cmd_tx.clone(),
            event_tx,
        };
        let task = tokio::spawn(actor.run(cmd_rx));

        (
            Self {
                cmd_tx,
                task: Some(task),
            },
            event_rx,
        )
    }

    /// Start a new turn: invalidate all in-flight work, stop any sounding
    /// audio, reset the segmenter, and return the new run id.
    pub async fn begin_turn(&self) -> Result<u64, SpeechError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::BeginTurn { reply: tx })?;
        rx.await.map_err(|_| SpeechError::PipelineClosed)
    }

    /// Feed one token from the model stream.
    pub fn push_token(&self, token: &str) -> Result<(), SpeechError> {
        self.send(Command::PushToken(token.to_string()))
    }

    /// Signal the end of the token stream, flushing any buffered remainder.
    pub fn end_of_stream(&self) -> Result<(), SpeechError> {
        self.send(Command::EndOfStream)
    }

    /// User pressed stop: abort all in-flight work and silence audio now.
    pub fn cancel(&self) -> Result<(), SpeechError> {
        self.send(Command::Cancel(CancelReason::UserStop))
    }

    /// Input modality switched mid-turn (voice ↔ text): same teardown as
    /// [`cancel`](Self::cancel).
    pub fn interrupt(&self) -> Result<(), SpeechError> {
        self.send(Command::Cancel(CancelReason::ModeSwitch))
    }

    /// Snapshot the pipeline's internal counters.
    pub async fn stats(&self) -> Result<PipelineStats, SpeechError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats { reply: tx })?;
        rx.await.map_err(|_| SpeechError::PipelineClosed)
    }

    /// Shut the pipeline down and wait for the actor to exit.
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, cmd: Command) -> Result<(), SpeechError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| SpeechError::PipelineClosed)
    }
}

impl Drop for SpeechPipeline {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

// ── Actor ──────────────────────────────────────────────────────────

struct Actor {
    /// Current run id. All work tagged with an older run is stale.
    run: u64,

    segmenter: SentenceSegmenter,

    /// Sequence number assigned to the next extracted chunk.
    next_seq: u64,

    /// Chunks waiting for a synthesis slot (FIFO).
    pending: VecDeque<TextChunk>,

    /// Number of synthesis jobs in flight. Invariant: ≤ [`MAX_PREFETCH`].
    in_flight: usize,

    /// Cancellation handles of in-flight jobs, keyed by job id.
    jobs: HashMap<u64, CancellationToken>,
    next_job: u64,

    /// Resequencing buffer: completed assets keyed by chunk sequence.
    /// `None` marks a failed chunk so the sequencer can skip past it.
    play_queue: BTreeMap<u64, Option<AudioAsset>>,

    /// Next sequence number the sequencer will play.
    next_play_seq: u64,

    /// Whether an asset is currently playing (mutual exclusion flag).
    playing: bool,

    /// The asset currently loaded in the device, released after playback.
    current: Option<AudioAsset>,

    /// Whether the current turn's token stream has ended.
    stream_ended: bool,

    /// Whether any asset of the current turn has started playing.
    spoke: bool,

    synth: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    player: Arc<dyn PlaybackDevice>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_tx: mpsc::UnboundedSender<SpeechEvent>,
}

/// A speakable chunk waiting for synthesis.
#[derive(Debug)]
struct TextChunk {
    run: u64,
    seq: u64,
    text: String,
}

impl Actor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::BeginTurn { reply } => {
                    let run = self.begin_turn();
                    let _ = reply.send(run);
                }
                Command::PushToken(token) => self.push_token(&token),
                Command::EndOfStream => self.end_of_stream(),
                Command::Cancel(reason) => self.cancel(reason),
                Command::SynthDone {
                    job,
                    run,
                    seq,
                    outcome,
                } => self.synth_done(job, run, seq, outcome),
                Command::PlayerStatus(status) => self.player_status(status),
                Command::Stats { reply } => {
                    let _ = reply.send(PipelineStats {
                        run: self.run,
                        pending: self.pending.len(),
                        in_flight: self.in_flight,
                        queued: self.play_queue.len(),
                        playing: self.playing,
                    });
                }
                Command::Shutdown => break,
            }
        }

        self.hard_stop();
        tracing::debug!("Speech pipeline actor exited");
    }

    // ── Run control ────────────────────────────────────────────────

    /// Bump the run id, abort everything from the old run, and reset the
    /// segmenter for a fresh turn.
    fn begin_turn(&mut self) -> u64 {
        self.invalidate(CancelReason::NewTurn);
        self.run
    }

    fn cancel(&mut self, reason: CancelReason) {
        self.invalidate(reason);
    }

    fn invalidate(&mut self, reason: CancelReason) {
        self.run += 1;
        tracing::debug!(run = self.run, reason = ?reason, "Invalidating in-flight work");

        self.abort_all();
        self.hard_stop();

        self.segmenter.reset();
        self.next_seq = 0;
        self.next_play_seq = 0;
        self.stream_ended = false;
        self.spoke = false;
    }

    /// Cancel every registered synthesis job and clear the registry.
    fn abort_all(&mut self) {
        for (_, token) in self.jobs.drain() {
            token.cancel();
        }
    }

    /// Clear both queues, reset counters and the playing flag, and silence
    /// the device immediately — audio already handed to the device does not
    /// stop on network cancellation alone.
    fn hard_stop(&mut self) {
        self.pending.clear();
        self.in_flight = 0;

        for (_, asset) in std::mem::take(&mut self.play_queue) {
            if let Some(asset) = asset {
                self.sink.release(&asset);
            }
        }

        if self.playing || self.current.is_some() {
            self.player.pause();
            self.player.seek_to_start();
        }
        if let Some(asset) = self.current.take() {
            self.sink.release(&asset);
        }
        self.playing = false;
    }

    // ── Token intake ───────────────────────────────────────────────

    fn push_token(&mut self, token: &str) {
        for text in self.segmenter.feed(token) {
            self.enqueue_chunk(text);
        }
        self.pump_prefetch();
    }

    fn end_of_stream(&mut self) {
        if let Some(text) = self.segmenter.flush() {
            self.enqueue_chunk(text);
        }
        self.stream_ended = true;
        self.pump_prefetch();
        self.maybe_finished();
    }

    fn enqueue_chunk(&mut self, text: String) {
        let chunk = TextChunk {
            run: self.run,
            seq: self.next_seq,
            text,
        };
        self.next_seq += 1;

        tracing::debug!(run = chunk.run, seq = chunk.seq, text = %chunk.text, "Chunk queued");
        self.emit(SpeechEvent::ChunkQueued {
            run: chunk.run,
            seq: chunk.seq,
            text: chunk.text.clone(),
        });
        self.pending.push_back(chunk);
    }

    // ── Prefetch scheduler ─────────────────────────────────────────

    /// Admit pending chunks until the queue is empty or the in-flight bound
    /// is reached. Called on enqueue and on every job completion, making
    /// the scheduler a self-sustaining pump.
    fn pump_prefetch(&mut self) {
        while self.in_flight < MAX_PREFETCH {
            let Some(chunk) = self.pending.pop_front() else {
                break;
            };
            // A stale chunk can only appear here if it survived a hard
            // stop, which clears the queue — but the check is cheap and
            // the invariant load-bearing.
            if chunk.run != self.run {
                continue;
            }
            self.spawn_job(chunk);
        }
    }

    fn spawn_job(&mut self, chunk: TextChunk) {
        let job = self.next_job;
        self.next_job += 1;

        let cancel = CancellationToken::new();
        self.jobs.insert(job, cancel.clone());
        self.in_flight += 1;

        let synth = Arc::clone(&self.synth);
        let sink = Arc::clone(&self.sink);
        let tx = self.cmd_tx.clone();

        tokio::spawn(async move {
            let TextChunk { run, seq, text } = chunk;
            let outcome = synthesize_one(&*synth, &*sink, run, seq, &text, &cancel).await;
            let _ = tx.send(Command::SynthDone {
                job,
                run,
                seq,
                outcome,
            });
        });
    }

    fn synth_done(
        &mut self,
        job: u64,
        run: u64,
        seq: u64,
        outcome: Result<AudioAsset, SpeechError>,
    ) {
        self.jobs.remove(&job);

        // Stale completion: the run moved on while this job was in flight.
        // Its slot was already reset by the hard stop — drop the result
        // without touching any state.
        if run != self.run {
            if let Ok(asset) = outcome {
                tracing::debug!(run, seq, "Dropping stale synthesis result");
                self.sink.release(&asset);
            }
            return;
        }

        self.in_flight = self.in_flight.saturating_sub(1);

        match outcome {
            Ok(asset) => {
                self.play_queue.insert(seq, Some(asset));
            }
            Err(SpeechError::Cancelled) => {
                self.play_queue.insert(seq, None);
            }
            Err(e) => {
                // The sentence still appears in text; only its audio is
                // skipped.
                tracing::warn!(run, seq, error = %e, "Synthesis failed, skipping chunk");
                self.emit(SpeechEvent::ChunkSkipped {
                    run,
                    seq,
                    message: e.to_string(),
                });
                self.play_queue.insert(seq, None);
            }
        }

        self.pump_prefetch();
        self.pump_playback();
        self.maybe_finished();
    }

    // ── Playback sequencer ─────────────────────────────────────────

    /// Start playback of the next asset in emission order, if nothing is
    /// playing and that asset has arrived. Failed sequences are skipped;
    /// a start failure clears the flag and retries immediately so one bad
    /// asset never stalls the queue.
    fn pump_playback(&mut self) {
        while !self.playing {
            match self.play_queue.remove(&self.next_play_seq) {
                // Head of the order hasn't completed yet — wait for it.
                None => break,

                // Failed chunk: skip its slot.
                Some(None) => {
                    self.next_play_seq += 1;
                }

                Some(Some(asset)) => {
                    self.next_play_seq += 1;
                    match self.player.replace(&asset) {
                        Ok(()) => {
                            self.player.seek_to_start();
                            self.player.play();
                            self.playing = true;

                            if !self.spoke {
                                self.spoke = true;
                                self.emit(SpeechEvent::SpeakingStarted { run: self.run });
                            }

                            tracing::debug!(run = asset.run, seq = asset.seq, "Playback started");
                            self.current = Some(asset);
                        }
                        Err(e) => {
                            tracing::warn!(seq = asset.seq, error = %e, "Playback start failed, skipping asset");
                            self.emit(SpeechEvent::ChunkSkipped {
                                run: asset.run,
                                seq: asset.seq,
                                message: e.to_string(),
                            });
                            self.sink.release(&asset);
                        }
                    }
                }
            }
        }
    }

    fn player_status(&mut self, status: PlaybackStatus) {
        // Statuses from a sink we already stopped arrive late; with nothing
        // playing they are meaningless.
        if !self.playing {
            return;
        }

        if status.ended() {
            self.playing = false;
            if let Some(asset) = self.current.take() {
                tracing::debug!(run = asset.run, seq = asset.seq, "Playback finished");
                self.sink.release(&asset);
            }
            self.pump_playback();
            self.maybe_finished();
        }
    }

    /// Emit `SpeakingFinished` once everything for the current turn has
    /// drained: stream over, no pending chunks, no jobs in flight, buffer
    /// empty, nothing sounding.
    fn maybe_finished(&mut self) {
        if self.stream_ended
            && self.spoke
            && !self.playing
            && self.pending.is_empty()
            && self.in_flight == 0
            && self.play_queue.is_empty()
        {
            self.spoke = false;
            self.emit(SpeechEvent::SpeakingFinished { run: self.run });
        }
    }

    fn emit(&self, event: SpeechEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::warn!("Speech event receiver dropped");
        }
    }
}

/// One synthesis job: network call, then materialization, with a staleness
/// check after each suspension point — cancellation can land during either.
async fn synthesize_one(
    synth: &dyn Synthesizer,
    sink: &dyn AudioSink,
    run: u64,
    seq: u64,
    text: &str,
    cancel: &CancellationToken,
) -> Result<AudioAsset, SpeechError> {
    let audio = synth.synthesize(text, cancel).await?;

    if cancel.is_cancelled() {
        return Err(SpeechError::Cancelled);
    }

    let asset = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(SpeechError::Cancelled),
        res = sink.materialize(run, seq, audio.format, audio.bytes) => res?,
    };

    if cancel.is_cancelled() {
        sink.release(&asset);
        return Err(SpeechError::Cancelled);
    }

    Ok(asset)
}
