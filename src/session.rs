//! One voice session: a single event loop that owns the connection, the
//! turn arbiter, the active speaker stream, and every timer.
//!
//! Audio frames, timer expiries, transport events, control commands, and
//! turn completions are all discrete events handled one at a time, so there
//! are no data races to manage. The silence deadline and the idle-departure
//! deadline are separate `Deadline`s with single-owner arm/cancel discipline;
//! the occupancy interval is a third, independent clock.
//!
//! An in-flight conversational turn runs as a spawned task reporting back on
//! a channel. Teardown aborts the task and ends the loop, which makes any
//! late completion a no-op instead of a resurrection of session state.

use crate::accumulator::{FrameDisposition, UtteranceAccumulator};
use crate::arbiter::{Admission, PlaybackFlag, TurnArbiter};
use crate::config::SessionTuning;
use crate::gate::EnergyGate;
use crate::occupancy::{OccupancyAction, OccupancyMonitor};
use crate::orchestrator::{ConversationOrchestrator, TurnOutcome};
use crate::sched::Deadline;
use crate::transport::{
    AudioSink, ChannelId, ConnectionEvent, FrameSource, SpeakerId, VoiceConnection,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Control messages from the lifecycle surface into a running session.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Tear the session down; acked once the connection is destroyed.
    Leave(oneshot::Sender<()>),
}

/// Handle to a spawned session loop.
pub(crate) struct SessionHandle {
    pub(crate) channel: ChannelId,
    pub(crate) cmd_tx: mpsc::Sender<SessionCommand>,
    pub(crate) task: JoinHandle<()>,
}

/// Capture state for the one admitted speaker.
struct SpeakerStream {
    speaker: SpeakerId,
    source: Box<dyn FrameSource>,
    accumulator: UtteranceAccumulator,
}

/// Drive one session until `leave`, idle departure, or connection loss.
pub(crate) async fn run_session(
    channel: ChannelId,
    mut conn: Box<dyn VoiceConnection>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    tuning: SessionTuning,
    orchestrator: Arc<ConversationOrchestrator>,
) {
    let playback = orchestrator.playback_flag();
    let gate = EnergyGate::new(tuning.rms_threshold);
    let mut arbiter = TurnArbiter::new(playback.clone());
    let occupancy = OccupancyMonitor::new();

    let mut stream: Option<SpeakerStream> = None;
    let mut silence = Deadline::new();
    let mut idle = Deadline::new();
    let mut turn_task: Option<JoinHandle<()>> = None;
    let (note_tx, mut note_rx) = mpsc::channel::<TurnOutcome>(4);

    let mut roster_ticks = interval_at(
        Instant::now() + tuning.occupancy_interval,
        tuning.occupancy_interval,
    );
    roster_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(%channel, "voice session started");

    loop {
        // A disarmed deadline pends forever, so unarmed branches never fire.
        let next_frame = async {
            match stream.as_mut() {
                Some(s) => s.source.next_frame().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Leave(ack)) => {
                        info!(%channel, "leave requested");
                        teardown(
                            &mut conn, &mut stream, &mut silence, &mut idle,
                            &mut arbiter, &mut turn_task, &playback,
                        )
                        .await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        teardown(
                            &mut conn, &mut stream, &mut silence, &mut idle,
                            &mut arbiter, &mut turn_task, &playback,
                        )
                        .await;
                        break;
                    }
                }
            }

            event = conn.next_event() => {
                match event {
                    Some(ConnectionEvent::SpeakingStart(speaker)) => {
                        // Invariant: voice activity and a pending idle
                        // departure are mutually exclusive.
                        if idle.is_armed() {
                            info!(%speaker, "activity detected, cancelling idle departure");
                            idle.cancel();
                        }
                        match arbiter.try_admit(speaker) {
                            Admission::Admitted => match conn.subscribe(speaker) {
                                Ok(source) => {
                                    stream = Some(SpeakerStream {
                                        speaker,
                                        source,
                                        accumulator: UtteranceAccumulator::new(speaker),
                                    });
                                }
                                Err(e) => {
                                    warn!(%speaker, error = %e, "subscription failed");
                                    arbiter.release(speaker);
                                }
                            },
                            Admission::AlreadyActive => {
                                debug!(%speaker, "duplicate speaking start ignored");
                            }
                            Admission::Rejected(reason) => {
                                debug!(%speaker, ?reason, "speaker not admitted");
                            }
                        }
                    }
                    Some(ConnectionEvent::Closed) | None => {
                        info!(%channel, "connection closed by transport");
                        teardown(
                            &mut conn, &mut stream, &mut silence, &mut idle,
                            &mut arbiter, &mut turn_task, &playback,
                        )
                        .await;
                        break;
                    }
                }
            }

            frame = next_frame => {
                match frame {
                    Some(Ok(frame)) => {
                        if let Some(s) = stream.as_mut() {
                            match s.accumulator.offer(&frame, gate.classify(&frame)) {
                                FrameDisposition::Started | FrameDisposition::Buffered => {
                                    silence.arm(tuning.silence_timeout);
                                }
                                FrameDisposition::Ignored => {}
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "speaker stream failed, finalizing early");
                        finalize_stream(
                            &mut stream, &mut silence, &mut arbiter,
                            &mut turn_task, &orchestrator, conn.sink(), &note_tx,
                        );
                    }
                    None => {
                        debug!("speaker stream ended, finalizing");
                        finalize_stream(
                            &mut stream, &mut silence, &mut arbiter,
                            &mut turn_task, &orchestrator, conn.sink(), &note_tx,
                        );
                    }
                }
            }

            _ = silence.wait() => {
                debug!("silence timeout elapsed");
                finalize_stream(
                    &mut stream, &mut silence, &mut arbiter,
                    &mut turn_task, &orchestrator, conn.sink(), &note_tx,
                );
            }

            outcome = note_rx.recv() => {
                if let Some(outcome) = outcome {
                    debug!(?outcome, "turn finished");
                    turn_task = None;
                }
            }

            _ = roster_ticks.tick() => {
                let members = conn.member_count();
                match occupancy.assess(members, idle.is_armed()) {
                    OccupancyAction::ScheduleDeparture => {
                        info!(members, "channel empty, scheduling idle departure");
                        idle.arm(tuning.idle_delay);
                    }
                    OccupancyAction::CancelDeparture => {
                        info!(members, "channel repopulated, cancelling idle departure");
                        idle.cancel();
                    }
                    OccupancyAction::Hold => {}
                }
            }

            _ = idle.wait() => {
                info!(%channel, "channel stayed empty, leaving");
                teardown(
                    &mut conn, &mut stream, &mut silence, &mut idle,
                    &mut arbiter, &mut turn_task, &playback,
                )
                .await;
                break;
            }
        }
    }

    info!(%channel, "voice session ended");
}

/// Finalize the active speaker stream: release the arbiter lock, cancel the
/// silence deadline, and hand a non-empty utterance to the orchestrator.
fn finalize_stream(
    stream: &mut Option<SpeakerStream>,
    silence: &mut Deadline,
    arbiter: &mut TurnArbiter,
    turn_task: &mut Option<JoinHandle<()>>,
    orchestrator: &Arc<ConversationOrchestrator>,
    sink: Arc<dyn AudioSink>,
    note_tx: &mpsc::Sender<TurnOutcome>,
) {
    silence.cancel();
    let Some(s) = stream.take() else {
        return;
    };
    arbiter.release(s.speaker);

    let Some(utterance) = s.accumulator.finalize() else {
        info!(speaker = %s.speaker, "no audio recorded, skipping transcription");
        return;
    };

    // Turns are strictly serialized per session; a finalize that lands while
    // the previous reply is still being produced is dropped, matching the
    // busy-skip behavior of the admission gate.
    if turn_task.as_ref().is_some_and(|t| !t.is_finished()) {
        warn!(speaker = %utterance.speaker, "turn already in flight, dropping utterance");
        return;
    }

    let orchestrator = Arc::clone(orchestrator);
    let note_tx = note_tx.clone();
    *turn_task = Some(tokio::spawn(async move {
        let outcome = orchestrator.run_turn(sink, utterance).await;
        let _ = note_tx.send(outcome).await;
    }));
}

/// Destroy the session: every deadline cancelled, the speaker lock and
/// busy-speaking flag cleared, any in-flight turn aborted, connection closed.
async fn teardown(
    conn: &mut Box<dyn VoiceConnection>,
    stream: &mut Option<SpeakerStream>,
    silence: &mut Deadline,
    idle: &mut Deadline,
    arbiter: &mut TurnArbiter,
    turn_task: &mut Option<JoinHandle<()>>,
    playback: &PlaybackFlag,
) {
    silence.cancel();
    idle.cancel();
    if let Some(s) = stream.take() {
        arbiter.release(s.speaker);
    }
    arbiter.clear();
    if let Some(task) = turn_task.take() {
        task.abort();
    }
    // The turn task may have been aborted between setting and clearing the
    // busy-speaking flag.
    playback.clear();
    conn.close().await;
}
