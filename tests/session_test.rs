//! End-to-end pipeline tests against a channel-backed transport.
//!
//! The clock is paused, so silence timeouts, occupancy ticks, and idle
//! departures are driven deterministically by synthetic events.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;
use voxbot::{
    AgentBackends, AgentError, AgentResult, AudioPayload, AudioSink, ChannelId, ChatMessage,
    ConnectionEvent, FrameSource, LeaveOutcome, MemoryStore, PcmFrame, ReplyBackend, SessionTuning,
    SpeakerId, SttBackend, TtsBackend, Utterance, VoiceAgent, VoiceConnection, VoiceGateway,
    FALLBACK_REPLY,
};

// ---------------------------------------------------------------------------
// Mock transport
// ---------------------------------------------------------------------------

struct ChanFrames(mpsc::UnboundedReceiver<AgentResult<PcmFrame>>);

#[async_trait]
impl FrameSource for ChanFrames {
    async fn next_frame(&mut self) -> Option<AgentResult<PcmFrame>> {
        self.0.recv().await
    }
}

struct TestSink {
    played: Mutex<Vec<Vec<u8>>>,
    hold: AtomicBool,
    fail: AtomicBool,
    started_tx: mpsc::UnboundedSender<()>,
    release: Notify,
}

#[async_trait]
impl AudioSink for TestSink {
    async fn play(&self, audio: AudioPayload) -> AgentResult<()> {
        self.played.lock().unwrap().push(audio.bytes);
        let _ = self.started_tx.send(());
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AgentError::Playback("device gone".into()));
        }
        Ok(())
    }
}

struct TestConnection {
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    // One queued frame receiver per expected subscription, in order.
    sources: HashMap<SpeakerId, Vec<mpsc::UnboundedReceiver<AgentResult<PcmFrame>>>>,
    subscribed: Arc<Mutex<Vec<SpeakerId>>>,
    members: Arc<AtomicUsize>,
    sink: Arc<TestSink>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl VoiceConnection for TestConnection {
    async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    fn subscribe(&mut self, speaker: SpeakerId) -> AgentResult<Box<dyn FrameSource>> {
        self.subscribed.lock().unwrap().push(speaker);
        let queue = self.sources.get_mut(&speaker);
        match queue.and_then(|q| {
            if q.is_empty() {
                None
            } else {
                Some(q.remove(0))
            }
        }) {
            Some(rx) => Ok(Box::new(ChanFrames(rx))),
            None => Err(AgentError::Stream(format!(
                "no frame source prepared for speaker {}",
                speaker
            ))),
        }
    }

    fn sink(&self) -> Arc<dyn AudioSink> {
        self.sink.clone()
    }

    fn member_count(&self) -> usize {
        self.members.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestGateway {
    conns: Mutex<Vec<TestConnection>>,
}

#[async_trait]
impl VoiceGateway for TestGateway {
    async fn connect(&self, _channel: ChannelId) -> AgentResult<Box<dyn VoiceConnection>> {
        let mut conns = self.conns.lock().unwrap();
        if conns.is_empty() {
            return Err(AgentError::Connection("no connection prepared".into()));
        }
        Ok(Box::new(conns.remove(0)))
    }
}

// ---------------------------------------------------------------------------
// Scripted backends
// ---------------------------------------------------------------------------

struct ScriptedStt {
    transcript: Option<String>,
    seen: Arc<Mutex<Vec<Vec<i16>>>>,
}

#[async_trait]
impl SttBackend for ScriptedStt {
    async fn transcribe(&self, utterance: &Utterance) -> AgentResult<String> {
        self.seen.lock().unwrap().push(utterance.samples.clone());
        match &self.transcript {
            Some(t) => Ok(t.clone()),
            None => Err(AgentError::Transcription("service down".into())),
        }
    }
}

struct ScriptedChat {
    reply: Option<String>,
}

#[async_trait]
impl ReplyBackend for ScriptedChat {
    async fn generate(&self, _messages: &[ChatMessage]) -> AgentResult<String> {
        match &self.reply {
            Some(r) => Ok(r.clone()),
            None => Err(AgentError::ReplyGeneration("service down".into())),
        }
    }
}

struct EchoTts;

#[async_trait]
impl TtsBackend for EchoTts {
    async fn synthesize(&self, text: &str) -> AgentResult<AudioPayload> {
        Ok(AudioPayload::new(text.as_bytes().to_vec()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    agent: VoiceAgent,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    frames: HashMap<SpeakerId, Vec<mpsc::UnboundedSender<AgentResult<PcmFrame>>>>,
    subscribed: Arc<Mutex<Vec<SpeakerId>>>,
    members: Arc<AtomicUsize>,
    sink: Arc<TestSink>,
    closed: Arc<AtomicUsize>,
    stt_seen: Arc<Mutex<Vec<Vec<i16>>>>,
    memory: Arc<MemoryStore>,
    play_started: mpsc::UnboundedReceiver<()>,
    _paths: (PathBuf, PathBuf),
}

fn harness(
    tag: &str,
    transcript: Option<&str>,
    reply: Option<&str>,
    speakers: &[u64],
    tuning: SessionTuning,
) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (started_tx, play_started) = mpsc::unbounded_channel();

    let mut sources: HashMap<SpeakerId, Vec<mpsc::UnboundedReceiver<AgentResult<PcmFrame>>>> =
        HashMap::new();
    let mut frames: HashMap<SpeakerId, Vec<mpsc::UnboundedSender<AgentResult<PcmFrame>>>> =
        HashMap::new();
    for &id in speakers {
        let (tx, rx) = mpsc::unbounded_channel();
        sources.entry(SpeakerId(id)).or_default().push(rx);
        frames.entry(SpeakerId(id)).or_default().push(tx);
    }

    let sink = Arc::new(TestSink {
        played: Mutex::new(Vec::new()),
        hold: AtomicBool::new(false),
        fail: AtomicBool::new(false),
        started_tx,
        release: Notify::new(),
    });
    let subscribed = Arc::new(Mutex::new(Vec::new()));
    let members = Arc::new(AtomicUsize::new(2));
    let closed = Arc::new(AtomicUsize::new(0));

    let conn = TestConnection {
        events: event_rx,
        sources,
        subscribed: subscribed.clone(),
        members: members.clone(),
        sink: sink.clone(),
        closed: closed.clone(),
    };
    let gateway = Arc::new(TestGateway {
        conns: Mutex::new(vec![conn]),
    });

    let dir = std::env::temp_dir();
    let mem_path = dir.join(format!("voxbot_it_mem_{}_{}.json", tag, std::process::id()));
    let per_path = dir.join(format!("voxbot_it_per_{}_{}.json", tag, std::process::id()));
    let _ = std::fs::remove_file(&mem_path);
    let _ = std::fs::remove_file(&per_path);
    let memory = Arc::new(MemoryStore::load(&mem_path, &per_path));

    let stt_seen = Arc::new(Mutex::new(Vec::new()));
    let backends = AgentBackends {
        stt: Arc::new(ScriptedStt {
            transcript: transcript.map(str::to_string),
            seen: stt_seen.clone(),
        }),
        chat: Arc::new(ScriptedChat {
            reply: reply.map(str::to_string),
        }),
        tts: Arc::new(EchoTts),
    };

    Harness {
        agent: VoiceAgent::new(gateway, backends, memory.clone(), tuning),
        events: event_tx,
        frames,
        subscribed,
        members,
        sink,
        closed,
        stt_seen,
        memory,
        play_started,
        _paths: (mem_path, per_path),
    }
}

fn test_tuning() -> SessionTuning {
    SessionTuning::default()
}

/// Let the session loop drain everything that is currently ready.
async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

fn voiced(amp: i16) -> PcmFrame {
    // Constant-amplitude frame: RMS equals the amplitude, well over the
    // default threshold of 60 when amp >= 100.
    PcmFrame::new(vec![amp; 96])
}

fn silent() -> PcmFrame {
    PcmFrame::new(vec![0i16; 96])
}

impl Harness {
    fn speak(&self, id: u64) {
        self.events
            .send(ConnectionEvent::SpeakingStart(SpeakerId(id)))
            .unwrap();
    }

    fn frame(&self, id: u64, stream_idx: usize, frame: PcmFrame) {
        self.frames[&SpeakerId(id)][stream_idx].send(Ok(frame)).unwrap();
    }

    fn subscriptions(&self) -> Vec<SpeakerId> {
        self.subscribed.lock().unwrap().clone()
    }

    fn played(&self) -> Vec<Vec<u8>> {
        self.sink.played.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn utterance_is_exactly_the_voiced_frames_in_order() {
    let mut h = harness("voiced_order", Some("hello bot"), Some("hello human"), &[1], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();

    h.speak(1);
    settle().await;

    let mut expected: Vec<i16> = Vec::new();
    for (i, amp) in [100i16, 200, 300, 400, 500, 600, 700, 800].iter().enumerate() {
        h.frame(1, 0, voiced(*amp));
        expected.extend(vec![*amp; 96]);
        if i % 2 == 0 {
            h.frame(1, 0, silent());
        }
    }
    settle().await;

    sleep(Duration::from_millis(1600)).await;
    h.play_started.recv().await.unwrap();
    settle().await;

    let seen = h.stt_seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], expected);
    assert_eq!(h.played(), vec![b"hello human".to_vec()]);
    let turns = h.memory.history_for(SpeakerId(1));
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "hello bot");

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn busy_speaking_rejects_every_speaker() {
    let mut h = harness("busy", Some("hi"), Some("reply"), &[1, 1, 2], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();
    h.sink.hold.store(true, Ordering::SeqCst);

    h.speak(1);
    settle().await;
    h.frame(1, 0, voiced(500));
    settle().await;
    sleep(Duration::from_millis(1600)).await;
    h.play_started.recv().await.unwrap();

    // Playback in progress: everyone is rejected, including speaker 1.
    h.speak(1);
    h.speak(2);
    settle().await;
    assert_eq!(h.subscriptions(), vec![SpeakerId(1)]);

    // Finish playback; the next start event is admitted again.
    h.sink.release.notify_one();
    settle().await;
    h.speak(1);
    settle().await;
    assert_eq!(h.subscriptions(), vec![SpeakerId(1), SpeakerId(1)]);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn second_speaker_is_locked_out_and_first_buffer_intact() {
    let mut h = harness("locked", Some("hi"), Some("reply"), &[1, 2], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();

    h.speak(1);
    settle().await;
    for amp in [100i16, 200, 300] {
        h.frame(1, 0, voiced(amp));
    }
    settle().await;

    // Speaker 2 tries to start while 1 is recording.
    h.speak(2);
    settle().await;
    assert_eq!(h.subscriptions(), vec![SpeakerId(1)]);

    for amp in [400i16, 500] {
        h.frame(1, 0, voiced(amp));
    }
    settle().await;
    sleep(Duration::from_millis(1600)).await;
    h.play_started.recv().await.unwrap();

    let seen = h.stt_seen.lock().unwrap().clone();
    let mut expected: Vec<i16> = Vec::new();
    for amp in [100i16, 200, 300, 400, 500] {
        expected.extend(vec![amp; 96]);
    }
    assert_eq!(seen, vec![expected]);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn short_silence_merges_segments_into_one_utterance() {
    let mut h = harness("merge", Some("hi"), Some("reply"), &[1], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();

    h.speak(1);
    settle().await;
    for amp in [100i16, 200, 300] {
        h.frame(1, 0, voiced(amp));
    }
    settle().await;

    // Pause shorter than the 1.5s timeout keeps the utterance open.
    sleep(Duration::from_millis(700)).await;
    for amp in [400i16, 500] {
        h.frame(1, 0, voiced(amp));
    }
    settle().await;

    sleep(Duration::from_millis(1600)).await;
    h.play_started.recv().await.unwrap();

    let seen = h.stt_seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let mut expected: Vec<i16> = Vec::new();
    for amp in [100i16, 200, 300, 400, 500] {
        expected.extend(vec![amp; 96]);
    }
    assert_eq!(seen[0], expected);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn leave_is_idempotent() {
    let mut h = harness("leave", Some("hi"), Some("reply"), &[], test_tuning());

    // Leaving before ever joining reports not-connected.
    assert_eq!(h.agent.leave().await, LeaveOutcome::NotConnected);

    h.agent.join(Some(ChannelId(5))).await.unwrap();
    assert_eq!(h.agent.connected_channel(), Some(ChannelId(5)));

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
    assert_eq!(h.closed.load(Ordering::SeqCst), 1);

    assert_eq!(h.agent.leave().await, LeaveOutcome::NotConnected);
    assert_eq!(h.closed.load(Ordering::SeqCst), 1);
    assert_eq!(h.agent.connected_channel(), None);
}

#[tokio::test(start_paused = true)]
async fn join_requires_voice_presence_and_refuses_stacking() {
    let mut h = harness("join", Some("hi"), Some("reply"), &[], test_tuning());

    assert!(matches!(
        h.agent.join(None).await,
        Err(AgentError::NoVoicePresence)
    ));

    h.agent.join(Some(ChannelId(5))).await.unwrap();
    assert!(matches!(
        h.agent.join(Some(ChannelId(6))).await,
        Err(AgentError::AlreadyConnected)
    ));

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn repopulated_channel_cancels_pending_departure() {
    let tuning = SessionTuning {
        idle_delay: Duration::from_secs(50),
        ..SessionTuning::default()
    };
    let mut h = harness("cancel_departure", Some("hi"), Some("reply"), &[], tuning);
    h.agent.join(Some(ChannelId(5))).await.unwrap();
    h.members.store(1, Ordering::SeqCst);

    // First occupancy check at 30s arms departure for 80s.
    sleep(Duration::from_secs(31)).await;
    h.members.store(2, Ordering::SeqCst);
    // Check at 60s cancels it.
    sleep(Duration::from_secs(31)).await;
    // Past the would-be departure instant: still connected.
    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.closed.load(Ordering::SeqCst), 0);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn sustained_vacancy_departs_exactly_once() {
    let mut h = harness("depart", Some("hi"), Some("reply"), &[], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();
    h.members.store(1, Ordering::SeqCst);

    // Check interval (30s) + departure delay (30s) of emptiness.
    sleep(Duration::from_secs(61)).await;
    settle().await;
    assert_eq!(h.closed.load(Ordering::SeqCst), 1);

    // Long after, still torn down exactly once; leave reports not-connected.
    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.closed.load(Ordering::SeqCst), 1);
    assert_eq!(h.agent.leave().await, LeaveOutcome::NotConnected);
    assert_eq!(h.agent.connected_channel(), None);
}

#[tokio::test(start_paused = true)]
async fn speaking_start_cancels_pending_departure() {
    let tuning = SessionTuning {
        idle_delay: Duration::from_secs(50),
        ..SessionTuning::default()
    };
    let mut h = harness("activity_cancel", Some("hi"), Some("reply"), &[1], tuning);
    h.agent.join(Some(ChannelId(5))).await.unwrap();
    h.members.store(1, Ordering::SeqCst);

    sleep(Duration::from_secs(31)).await; // departure armed for t=80s
    h.speak(1);
    settle().await;
    h.members.store(2, Ordering::SeqCst);

    // Well before the next occupancy check; no departure happens.
    sleep(Duration::from_secs(25)).await;
    assert_eq!(h.closed.load(Ordering::SeqCst), 0);
    assert_eq!(h.subscriptions(), vec![SpeakerId(1)]);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn failed_transcription_aborts_turn_and_releases_speaker() {
    let mut h = harness("stt_fail", None, Some("never"), &[1, 1], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();

    h.speak(1);
    settle().await;
    for _ in 0..8 {
        h.frame(1, 0, voiced(500));
    }
    settle().await;
    sleep(Duration::from_millis(1600)).await;
    settle().await;

    // Utterance reached the backend but failed: no reply, no memory entry.
    assert_eq!(h.stt_seen.lock().unwrap().len(), 1);
    assert!(h.played().is_empty());
    assert!(h.memory.history_for(SpeakerId(1)).is_empty());

    // Speaker was released and the busy flag never set: re-admission works.
    h.speak(1);
    settle().await;
    assert_eq!(h.subscriptions(), vec![SpeakerId(1), SpeakerId(1)]);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn failed_generation_plays_fallback_without_memory_entry() {
    let mut h = harness("chat_fail", Some("hello"), None, &[1], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();

    h.speak(1);
    settle().await;
    h.frame(1, 0, voiced(500));
    settle().await;
    sleep(Duration::from_millis(1600)).await;
    h.play_started.recv().await.unwrap();
    settle().await;

    assert_eq!(h.played(), vec![FALLBACK_REPLY.as_bytes().to_vec()]);
    assert!(h.memory.history_for(SpeakerId(1)).is_empty());

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn stream_end_finalizes_with_buffered_audio() {
    let mut h = harness("stream_end", Some("hi"), Some("reply"), &[1], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();

    h.speak(1);
    settle().await;
    h.frame(1, 0, voiced(300));
    settle().await;

    // Drop the frame sender: the source ends before any silence timeout.
    h.frames.get_mut(&SpeakerId(1)).unwrap().clear();
    settle().await;
    h.play_started.recv().await.unwrap();

    let seen = h.stt_seen.lock().unwrap().clone();
    assert_eq!(seen, vec![vec![300i16; 96]]);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn stream_error_finalizes_with_buffered_audio() {
    let mut h = harness("stream_err", Some("hi"), Some("reply"), &[1, 1], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();

    h.speak(1);
    settle().await;
    h.frame(1, 0, voiced(250));
    settle().await;

    // The source errors before any silence timeout: the buffered audio is
    // finalized immediately.
    h.frames[&SpeakerId(1)][0]
        .send(Err(AgentError::Stream("decode failed".into())))
        .unwrap();
    settle().await;
    h.play_started.recv().await.unwrap();
    settle().await;

    let seen = h.stt_seen.lock().unwrap().clone();
    assert_eq!(seen, vec![vec![250i16; 96]]);

    // The lock was released on the failure: re-admission succeeds.
    h.speak(1);
    settle().await;
    assert_eq!(h.subscriptions(), vec![SpeakerId(1), SpeakerId(1)]);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn failed_subscription_releases_the_speaker_lock() {
    // No frame source is prepared for speaker 1, so the subscription fails
    // right after admission.
    let mut h = harness("sub_fail", Some("hi"), Some("reply"), &[2], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();

    h.speak(1);
    settle().await;
    h.speak(2);
    settle().await;
    assert_eq!(h.subscriptions(), vec![SpeakerId(1), SpeakerId(2)]);

    h.frame(2, 0, voiced(300));
    settle().await;
    sleep(Duration::from_millis(1600)).await;
    h.play_started.recv().await.unwrap();

    let seen = h.stt_seen.lock().unwrap().clone();
    assert_eq!(seen, vec![vec![300i16; 96]]);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn playback_error_does_not_leave_busy_flag_stuck() {
    let mut h = harness("play_err", Some("hi"), Some("reply"), &[1, 1], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();
    h.sink.fail.store(true, Ordering::SeqCst);

    h.speak(1);
    settle().await;
    h.frame(1, 0, voiced(400));
    settle().await;
    sleep(Duration::from_millis(1600)).await;
    h.play_started.recv().await.unwrap();
    settle().await;

    // The flag was cleared despite the playback error: the next start event
    // is admitted again.
    h.speak(1);
    settle().await;
    assert_eq!(h.subscriptions(), vec![SpeakerId(1), SpeakerId(1)]);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}

#[tokio::test(start_paused = true)]
async fn empty_utterance_never_reaches_transcription() {
    let mut h = harness("empty_buffer", Some("hi"), Some("reply"), &[1, 1], test_tuning());
    h.agent.join(Some(ChannelId(5))).await.unwrap();

    h.speak(1);
    settle().await;
    // Only silent frames, then the stream ends.
    h.frame(1, 0, silent());
    h.frame(1, 0, silent());
    settle().await;
    h.frames.get_mut(&SpeakerId(1)).unwrap().remove(0);
    settle().await;

    assert!(h.stt_seen.lock().unwrap().is_empty());
    assert!(h.played().is_empty());

    // Speaker lock was released despite the empty buffer.
    h.speak(1);
    settle().await;
    assert_eq!(h.subscriptions(), vec![SpeakerId(1), SpeakerId(1)]);

    assert_eq!(h.agent.leave().await, LeaveOutcome::Left);
}
