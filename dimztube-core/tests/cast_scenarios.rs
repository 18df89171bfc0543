//! End-to-end cast scenarios
//!
//! Sender and receiver run against one in-memory signaling store with
//! scripted transports standing in for real peer connections.
//!
//! Run with: cargo test --test cast_scenarios

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use dimztube_core::config::WebRTCConfig;
use dimztube_core::models::{
    CandidateOrigin, CommandKind, IceCandidate, PlaybackCommand, SessionDescription, SessionPatch,
    SessionStatus,
};
use dimztube_core::service::cast::{
    CastCapabilities, CastManager, CastMode, CastStateSnapshot, CastStatus, MediaElement,
    Notifier, RemotePlayback, WakeLock, WakeLockProvider,
};
use dimztube_core::service::webrtc::{
    CaptureOptions, CaptureSource, IceServerConfig, LocalStream, LocalTrack, PeerConnectionManager,
    PeerConnectionState, PeerTransport, TrackKind, TransportEvent, TransportFactory,
};
use dimztube_core::service::{CastReceiver, PlaybackSink, SessionNegotiator};
use dimztube_core::store::MemoryStore;
use dimztube_core::{Error, Result};

// ---------------------------------------------------------------------------
// Host doubles
// ---------------------------------------------------------------------------

struct ScreenTrack {
    id: String,
    kind: TrackKind,
    live: AtomicBool,
}

impl LocalTrack for ScreenTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ScreenCapture {
    calls: AtomicUsize,
}

#[async_trait]
impl CaptureSource for ScreenCapture {
    async fn capture(&self, options: CaptureOptions) -> Result<LocalStream> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut tracks: Vec<Arc<dyn LocalTrack>> = vec![Arc::new(ScreenTrack {
            id: format!("video-{n}"),
            kind: TrackKind::Video,
            live: AtomicBool::new(true),
        })];
        if options.audio {
            tracks.push(Arc::new(ScreenTrack {
                id: format!("audio-{n}"),
                kind: TrackKind::Audio,
                live: AtomicBool::new(true),
            }));
        }
        Ok(LocalStream::new(format!("display-{n}"), tracks))
    }
}

struct DenyingCapture;

#[async_trait]
impl CaptureSource for DenyingCapture {
    async fn capture(&self, _options: CaptureOptions) -> Result<LocalStream> {
        Err(Error::CaptureDenied("user dismissed the picker".to_string()))
    }
}

struct Lock(Arc<AtomicUsize>);

impl WakeLock for Lock {
    fn release(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct WakeLocks {
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl WakeLockProvider for WakeLocks {
    async fn request(&self) -> Result<Box<dyn WakeLock>> {
        Ok(Box::new(Lock(self.released.clone())))
    }
}

#[derive(Default)]
struct Notifications(Mutex<Vec<String>>);

impl Notifier for Notifications {
    fn notify(&self, error: &Error) {
        self.0.lock().push(error.user_message());
    }
}

struct UnsupportedPlayback {
    prompts: AtomicUsize,
}

#[async_trait]
impl RemotePlayback for UnsupportedPlayback {
    async fn prompt(&self, _element: &MediaElement) -> Result<Option<String>> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Err(Error::CapabilityUnsupported("Remote playback".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Scripted transports
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedTransport {
    log: Mutex<Vec<String>>,
    remote_set: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl ScriptedTransport {
    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<()> {
        self.log.lock().push(format!("track:{}", track.id()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0\r\ns=scripted-offer\r\n"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer("v=0\r\ns=scripted-answer\r\n"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.log
            .lock()
            .push(format!("local:{}", description.sdp_type.as_str()));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.log
            .lock()
            .push(format!("remote:{}", description.sdp_type.as_str()));
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(Error::InvalidState(
                "candidate before remote description".to_string(),
            ));
        }
        self.log.lock().push(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.lock().push("close".to_string());
        self.events.lock().take();
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedFactory {
    created: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedFactory {
    fn transport(&self, index: usize) -> Arc<ScriptedTransport> {
        self.created.lock()[index].clone()
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn create(
        &self,
        _ice_servers: &IceServerConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(ScriptedTransport::default());
        *transport.events.lock() = Some(events);
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

#[derive(Default)]
struct Player {
    applied: Mutex<Vec<PlaybackCommand>>,
}

#[async_trait]
impl PlaybackSink for Player {
    async fn apply(&self, command: &PlaybackCommand) -> Result<()> {
        self.applied.lock().push(command.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

async fn wait_for_state(
    manager: &CastManager,
    predicate: impl Fn(&CastStateSnapshot) -> bool,
) -> CastStateSnapshot {
    let mut rx = manager.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for cast state")
        .expect("cast manager dropped")
        .clone();
    snapshot
}

fn negotiator() -> SessionNegotiator {
    SessionNegotiator::new(Arc::new(MemoryStore::new()))
}

fn candidate(name: &str) -> IceCandidate {
    IceCandidate::new(name, Some("0".to_string()), Some(0))
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_session_subscriber_sees_offer_then_answer() {
    let negotiator = negotiator();
    let id = negotiator.create_session().await.unwrap();
    let mut updates = negotiator.subscribe_to_session(&id).await.unwrap();

    let initial = updates.recv().await.unwrap().unwrap();
    assert_eq!(initial.status, SessionStatus::Waiting);

    negotiator
        .publish_offer(&id, SessionDescription::offer("O"))
        .await
        .unwrap();
    let with_offer = updates.recv().await.unwrap().unwrap();
    assert_eq!(with_offer.offer.as_ref().map(|o| o.sdp.as_str()), Some("O"));
    assert!(with_offer.answer.is_none());

    negotiator
        .publish_answer(&id, SessionDescription::answer("A"))
        .await
        .unwrap();
    let with_answer = updates.recv().await.unwrap().unwrap();
    assert_eq!(with_answer.offer.as_ref().map(|o| o.sdp.as_str()), Some("O"));
    assert_eq!(with_answer.answer.as_ref().map(|a| a.sdp.as_str()), Some("A"));
}

#[tokio::test]
async fn test_candidate_subscriber_sees_appends_in_order() {
    let negotiator = negotiator();
    let id = negotiator.create_session().await.unwrap();
    let mut candidates = negotiator
        .subscribe_to_ice_candidates(&id, CandidateOrigin::Sender)
        .await
        .unwrap();

    negotiator
        .append_ice_candidate(&id, CandidateOrigin::Sender, candidate("C1"))
        .await
        .unwrap();
    negotiator
        .append_ice_candidate(&id, CandidateOrigin::Receiver, candidate("R1"))
        .await
        .unwrap();
    negotiator
        .append_ice_candidate(&id, CandidateOrigin::Sender, candidate("C2"))
        .await
        .unwrap();

    assert_eq!(candidates.recv().await.unwrap().candidate.candidate, "C1");
    assert_eq!(candidates.recv().await.unwrap().candidate.candidate, "C2");
    assert!(candidates.try_recv().is_none());
}

#[tokio::test]
async fn test_offer_overwrite_is_renegotiation() {
    let negotiator = negotiator();
    let id = negotiator.create_session().await.unwrap();

    negotiator
        .publish_offer(&id, SessionDescription::offer("O1"))
        .await
        .unwrap();
    negotiator
        .publish_offer(&id, SessionDescription::offer("O2"))
        .await
        .unwrap();
    // Empty descriptions never count as valid
    negotiator
        .update_session(&id, SessionPatch::answer(SessionDescription::answer("")))
        .await
        .unwrap();

    let session = negotiator.get_session(&id).await.unwrap();
    assert_eq!(session.valid_offer().map(|o| o.sdp.as_str()), Some("O2"));
    assert!(session.valid_answer().is_none());
}

// ---------------------------------------------------------------------------
// Peer connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_candidates_deferred_until_answer() {
    let factory = Arc::new(ScriptedFactory::default());
    let peer = PeerConnectionManager::new(factory.clone(), &WebRTCConfig::default());
    let capture = ScreenCapture::default();

    peer.start_as_sender(&capture, CaptureOptions::default())
        .await
        .unwrap();
    peer.add_remote_candidate(candidate("early")).await.unwrap();

    let transport = factory.transport(0);
    assert!(!transport.log().iter().any(|l| l.starts_with("candidate:")));

    peer.accept_answer(SessionDescription::answer("v=0 answer"))
        .await
        .unwrap();
    peer.add_remote_candidate(candidate("late")).await.unwrap();

    let log = transport.log();
    let remote = log.iter().position(|l| l == "remote:answer").unwrap();
    assert_eq!(log[remote + 1], "candidate:early");
    assert_eq!(log[remote + 2], "candidate:late");

    peer.close().await;
    peer.close().await;
    assert_eq!(peer.state(), PeerConnectionState::Closed);
}

// ---------------------------------------------------------------------------
// Cast manager
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unsupported_remote_playback_falls_back_to_mirror() {
    let capture = Arc::new(ScreenCapture::default());
    let playback = Arc::new(UnsupportedPlayback {
        prompts: AtomicUsize::new(0),
    });
    let manager = CastManager::new(
        CastCapabilities::default()
            .with_display_capture(capture.clone())
            .with_remote_playback(playback.clone()),
        &WebRTCConfig::default(),
    );

    manager.start_auto_cast().await.unwrap();

    assert_eq!(manager.status(), CastStatus::Connected);
    assert_eq!(manager.mode(), CastMode::Mirror);
    assert_eq!(capture.calls.load(Ordering::SeqCst), 1);
    assert_eq!(playback.prompts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_while_connected_leaves_state_untouched() {
    let capture = Arc::new(ScreenCapture::default());
    let notifications = Arc::new(Notifications::default());
    let manager = CastManager::new(
        CastCapabilities::default()
            .with_display_capture(capture.clone())
            .with_notifier(notifications.clone()),
        &WebRTCConfig::default(),
    );
    manager.start_auto_cast().await.unwrap();
    let before = manager.snapshot();
    let stream_id = manager.stream().map(|s| s.id().to_string());

    let result = manager.start_auto_cast().await;

    assert!(matches!(result, Err(Error::AlreadyActive)));
    assert_eq!(manager.snapshot(), before);
    assert_eq!(manager.stream().map(|s| s.id().to_string()), stream_id);
    assert_eq!(capture.calls.load(Ordering::SeqCst), 1);
    assert_eq!(notifications.0.lock().len(), 1);
}

#[tokio::test]
async fn test_stop_session_twice() {
    let wake_locks = Arc::new(WakeLocks::default());
    let manager = CastManager::new(
        CastCapabilities::default()
            .with_display_capture(Arc::new(ScreenCapture::default()))
            .with_wake_lock(wake_locks.clone()),
        &WebRTCConfig::default(),
    );
    manager.start_auto_cast().await.unwrap();
    assert!(manager.has_wake_lock());
    let stream = manager.stream().unwrap();

    manager.stop_session().await;
    manager.stop_session().await;

    assert_eq!(manager.status(), CastStatus::Disconnected);
    assert_eq!(manager.mode(), CastMode::None);
    assert!(!manager.has_wake_lock());
    assert!(!stream.is_live());
    assert_eq!(wake_locks.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_capture_denied_returns_to_disconnected() {
    let notifications = Arc::new(Notifications::default());
    let manager = CastManager::new(
        CastCapabilities::default()
            .with_display_capture(Arc::new(DenyingCapture))
            .with_notifier(notifications.clone()),
        &WebRTCConfig::default(),
    );

    assert!(matches!(
        manager.start_auto_cast().await,
        Err(Error::CaptureDenied(_))
    ));
    assert_eq!(manager.status(), CastStatus::Disconnected);
    assert_eq!(
        notifications.0.lock().as_slice(),
        ["Screen capture was denied".to_string()]
    );
}

#[tokio::test]
async fn test_peer_mirror_end_to_end() {
    let negotiator = negotiator();
    let factory = Arc::new(ScriptedFactory::default());
    let wake_locks = Arc::new(WakeLocks::default());
    let notifications = Arc::new(Notifications::default());

    let sender = CastManager::new(
        CastCapabilities::default()
            .with_display_capture(Arc::new(ScreenCapture::default()))
            .with_wake_lock(wake_locks.clone())
            .with_notifier(notifications.clone())
            .with_peer_mirror(negotiator.clone(), factory.clone()),
        &WebRTCConfig::default(),
    );
    let player = Arc::new(Player::default());
    let receiver = CastReceiver::new(
        negotiator.clone(),
        factory.clone(),
        WebRTCConfig::default(),
        player.clone(),
    );

    let session_id = sender.start_peer_mirror().await.unwrap();
    assert_eq!(sender.status(), CastStatus::Connecting);
    let sender_transport = factory.transport(0);

    // Sender candidates gathered before the receiver joins are replayed
    sender_transport.emit(TransportEvent::LocalCandidate(candidate("s1")));

    let joined = receiver.join(&session_id).await.unwrap();
    let receiver_transport = factory.transport(1);

    let sender_log = sender_transport.clone();
    eventually("sender to apply the answer", move || {
        sender_log.log().contains(&"remote:answer".to_string())
    })
    .await;
    let receiver_log = receiver_transport.clone();
    eventually("receiver to apply the sender candidate", move || {
        receiver_log.log().contains(&"candidate:s1".to_string())
    })
    .await;

    receiver_transport.emit(TransportEvent::LocalCandidate(candidate("r1")));
    let sender_log = sender_transport.clone();
    eventually("sender to apply the receiver candidate", move || {
        sender_log.log().contains(&"candidate:r1".to_string())
    })
    .await;

    sender_transport.emit(TransportEvent::StateChanged(PeerConnectionState::Connected));
    let snapshot = wait_for_state(&sender, |s| s.status == CastStatus::Connected).await;
    assert_eq!(snapshot.mode, CastMode::Mirror);
    assert!(snapshot.wake_lock_held);

    sender
        .send_command(CommandKind::Seek, Some(42.0))
        .await
        .unwrap();
    let applied = player.clone();
    eventually("receiver to apply the command", move || {
        applied.applied.lock().len() == 1
    })
    .await;
    assert_eq!(player.applied.lock()[0].kind, CommandKind::Seek);

    sender.stop_session().await;
    assert_eq!(
        negotiator.get_session(&session_id).await.unwrap().status,
        SessionStatus::Disconnected
    );
    let receiver_log = receiver_transport.clone();
    eventually("receiver to close", move || {
        receiver_log.log().contains(&"close".to_string())
    })
    .await;

    assert!(notifications.0.lock().is_empty());
    assert_eq!(wake_locks.released.load(Ordering::SeqCst), 1);
    drop(joined);
}

#[tokio::test]
async fn test_peer_failure_while_connected() {
    let negotiator = negotiator();
    let factory = Arc::new(ScriptedFactory::default());
    let wake_locks = Arc::new(WakeLocks::default());
    let notifications = Arc::new(Notifications::default());
    let manager = CastManager::new(
        CastCapabilities::default()
            .with_display_capture(Arc::new(ScreenCapture::default()))
            .with_wake_lock(wake_locks.clone())
            .with_notifier(notifications.clone())
            .with_peer_mirror(negotiator.clone(), factory.clone()),
        &WebRTCConfig::default(),
    );

    let session_id = manager.start_peer_mirror().await.unwrap();
    let transport = factory.transport(0);
    transport.emit(TransportEvent::StateChanged(PeerConnectionState::Connected));
    wait_for_state(&manager, |s| s.status == CastStatus::Connected).await;
    let stream = manager.stream().unwrap();

    transport.emit(TransportEvent::StateChanged(PeerConnectionState::Failed));
    let snapshot = wait_for_state(&manager, |s| s.status == CastStatus::Disconnected).await;

    assert_eq!(snapshot.mode, CastMode::None);
    assert!(!snapshot.wake_lock_held);
    assert!(!stream.is_live());
    assert_eq!(wake_locks.released.load(Ordering::SeqCst), 1);
    assert_eq!(
        notifications.0.lock().as_slice(),
        ["Connection to the receiver failed".to_string()]
    );
    assert_eq!(
        negotiator.get_session(&session_id).await.unwrap().status,
        SessionStatus::Failed
    );

    // No second notification once torn down
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(notifications.0.lock().len(), 1);
}
