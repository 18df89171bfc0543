//! Cast manager state machine
//!
//! `disconnected -> connecting -> connected -> disconnected`. Every exit
//! path (stop, failure, remote hang-up, drop) goes through the same
//! teardown routine.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::capability::{CastCapabilities, MediaElement, WakeLock};
use super::events::{CastFrameworkEvent, CastFrameworkState, Registration};
use super::{CastMode, CastStateSnapshot, CastStatus};
use crate::config::WebRTCConfig;
use crate::models::{
    CandidateOrigin, CastSession, CommandKind, IceCandidateRecord, PlaybackCommand, SessionId,
    SessionStatus,
};
use crate::service::negotiator::SessionNegotiator;
use crate::service::webrtc::{
    CaptureOptions, LocalStream, PeerConnectionManager, PeerConnectionState, PeerEvent,
};
use crate::store::Subscription;
use crate::{Error, Result};

struct PeerMirror {
    session_id: SessionId,
    peer: Arc<PeerConnectionManager>,
    stream: LocalStream,
    tasks: Vec<JoinHandle<()>>,
}

/// Resources owned by the strategy currently casting
#[derive(Default)]
enum ActiveCast {
    #[default]
    None,
    Bridge,
    RemotePlayback {
        stream: LocalStream,
    },
    LocalMirror {
        stream: LocalStream,
    },
    PeerMirror(PeerMirror),
    Chromecast,
}

impl ActiveCast {
    fn stream(&self) -> Option<&LocalStream> {
        match self {
            Self::RemotePlayback { stream } | Self::LocalMirror { stream } => Some(stream),
            Self::PeerMirror(mirror) => Some(&mirror.stream),
            Self::None | Self::Bridge | Self::Chromecast => None,
        }
    }

    fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::PeerMirror(mirror) => Some(&mirror.session_id),
            _ => None,
        }
    }

    const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Default)]
struct CastState {
    status: CastStatus,
    mode: CastMode,
    device_name: Option<String>,
    wake_lock: Option<Box<dyn WakeLock>>,
    active: ActiveCast,
}

impl CastState {
    fn snapshot(&self) -> CastStateSnapshot {
        CastStateSnapshot {
            status: self.status,
            mode: self.mode,
            device_name: self.device_name.clone(),
            session_id: self.active.session_id().cloned(),
            wake_lock_held: self.wake_lock.is_some(),
            streaming: self.active.stream().is_some_and(LocalStream::is_live),
        }
    }
}

struct Shared {
    capabilities: CastCapabilities,
    capture_options: CaptureOptions,
    webrtc: WebRTCConfig,
    element: MediaElement,
    // Never held across an await
    state: Mutex<CastState>,
    // Serialises start/stop and asynchronous state changes
    gate: tokio::sync::Mutex<()>,
    snapshot_tx: watch::Sender<CastStateSnapshot>,
}

impl Shared {
    fn update<R>(&self, f: impl FnOnce(&mut CastState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            (result, state.snapshot())
        };

        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }

    fn notify(&self, error: &Error) {
        self.capabilities.notifier.notify(error);
    }

    /// Mark connected and take a wake lock when the host offers one
    async fn enter_connected(&self) {
        let holds_lock = self.update(|s| {
            s.status = CastStatus::Connected;
            s.wake_lock.is_some()
        });
        if holds_lock {
            return;
        }

        let Some(provider) = self.capabilities.wake_lock.clone() else {
            debug!("Wake lock not available on this host");
            return;
        };

        match provider.request().await {
            Ok(lock) => {
                let unused = self.update(|s| {
                    if s.status == CastStatus::Connected && s.wake_lock.is_none() {
                        s.wake_lock = Some(lock);
                        None
                    } else {
                        Some(lock)
                    }
                });
                if let Some(lock) = unused {
                    lock.release();
                }
            }
            Err(e) => debug!(error = %e, "Wake lock request failed"),
        }
    }

    /// Synchronous part of teardown; returns a peer mirror still to close
    fn release_now(
        &self,
        active: ActiveCast,
        wake_lock: Option<Box<dyn WakeLock>>,
    ) -> Option<PeerMirror> {
        if let Some(lock) = wake_lock {
            lock.release();
        }
        self.element.clear_source();

        match active {
            ActiveCast::None => None,
            ActiveCast::Bridge => {
                if let Some(bridge) = &self.capabilities.bridge {
                    bridge.stop_session();
                }
                None
            }
            ActiveCast::RemotePlayback { stream } | ActiveCast::LocalMirror { stream } => {
                stream.stop();
                None
            }
            ActiveCast::PeerMirror(mirror) => {
                for task in &mirror.tasks {
                    task.abort();
                }
                mirror.stream.stop();
                Some(mirror)
            }
            ActiveCast::Chromecast => {
                if let Some(framework) = &self.capabilities.cast_framework {
                    framework.end_current_session();
                }
                None
            }
        }
    }

    /// The single teardown routine
    async fn teardown(&self, session_status: SessionStatus) {
        let (active, wake_lock) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.active), state.wake_lock.take())
        };

        if let Some(mirror) = self.release_now(active, wake_lock) {
            mirror.peer.close().await;
            if let Some(support) = &self.capabilities.peer_mirror {
                if let Err(e) = support
                    .negotiator
                    .mark_status(&mirror.session_id, session_status)
                    .await
                {
                    warn!(session_id = %mirror.session_id, error = %e, "Failed to mark cast session ended");
                }
            }
        }

        self.update(|s| {
            s.status = CastStatus::Disconnected;
            s.mode = CastMode::None;
            s.device_name = None;
        });
    }

    fn is_current(&self, session_id: &SessionId) -> bool {
        self.state.lock().active.session_id() == Some(session_id)
    }

    async fn on_peer_connected(&self, session_id: &SessionId) {
        let _gate = self.gate.lock().await;
        if !self.is_current(session_id) || self.state.lock().status == CastStatus::Connected {
            return;
        }

        info!(session_id = %session_id, "Peer mirror connected");
        if let Some(support) = &self.capabilities.peer_mirror {
            if let Err(e) = support
                .negotiator
                .mark_status(session_id, SessionStatus::Connected)
                .await
            {
                warn!(session_id = %session_id, error = %e, "Failed to mark cast session connected");
            }
        }
        self.enter_connected().await;
    }

    async fn end_peer_mirror(&self, session_id: &SessionId, error: Option<Error>) {
        let _gate = self.gate.lock().await;
        if !self.is_current(session_id) {
            return;
        }

        let session_status = match &error {
            Some(e) => {
                warn!(session_id = %session_id, error = %e, "Peer mirror failed");
                self.notify(e);
                SessionStatus::Failed
            }
            None => {
                info!(session_id = %session_id, "Peer mirror ended by receiver");
                SessionStatus::Disconnected
            }
        };
        self.teardown(session_status).await;
    }

    async fn on_capture_ended(&self, stream: &LocalStream) {
        let _gate = self.gate.lock().await;
        let current = self
            .state
            .lock()
            .active
            .stream()
            .is_some_and(|active| active.same_capture(stream));
        if !current {
            return;
        }

        info!(stream_id = stream.id(), "Capture ended, stopping cast");
        self.teardown(SessionStatus::Disconnected).await;
    }

    async fn on_cast_event(&self, event: CastFrameworkEvent) {
        let _gate = self.gate.lock().await;

        match event {
            CastFrameworkEvent::SessionStarted { device_name }
            | CastFrameworkEvent::SessionResumed { device_name } => {
                let preempted = {
                    let state = self.state.lock();
                    (!state.active.is_none() && state.mode != CastMode::Chromecast)
                        .then_some(state.mode)
                };
                if let Some(mode) = preempted {
                    warn!(mode = mode.as_str(), "Cast framework session preempts active cast");
                    self.teardown(SessionStatus::Disconnected).await;
                }

                info!(device = device_name.as_deref().unwrap_or("unknown"), "Chromecast session active");
                self.update(|s| {
                    s.active = ActiveCast::Chromecast;
                    s.mode = CastMode::Chromecast;
                    s.device_name = device_name;
                });
                self.enter_connected().await;
            }
            CastFrameworkEvent::SessionEnded => {
                let ended = self.update(|s| {
                    if matches!(s.active, ActiveCast::Chromecast) {
                        s.active = ActiveCast::None;
                        true
                    } else {
                        false
                    }
                });
                if ended {
                    info!("Chromecast session ended");
                    self.teardown(SessionStatus::Disconnected).await;
                }
            }
            CastFrameworkEvent::CastStateChanged { state } => match state {
                CastFrameworkState::Connecting => self.update(|s| {
                    if s.status == CastStatus::Disconnected {
                        s.status = CastStatus::Connecting;
                        s.mode = CastMode::Chromecast;
                    }
                }),
                CastFrameworkState::NotConnected | CastFrameworkState::NoDevicesAvailable => {
                    self.update(|s| {
                        if s.mode == CastMode::Chromecast && s.active.is_none() {
                            s.status = CastStatus::Disconnected;
                            s.mode = CastMode::None;
                            s.device_name = None;
                        }
                    });
                }
                CastFrameworkState::Connected => {}
            },
        }
    }
}

async fn run_cast_events(
    shared: Weak<Shared>,
    mut events: mpsc::UnboundedReceiver<CastFrameworkEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.on_cast_event(event).await;
    }
}

/// Ends the cast when the host stops the capture it is built on
async fn watch_capture(shared: Weak<Shared>, stream: LocalStream) {
    stream.ended().await;
    if let Some(shared) = shared.upgrade() {
        shared.on_capture_ended(&stream).await;
    }
}

async fn relay_local_candidates(
    negotiator: SessionNegotiator,
    session_id: SessionId,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = negotiator
                    .append_ice_candidate(&session_id, CandidateOrigin::Sender, candidate)
                    .await
                {
                    warn!(session_id = %session_id, error = %e, "Failed to publish local candidate");
                }
            }
            PeerEvent::RemoteTrack(track) => {
                debug!(session_id = %session_id, track_id = %track.id, "Unexpected remote track on sender");
            }
        }
    }
}

async fn apply_remote_candidates(
    peer: Arc<PeerConnectionManager>,
    mut candidates: Subscription<IceCandidateRecord>,
) {
    while let Some(record) = candidates.recv().await {
        if let Err(e) = peer.add_remote_candidate(record.candidate).await {
            debug!(sequence = record.sequence, error = %e, "Remote candidate not applied");
        }
    }
}

async fn follow_session(
    shared: Weak<Shared>,
    peer: Arc<PeerConnectionManager>,
    session_id: SessionId,
    mut updates: Subscription<Option<CastSession>>,
) {
    while let Some(document) = updates.recv().await {
        let ended = match document {
            None => Some(Some(Error::NotFound(format!("cast session {session_id}")))),
            Some(session) if session.status == SessionStatus::Failed => Some(Some(
                Error::NegotiationFailed("receiver reported failure".to_string()),
            )),
            Some(session) if session.status == SessionStatus::Disconnected => Some(None),
            Some(session) => {
                if let Some(answer) = session.valid_answer() {
                    if let Err(e) = peer.accept_answer(answer.clone()).await {
                        warn!(session_id = %session_id, error = %e, "Failed to apply answer");
                    }
                }
                None
            }
        };

        if let Some(error) = ended {
            tokio::spawn(end_peer_mirror(shared, session_id, error));
            break;
        }
    }
}

async fn watch_peer_state(
    shared: Weak<Shared>,
    session_id: SessionId,
    mut states: watch::Receiver<PeerConnectionState>,
) {
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        debug!(session_id = %session_id, state = state.as_str(), "Peer mirror state changed");

        match state {
            PeerConnectionState::Connected => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.on_peer_connected(&session_id).await;
            }
            PeerConnectionState::Failed => {
                let error = Error::NegotiationFailed("peer connection failed".to_string());
                // Teardown aborts this task, so it runs detached
                tokio::spawn(end_peer_mirror(shared, session_id, Some(error)));
                break;
            }
            PeerConnectionState::Closed => {
                tokio::spawn(end_peer_mirror(shared, session_id, None));
                break;
            }
            _ => {}
        }
    }
}

async fn end_peer_mirror(shared: Weak<Shared>, session_id: SessionId, error: Option<Error>) {
    if let Some(shared) = shared.upgrade() {
        shared.end_peer_mirror(&session_id, error).await;
    }
}

/// Orchestrates outbound casting for one host
pub struct CastManager {
    shared: Arc<Shared>,
    event_task: Option<JoinHandle<()>>,
    _registration: Option<Registration>,
}

impl CastManager {
    /// Must be called inside a tokio runtime when cast framework events are
    /// wired in.
    pub fn new(capabilities: CastCapabilities, config: &WebRTCConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(CastStateSnapshot::default());
        let registry = capabilities.cast_events.clone();

        let shared = Arc::new(Shared {
            capabilities,
            capture_options: CaptureOptions {
                video: true,
                audio: config.capture_audio,
            },
            webrtc: config.clone(),
            element: MediaElement::default(),
            state: Mutex::new(CastState::default()),
            gate: tokio::sync::Mutex::new(()),
            snapshot_tx,
        });

        let (event_task, registration) = match registry {
            Some(registry) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let registration = registry.register(move |event| {
                    let _ = tx.send(event.clone());
                });
                let task = tokio::spawn(run_cast_events(Arc::downgrade(&shared), rx));
                (Some(task), Some(registration))
            }
            None => (None, None),
        };

        Self {
            shared,
            event_task,
            _registration: registration,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CastStateSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Receiver of state snapshots, for UI shells
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CastStateSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> CastStatus {
        self.shared.state.lock().status
    }

    #[must_use]
    pub fn mode(&self) -> CastMode {
        self.shared.state.lock().mode
    }

    #[must_use]
    pub fn device_name(&self) -> Option<String> {
        self.shared.state.lock().device_name.clone()
    }

    #[must_use]
    pub fn has_wake_lock(&self) -> bool {
        self.shared.state.lock().wake_lock.is_some()
    }

    /// Locally captured stream, if a capture-based strategy is active
    #[must_use]
    pub fn stream(&self) -> Option<LocalStream> {
        self.shared.state.lock().active.stream().cloned()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.state.lock().active.session_id().cloned()
    }

    #[must_use]
    pub fn element(&self) -> &MediaElement {
        &self.shared.element
    }

    fn watch_capture(&self, stream: &LocalStream) {
        tokio::spawn(watch_capture(Arc::downgrade(&self.shared), stream.clone()));
    }

    fn begin(&self) -> Result<()> {
        let status = self.shared.state.lock().status;
        if status != CastStatus::Disconnected {
            warn!(status = ?status, "Cast already active");
            self.shared.notify(&Error::AlreadyActive);
            return Err(Error::AlreadyActive);
        }

        self.shared.update(|s| s.status = CastStatus::Connecting);
        Ok(())
    }

    async fn finish<T>(&self, strategy: &'static str, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(strategy, error = %e, "Cast attempt failed");
                self.shared.notify(&e);
                self.shared.teardown(SessionStatus::Failed).await;
                Err(e)
            }
        }
    }

    /// Pick the best available strategy and start casting
    pub async fn start_auto_cast(&self) -> Result<()> {
        let _gate = self.shared.gate.lock().await;
        self.begin()?;
        let result = self.auto_cast().await;
        self.finish("auto", result).await
    }

    async fn auto_cast(&self) -> Result<()> {
        let shared = &self.shared;

        if let Some(bridge) = shared.capabilities.bridge.clone() {
            bridge.start_mirror();
            shared.update(|s| {
                s.active = ActiveCast::Bridge;
                s.mode = CastMode::Mirror;
            });
            info!(mode = "mirror", "Casting through host bridge");
            shared.enter_connected().await;
            return Ok(());
        }

        let capture = shared.capabilities.require_display_capture()?;
        let stream = capture.capture(shared.capture_options).await?;
        shared.update(|s| {
            s.active = ActiveCast::LocalMirror {
                stream: stream.clone(),
            };
        });
        shared.element.set_source(stream.clone());
        self.watch_capture(&stream);

        if let Some(remote) = shared.capabilities.remote_playback.clone() {
            match remote.prompt(&shared.element).await {
                Ok(device_name) => {
                    info!(device = device_name.as_deref().unwrap_or("unknown"), "Casting through remote playback");
                    shared.update(|s| {
                        s.active = ActiveCast::RemotePlayback {
                            stream: stream.clone(),
                        };
                        s.mode = CastMode::Miracast;
                        s.device_name = device_name;
                    });
                    shared.enter_connected().await;
                    return Ok(());
                }
                Err(e @ Error::NoCompatibleDevice(_)) => {
                    shared.notify(&e);
                    info!("No remote playback device, mirroring locally");
                }
                Err(Error::CapabilityUnsupported(_)) => {
                    debug!("Remote playback unsupported, mirroring locally");
                }
                Err(e) => return Err(e),
            }
        }

        if !stream.is_live() {
            return Err(Error::CaptureDenied(
                "capture ended before mirroring started".to_string(),
            ));
        }

        shared.update(|s| s.mode = CastMode::Mirror);
        info!(mode = "mirror", stream_id = stream.id(), "Mirroring locally");
        shared.enter_connected().await;
        Ok(())
    }

    /// Cast a media URL through the host bridge
    pub async fn start_bridge_cast(&self, url: &str) -> Result<()> {
        let _gate = self.shared.gate.lock().await;
        self.begin()?;
        let result = self.bridge_cast(url).await;
        self.finish("bridge", result).await
    }

    async fn bridge_cast(&self, url: &str) -> Result<()> {
        let bridge = self
            .shared
            .capabilities
            .bridge
            .clone()
            .ok_or_else(|| Error::CapabilityUnsupported("Native casting".to_string()))?;
        if url.trim().is_empty() {
            return Err(Error::InvalidInput("media url is empty".to_string()));
        }

        bridge.start_miracast(url);
        self.shared.update(|s| {
            s.active = ActiveCast::Bridge;
            s.mode = CastMode::Miracast;
        });
        info!(url, "Casting media through host bridge");
        self.shared.enter_connected().await;
        Ok(())
    }

    /// Mirror the display to a remote receiver over a peer connection.
    ///
    /// Returns once the offer is published; the manager turns `connected`
    /// when the peer connection does.
    pub async fn start_peer_mirror(&self) -> Result<SessionId> {
        let _gate = self.shared.gate.lock().await;
        self.begin()?;
        let result = self.peer_mirror().await;
        self.finish("peer-mirror", result).await
    }

    async fn peer_mirror(&self) -> Result<SessionId> {
        let shared = &self.shared;
        let support = shared.capabilities.require_peer_mirror()?;
        let capture = shared.capabilities.require_display_capture()?;
        let negotiator = support.negotiator.clone();

        let stream = capture.capture(shared.capture_options).await?;
        shared.update(|s| {
            s.active = ActiveCast::LocalMirror {
                stream: stream.clone(),
            };
            s.mode = CastMode::Mirror;
        });
        shared.element.set_source(stream.clone());
        self.watch_capture(&stream);

        let session_id = negotiator.create_session().await?;
        let peer = Arc::new(PeerConnectionManager::new(
            support.transports.clone(),
            &shared.webrtc,
        ));
        shared.update(|s| {
            s.active = ActiveCast::PeerMirror(PeerMirror {
                session_id: session_id.clone(),
                peer: peer.clone(),
                stream: stream.clone(),
                tasks: Vec::new(),
            });
        });

        let start = peer.start_with_stream(stream).await?;
        negotiator
            .publish_offer(&session_id, start.description)
            .await?;

        let updates = negotiator.subscribe_to_session(&session_id).await?;
        let remote_candidates = negotiator
            .subscribe_to_ice_candidates(&session_id, CandidateOrigin::Receiver)
            .await?;

        let weak = Arc::downgrade(shared);
        let tasks = vec![
            tokio::spawn(relay_local_candidates(
                negotiator.clone(),
                session_id.clone(),
                start.events,
            )),
            tokio::spawn(apply_remote_candidates(peer.clone(), remote_candidates)),
            tokio::spawn(follow_session(
                weak.clone(),
                peer.clone(),
                session_id.clone(),
                updates,
            )),
            tokio::spawn(watch_peer_state(weak, session_id.clone(), peer.state_changes())),
        ];

        let orphaned = shared.update(|s| match &mut s.active {
            ActiveCast::PeerMirror(mirror) if mirror.session_id == session_id => {
                mirror.tasks = tasks;
                None
            }
            _ => Some(tasks),
        });
        if let Some(tasks) = orphaned {
            for task in tasks {
                task.abort();
            }
            return Err(Error::InvalidState("peer mirror ended during setup".to_string()));
        }

        info!(session_id = %session_id, "Peer mirror offer published");
        Ok(session_id)
    }

    /// Relay a playback command to the active peer mirror's receiver
    pub async fn send_command(
        &self,
        kind: CommandKind,
        payload: Option<f64>,
    ) -> Result<PlaybackCommand> {
        self.command(kind, payload).await.inspect_err(|e| {
            warn!(command = kind.as_str(), error = %e, "Failed to send playback command");
            self.shared.notify(e);
        })
    }

    async fn command(&self, kind: CommandKind, payload: Option<f64>) -> Result<PlaybackCommand> {
        let session_id = self
            .session_id()
            .ok_or_else(|| Error::InvalidState("no active peer mirror".to_string()))?;
        let support = self.shared.capabilities.require_peer_mirror()?;
        support
            .negotiator
            .send_command(&session_id, kind, payload)
            .await
    }

    /// Tear everything down and return to `disconnected`; idempotent
    pub async fn stop_session(&self) {
        let _gate = self.shared.gate.lock().await;
        self.shared.teardown(SessionStatus::Disconnected).await;
        info!("Cast session stopped");
    }
}

impl Drop for CastManager {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }

        let (active, wake_lock) = {
            let mut state = self.shared.state.lock();
            (std::mem::take(&mut state.active), state.wake_lock.take())
        };
        if let Some(mirror) = self.shared.release_now(active, wake_lock) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { mirror.peer.close().await });
            }
        }
    }
}

impl std::fmt::Debug for CastManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastManager")
            .field("state", &self.snapshot())
            .field("capabilities", &self.shared.capabilities)
            .finish()
    }
}
