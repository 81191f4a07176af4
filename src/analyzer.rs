//! Analyzer lifecycle and thread wiring
//!
//! Owns the periodic analysis loop, the slower reset probe, the recognition
//! gateway and the host command relay, and wires them to one
//! `SegmentTimeline`. The host plugin drives this type: construct it with
//! its frame store and timer bindings, subscribe observers, call `start`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, SplitterError};
use crate::frames::{FrameSource, FrameStore};
use crate::host::{CommandSink, HostCommand, HostRelay, HostStateMirror, TimerHost};
use crate::observers::{ObserverRegistry, ResultObserver};
use crate::policy::PolicyTable;
use crate::recognition::RecognitionGateway;
use crate::settings::{AnalysisSettings, RecognizerFactory};
use crate::task::PeriodicTask;
use crate::timeline::SegmentTimeline;

/// How often the newest frame is analyzed.
const ANALYSIS_PERIOD: Duration = Duration::from_millis(500);

/// How often the capture is probed for the game's reset screen.
const RESET_PROBE_PERIOD: Duration = Duration::from_millis(800);

struct AnalyzerInner {
    gateway: RecognitionGateway,
    timeline: Mutex<SegmentTimeline>,
    frames: FrameSource,
    relay: HostRelay,
    observers: ObserverRegistry,
    mirror: HostStateMirror,
    factory: Arc<dyn RecognizerFactory>,
    policies: PolicyTable,
}

impl AnalyzerInner {
    /// One analysis tick. Holds the engine lock for the whole tick so a
    /// concurrent settings swap cannot tear the engine down mid-analysis.
    fn tick(&self) {
        let mut engine = self.gateway.lock();
        let mut timeline = self.timeline.lock();
        timeline.tick(
            &mut **engine,
            &self.frames,
            &self.relay,
            &self.observers,
            self.mirror.snapshot(),
        );
    }

    /// Probe for the game's reset screen. Shares the engine lock with the
    /// analysis tick but never touches timeline state: the host reacts to the
    /// reset command with its own reset event, which comes back through
    /// [`FrameAnalyzer::reset`].
    fn probe_for_reset(&self) {
        let mut engine = self.gateway.lock();
        if engine.check_for_reset_screen() {
            log::info!("reset screen detected");
            self.relay.send(HostCommand::Reset);
        }
    }
}

/// Top-level frame analyzer.
pub struct FrameAnalyzer {
    // Tasks drop (and join) before `inner`, so the relay drains last.
    analysis_task: PeriodicTask,
    reset_task: PeriodicTask,
    inner: Arc<AnalyzerInner>,
}

impl FrameAnalyzer {
    pub fn new(
        settings: &AnalysisSettings,
        factory: Arc<dyn RecognizerFactory>,
        store: Arc<dyn FrameStore>,
        host: Box<dyn TimerHost>,
        policies: PolicyTable,
    ) -> Result<Self> {
        let engine = factory.create(settings)?;
        let policy = policies.get(&settings.game_id)?.clone();

        let inner = Arc::new(AnalyzerInner {
            gateway: RecognitionGateway::new(engine),
            timeline: Mutex::new(SegmentTimeline::new(policy)),
            frames: FrameSource::new(store),
            relay: HostRelay::new(host)?,
            observers: ObserverRegistry::new(),
            mirror: HostStateMirror::new(),
            factory,
            policies,
        });

        let tick_inner = inner.clone();
        let analysis_task = PeriodicTask::new("frame-analysis", ANALYSIS_PERIOD, move || {
            tick_inner.tick();
        });
        let reset_inner = inner.clone();
        let reset_task = PeriodicTask::new("reset-probe", RESET_PROBE_PERIOD, move || {
            reset_inner.probe_for_reset();
        });

        Ok(Self {
            analysis_task,
            reset_task,
            inner,
        })
    }

    /// Begin capturing and analyzing. While analysis runs, the host's own
    /// real-time clock is paused: game time is authoritative.
    pub fn start(&mut self) -> Result<()> {
        if self.analysis_task.is_running() {
            return Err(SplitterError::AlreadyRunning);
        }
        log::info!("starting frame analysis");
        self.inner.frames.start_capturing();
        self.inner.relay.send(HostCommand::SetGameTimePaused(true));
        self.analysis_task.start()?;
        self.reset_task.start()?;
        Ok(())
    }

    /// Stop analysis. Blocks until the in-flight tick (if any) finishes, then
    /// hands the clock back to the host.
    pub fn stop(&mut self) {
        if !self.analysis_task.is_running() {
            return;
        }
        log::info!("stopping frame analysis");
        self.analysis_task.stop();
        self.reset_task.stop();
        self.inner.frames.stop_capturing();
        self.inner.frames.clear();
        self.inner.relay.send(HostCommand::SetGameTimePaused(false));
    }

    pub fn is_running(&self) -> bool {
        self.analysis_task.is_running()
    }

    /// Swap the recognition engine and timeline policy for new settings.
    /// Blocks until no analysis call is in flight; the run reconstruction
    /// starts over under the new game.
    pub fn apply_settings(&self, settings: &AnalysisSettings) -> Result<()> {
        let engine = self.inner.factory.create(settings)?;
        let policy = self.inner.policies.get(&settings.game_id)?.clone();

        // Both locks together: no tick may observe the new engine with the
        // old policy or vice versa.
        let mut slot = self.inner.gateway.lock();
        let mut timeline = self.inner.timeline.lock();
        *slot = engine;
        timeline.set_policy(policy);
        self.inner.frames.clear();
        log::info!("settings applied for game {}", settings.game_id);
        Ok(())
    }

    /// Discard the run reconstruction (host-initiated reset).
    pub fn reset(&self) {
        self.inner.timeline.lock().reset();
        self.inner.frames.clear();
    }

    pub fn subscribe(&self, observer: Box<dyn ResultObserver>) {
        self.inner.observers.subscribe(observer);
    }

    /// Mirror of the host's run position; the host plugin keeps it current.
    pub fn host_state(&self) -> &HostStateMirror {
        &self.inner.mirror
    }

    /// The reconstructed game time in milliseconds.
    pub fn game_time(&self) -> i64 {
        self.inner.timeline.lock().game_time()
    }
}
