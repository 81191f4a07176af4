//! Segment timeline state machine
//!
//! Consumes per-frame recognition results in capture order, maintains the
//! running game-time reconstruction, detects scene transitions, decides when
//! to emit split/undo-split/start commands, and recovers from
//! misrecognitions via bounded backward/forward search and recalibration.
//!
//! A segment is a continuous span of gameplay between two split points. Game
//! time is projected from the segment anchor: the (capture-time,
//! in-game-time) pair recorded when the segment started. All times are in
//! milliseconds.

use std::time::{Duration, Instant};

use crate::frames::{FrameSource, FrameTime};
use crate::host::{CommandSink, HostCommand, HostSnapshot};
use crate::observers::ObserverRegistry;
use crate::policy::GamePolicy;
use crate::recognition::{AnalysisResult, Recognizer};

/// Minimum frame-time gap between two expensive score-screen probes.
const SCORE_CHECK_PERIOD_MS: i64 = 1000;

/// Consecutive failures after which the engine is recalibrated.
const RECALIBRATE_STREAK: u32 = 3;

/// A reading this far above the split-time value can only mean the timer is
/// still counting past the split, i.e. the next segment never starts higher.
const NEXT_SEGMENT_TIMER_CEILING_MS: i64 = 10_000;

/// Readings below this are never score-screen candidates (stage-title
/// screens produce such false positives).
const SCORE_SCREEN_MIN_TIME_MS: i64 = 1000;

/// Frames closer than this to the segment anchor with an identical reading
/// are duplicates of it.
const DUPLICATE_FRAME_GAP_MS: i64 = 50;

/// Wall-clock budget for the backward search locating the last frame before
/// a transition.
const PRE_TRANSITION_SEARCH_BUDGET: Duration = Duration::from_secs(4);

/// Wall-clock budget for the forward search locating the first frame after a
/// black transition.
const POST_TRANSITION_SEARCH_BUDGET: Duration = Duration::from_secs(8);

/// Anchor pair saved at a split so a premature split can be rolled back.
#[derive(Debug, Clone, Copy)]
struct SplitRollback {
    game_time_on_segment_start: i64,
    ingame_timer_on_segment_start: i64,
}

/// Single-writer analysis state. Mutated only while the recognition
/// gateway's lock is held, so a settings-driven engine swap can never
/// interleave mid-tick.
pub struct SegmentTimeline {
    policy: GamePolicy,

    /// Authoritative elapsed time surfaced to the host. Non-decreasing for
    /// the lifetime of a run; zeroed only by an explicit reset.
    game_time: i64,
    game_time_on_segment_start: i64,
    ingame_timer_on_segment_start: i64,

    first_frame_time_of_segment: FrameTime,
    need_to_confirm_first_frame_of_segment: bool,

    /// Last accepted (not necessarily last analyzed) result.
    previous_result: Option<AnalysisResult>,

    unsuccessful_streak: u32,
    last_failed_frame_time: FrameTime,

    /// True between emitting a split and confirming the next segment started.
    is_after_split: bool,
    ingame_timer_on_split: i64,
    frame_time_on_split: FrameTime,
    split_rollback: Option<SplitRollback>,

    last_score_screen_check_frame_time: FrameTime,
    /// Reading seen on the last score-screen sighting; -1 = no candidate.
    ingame_timer_on_last_score_check: i64,

    /// Last known-good frame immediately preceding a detected transition.
    frame_before_transition: Option<AnalysisResult>,
}

impl SegmentTimeline {
    pub fn new(policy: GamePolicy) -> Self {
        Self {
            policy,
            game_time: 0,
            game_time_on_segment_start: 0,
            ingame_timer_on_segment_start: 0,
            first_frame_time_of_segment: 0,
            need_to_confirm_first_frame_of_segment: false,
            previous_result: None,
            unsuccessful_streak: 0,
            last_failed_frame_time: 0,
            is_after_split: false,
            ingame_timer_on_split: 0,
            frame_time_on_split: 0,
            split_rollback: None,
            last_score_screen_check_frame_time: 0,
            ingame_timer_on_last_score_check: -1,
            frame_before_transition: None,
        }
    }

    /// Return to the zero state (external reset).
    pub fn reset(&mut self) {
        log::info!("timeline reset");
        *self = Self::new(self.policy.clone());
    }

    /// Replace the policy and return to the zero state (game change).
    pub fn set_policy(&mut self, policy: GamePolicy) {
        *self = Self::new(policy);
    }

    pub fn game_time(&self) -> i64 {
        self.game_time
    }

    pub fn is_after_split(&self) -> bool {
        self.is_after_split
    }

    pub fn unsuccessful_streak(&self) -> u32 {
        self.unsuccessful_streak
    }

    pub fn last_failed_frame_time(&self) -> FrameTime {
        self.last_failed_frame_time
    }

    pub fn frame_before_transition(&self) -> Option<&AnalysisResult> {
        self.frame_before_transition.as_ref()
    }

    /// One analysis tick: classify the newest buffered frame, update the
    /// reconstruction, emit host commands, prune obsolete frames.
    pub fn tick(
        &mut self,
        engine: &mut dyn Recognizer,
        frames: &FrameSource,
        commands: &dyn CommandSink,
        observers: &ObserverRegistry,
        host: HostSnapshot,
    ) {
        let frame_times = frames.frame_times();
        let Some(&newest) = frame_times.last() else {
            return;
        };

        // The score-screen probe is expensive; keep it off the hot path.
        let score_checked = newest - self.last_score_screen_check_frame_time >= SCORE_CHECK_PERIOD_MS;
        if score_checked {
            self.last_score_screen_check_frame_time = newest;
        }

        // Misrecognition is often caused by stale digit-location caching.
        if self.unsuccessful_streak >= RECALIBRATE_STREAK
            || self.previous_result.as_ref().is_some_and(|r| r.is_black_screen)
        {
            log::debug!(
                "recalibrating before analysis (streak {})",
                self.unsuccessful_streak
            );
            engine.recalibrate();
        }

        let result = engine.analyze(newest, score_checked, observers.wants_visualization());
        observers.publish(&result);

        if !result.is_successful {
            log::debug!("frame {} unrecognizable: {:?}", newest, result.error_reason);
            frames.prune_one(newest);
            self.register_failure(newest);
            return;
        }

        if !self.check_result(&result, engine, frames) {
            frames.prune_one(newest);
            self.register_failure(newest);
            return;
        }

        self.unsuccessful_streak = 0;

        if self.is_after_split {
            self.await_next_segment(&result, score_checked, engine, commands, host);
        } else if result.recognized_time.is_some() {
            self.track_recognized_time(&result, &frame_times, score_checked, engine, commands, host);
        } else if (result.is_black_screen || result.is_white_screen)
            && self
                .previous_result
                .as_ref()
                .is_some_and(|p| p.recognized_time.is_some())
        {
            self.enter_transition(&result, &frame_times, engine, commands, host);
        }

        self.previous_result = Some(result);
        frames.prune_before(newest);
    }

    fn register_failure(&mut self, frame_time: FrameTime) {
        self.unsuccessful_streak += 1;
        self.last_failed_frame_time = frame_time;
    }

    /// Plausibility rule: the timer may not go backwards (beyond the
    /// recognition margin) and may not advance faster than capture time plus
    /// one timer granule.
    fn readings_consistent(
        &self,
        prev_time: i64,
        prev_frame: FrameTime,
        new_time: i64,
        new_frame: FrameTime,
    ) -> bool {
        let elapsed = new_frame - prev_frame;
        let margin = self.policy.margin(elapsed);
        new_time >= prev_time - margin
            && new_time - prev_time <= elapsed + self.policy.timer_granularity_ms + margin
    }

    /// Validate the new result against the last accepted one. Returns false
    /// when the frame must be discarded as misrecognized.
    fn check_result(
        &mut self,
        result: &AnalysisResult,
        engine: &mut dyn Recognizer,
        frames: &FrameSource,
    ) -> bool {
        let Some(new_time) = result.recognized_time else {
            return true;
        };
        // After a split the timer restarts near zero; continuity with the
        // pre-split reading is not expected.
        if self.is_after_split {
            return true;
        }
        let Some(prev) = self.previous_result.clone() else {
            return true;
        };
        let Some(prev_time) = prev.recognized_time else {
            return true;
        };

        let prev_is_anchor = self.need_to_confirm_first_frame_of_segment
            && prev.frame_time == self.first_frame_time_of_segment;

        if self.readings_consistent(prev_time, prev.frame_time, new_time, result.frame_time) {
            if prev_is_anchor {
                self.need_to_confirm_first_frame_of_segment = false;
            }
            return true;
        }

        if prev_is_anchor {
            // The provisional anchor itself may be the misread frame.
            self.correct_first_frame_of_segment(new_time, result.frame_time, engine, frames);
            return true;
        }

        log::debug!(
            "frame {} incorrectly recognized: prev reading {} at {}, new reading {}",
            result.frame_time,
            prev_time,
            prev.frame_time,
            new_time
        );
        false
    }

    /// Walk forward from the contradicted provisional anchor looking for the
    /// first buffered frame consistent with the newly analyzed reading; that
    /// frame supersedes the anchor. Near-duplicates of the anchor are pruned
    /// without penalty.
    fn correct_first_frame_of_segment(
        &mut self,
        new_time: i64,
        new_frame: FrameTime,
        engine: &mut dyn Recognizer,
        frames: &FrameSource,
    ) {
        log::debug!(
            "correcting provisional segment anchor at frame {}",
            self.first_frame_time_of_segment
        );
        for ft in frames.frame_times() {
            if ft <= self.first_frame_time_of_segment || ft >= new_frame {
                continue;
            }
            let candidate = engine.analyze(ft, false, false);
            let Some(reading) = candidate.recognized() else {
                continue;
            };
            if ft - self.first_frame_time_of_segment < DUPLICATE_FRAME_GAP_MS
                && reading == self.ingame_timer_on_segment_start
            {
                frames.prune_one(ft);
                continue;
            }
            if self.readings_consistent(reading, ft, new_time, new_frame) {
                log::debug!("segment anchor corrected to frame {} reading {}", ft, reading);
                // The old anchor and everything up to the new one is misread.
                frames.prune_range(self.first_frame_time_of_segment, ft);
                self.ingame_timer_on_segment_start = reading;
                self.first_frame_time_of_segment = ft;
                self.need_to_confirm_first_frame_of_segment = false;
                return;
            }
        }
        // Nothing better buffered; the anchor stays, still provisional.
    }

    /// `AwaitingNextSegment`: a split was emitted; wait for the next
    /// segment's timer to restart near zero, or detect that the split was
    /// premature and undo it.
    fn await_next_segment(
        &mut self,
        result: &AnalysisResult,
        score_checked: bool,
        engine: &mut dyn Recognizer,
        commands: &dyn CommandSink,
        host: HostSnapshot,
    ) {
        let Some(reading) = result.recognized_time else {
            return;
        };

        // The timer kept counting past the split value: the score-screen
        // sighting was spurious.
        if reading > self.ingame_timer_on_split + self.policy.timer_granularity_ms
            && self.readings_consistent(
                self.ingame_timer_on_split,
                self.frame_time_on_split,
                reading,
                result.frame_time,
            )
        {
            log::info!(
                "timer continued past split value {}, undoing split",
                self.ingame_timer_on_split
            );
            commands.send(HostCommand::UndoSplit);
            if let Some(rollback) = self.split_rollback.take() {
                self.game_time_on_segment_start = rollback.game_time_on_segment_start;
                self.ingame_timer_on_segment_start = rollback.ingame_timer_on_segment_start;
            }
            self.is_after_split = false;
            let projected =
                reading - self.ingame_timer_on_segment_start + self.game_time_on_segment_start;
            self.push_game_time(projected, commands, host);
            return;
        }

        let ceiling = self.ingame_timer_on_split.min(NEXT_SEGMENT_TIMER_CEILING_MS);
        if reading >= ceiling {
            return;
        }

        // A residual score screen can show a low reading; require the probe
        // to clear it before trusting the restart.
        let residual_score_screen = if score_checked {
            result.is_score_screen
        } else {
            engine.analyze(result.frame_time, true, false).is_score_screen
        };
        if residual_score_screen {
            return;
        }

        log::info!(
            "next segment started at frame {} with reading {}",
            result.frame_time,
            reading
        );
        self.is_after_split = false;
        self.split_rollback = None;
        self.first_frame_time_of_segment = result.frame_time;
        self.need_to_confirm_first_frame_of_segment = true;
        let projected =
            reading - self.ingame_timer_on_segment_start + self.game_time_on_segment_start;
        self.push_game_time(projected, commands, host);
    }

    /// `Timing` with digits recognized: reconcile a just-ended transition if
    /// there was one, evaluate the score-screen split rule, push the
    /// reconstructed time.
    fn track_recognized_time(
        &mut self,
        result: &AnalysisResult,
        frame_times: &[FrameTime],
        score_checked: bool,
        engine: &mut dyn Recognizer,
        commands: &dyn CommandSink,
        host: HostSnapshot,
    ) {
        let Some(reading) = result.recognized_time else {
            return;
        };

        if let Some(prev) = self.previous_result.clone() {
            if prev.is_white_screen {
                self.reconcile_white_transition(result.frame_time);
            } else if prev.is_black_screen {
                self.anchor_after_black_transition(reading, result.frame_time, frame_times, engine);
            }
        }

        if score_checked {
            if result.is_score_screen && reading >= SCORE_SCREEN_MIN_TIME_MS {
                if self.ingame_timer_on_last_score_check == reading {
                    log::info!("score screen confirmed at reading {}, splitting", reading);
                    let projected =
                        reading - self.ingame_timer_on_segment_start + self.game_time_on_segment_start;
                    self.push_game_time(projected, commands, host);
                    self.emit_split(reading, result.frame_time, commands);
                    return;
                }
                log::debug!("score screen candidate at reading {}", reading);
                self.ingame_timer_on_last_score_check = reading;
                // Recalibrate so the confirming reading is maximally accurate.
                engine.recalibrate();
            } else {
                self.ingame_timer_on_last_score_check = -1;
            }
        }

        let projected =
            reading - self.ingame_timer_on_segment_start + self.game_time_on_segment_start;
        self.push_game_time(projected, commands, host);
    }

    /// A white (special stage / time travel) transition just ended. The
    /// on-screen timer carries its frozen value across it, except for a small
    /// regression on game variants that exhibit one, so re-derive the anchor
    /// from the frozen segment time instead of trusting a stale capture.
    fn reconcile_white_transition(&mut self, frame_time: FrameTime) {
        let frozen =
            self.game_time - self.game_time_on_segment_start + self.ingame_timer_on_segment_start;
        let expected = frozen + self.policy.white_transition_offset_ms;
        log::debug!("white transition ended: expecting on-screen reading {}", expected);
        self.game_time_on_segment_start = self.game_time;
        self.ingame_timer_on_segment_start = expected;
        self.first_frame_time_of_segment = frame_time;
        self.need_to_confirm_first_frame_of_segment = false;
    }

    /// A black transition just ended. The first recognized frame may not be
    /// the first frame of the new segment, so search forward from the
    /// transition for the earliest buffered frame whose reading is consistent
    /// with the current one and anchor the segment there.
    fn anchor_after_black_transition(
        &mut self,
        new_reading: i64,
        new_frame: FrameTime,
        frame_times: &[FrameTime],
        engine: &mut dyn Recognizer,
    ) {
        let from = self
            .previous_result
            .as_ref()
            .map(|p| p.frame_time)
            .unwrap_or(new_frame);
        let deadline = Instant::now() + POST_TRANSITION_SEARCH_BUDGET;
        let mut anchor: Option<(FrameTime, i64)> = None;

        for &ft in frame_times {
            if ft <= from || ft >= new_frame {
                continue;
            }
            if Instant::now() >= deadline {
                log::warn!("post-transition search budget exceeded, using newest frame");
                break;
            }
            let candidate = engine.analyze(ft, false, false);
            let Some(reading) = candidate.recognized() else {
                continue;
            };
            if self.readings_consistent(reading, ft, new_reading, new_frame) {
                anchor = Some((ft, reading));
                break;
            }
        }

        let (anchor_frame, anchor_reading) = anchor.unwrap_or((new_frame, new_reading));
        log::debug!(
            "black transition ended: segment anchored at frame {} reading {}",
            anchor_frame,
            anchor_reading
        );
        self.game_time_on_segment_start = self.game_time;
        self.ingame_timer_on_segment_start = anchor_reading;
        self.first_frame_time_of_segment = anchor_frame;
        // Anchors found by search were corroborated by the current frame.
        self.need_to_confirm_first_frame_of_segment = anchor_frame == new_frame;
    }

    /// First frame of a transition (black or white) after recognized
    /// gameplay: locate the true boundary frame, freeze the segment's final
    /// time, and decide whether the transition completes a segment.
    fn enter_transition(
        &mut self,
        result: &AnalysisResult,
        frame_times: &[FrameTime],
        engine: &mut dyn Recognizer,
        commands: &dyn CommandSink,
        host: HostSnapshot,
    ) {
        let Some(prev) = self.previous_result.clone() else {
            return;
        };
        let Some(prev_reading) = prev.recognized_time else {
            return;
        };

        let deadline = Instant::now() + PRE_TRANSITION_SEARCH_BUDGET;
        let mut boundary_frame = prev.frame_time;
        let mut boundary_reading = prev_reading;
        let mut boundary_result = prev.clone();

        // Backward from the transitioning frame: the last frame with a
        // reading consistent with the previous accepted one is the boundary.
        for &ft in frame_times.iter().rev() {
            if ft >= result.frame_time || ft <= prev.frame_time {
                continue;
            }
            if Instant::now() >= deadline {
                log::warn!("pre-transition search budget exceeded, using last accepted frame");
                break;
            }
            let candidate = engine.analyze(ft, false, false);
            let Some(reading) = candidate.recognized() else {
                continue;
            };
            if self.readings_consistent(prev_reading, prev.frame_time, reading, ft) {
                boundary_frame = ft;
                boundary_reading = reading;
                boundary_result = candidate;
                break;
            }
        }

        let final_time =
            boundary_reading - self.ingame_timer_on_segment_start + self.game_time_on_segment_start;
        self.push_game_time(final_time, commands, host);
        // Freeze: the transition itself contributes no game time.
        self.game_time_on_segment_start = self.game_time;
        self.ingame_timer_on_segment_start = boundary_reading;
        self.frame_before_transition = Some(boundary_result);
        log::debug!(
            "transition started at frame {}; segment frozen at {}",
            result.frame_time,
            self.game_time
        );

        // On the final segment any transition ends the run (a death there
        // must be undone manually). A few stages end in a plain fade-out
        // with no score screen; those come from the per-game policy table.
        let forced_split = result.is_black_screen
            && host.current_split_index >= 0
            && self
                .policy
                .split_on_black_segments
                .contains(&(host.current_split_index as usize));

        if host.on_last_segment() || forced_split {
            self.emit_split(boundary_reading, boundary_frame, commands);
        }
    }

    fn emit_split(&mut self, reading: i64, frame_time: FrameTime, commands: &dyn CommandSink) {
        commands.send(HostCommand::Split);
        self.split_rollback = Some(SplitRollback {
            game_time_on_segment_start: self.game_time_on_segment_start,
            ingame_timer_on_segment_start: self.ingame_timer_on_segment_start,
        });
        self.game_time_on_segment_start = self.game_time;
        self.ingame_timer_on_segment_start = 0;
        self.ingame_timer_on_split = reading;
        self.frame_time_on_split = frame_time;
        self.is_after_split = true;
        self.ingame_timer_on_last_score_check = -1;
    }

    fn push_game_time(&mut self, time_ms: i64, commands: &dyn CommandSink, host: HostSnapshot) {
        // Game time never decreases within a run.
        self.game_time = self.game_time.max(time_ms);
        if host.current_split_index < 0 {
            commands.send(HostCommand::Start);
        }
        commands.send(HostCommand::SetGameTime(self.game_time));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{FrameStore, MemoryFrameStore};
    use crate::policy::PolicyTable;
    use crate::recognition::ErrorReason;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Analyze { frame_time: FrameTime, score: bool },
        Recalibrate,
    }

    struct ScriptedRecognizer {
        results: HashMap<FrameTime, AnalysisResult>,
        calls: Vec<Call>,
    }

    impl ScriptedRecognizer {
        fn new() -> Self {
            Self {
                results: HashMap::new(),
                calls: Vec::new(),
            }
        }

        fn time(mut self, frame_time: FrameTime, ms: i64) -> Self {
            self.results
                .insert(frame_time, AnalysisResult::with_time(frame_time, ms));
            self
        }

        fn score(mut self, frame_time: FrameTime, ms: i64) -> Self {
            let mut result = AnalysisResult::with_time(frame_time, ms);
            result.is_score_screen = true;
            self.results.insert(frame_time, result);
            self
        }

        fn black(mut self, frame_time: FrameTime) -> Self {
            self.results
                .insert(frame_time, AnalysisResult::transition(frame_time, false));
            self
        }

        fn white(mut self, frame_time: FrameTime) -> Self {
            self.results
                .insert(frame_time, AnalysisResult::transition(frame_time, true));
            self
        }
    }

    impl Recognizer for ScriptedRecognizer {
        fn analyze(
            &mut self,
            frame_time: FrameTime,
            check_for_score_screen: bool,
            _visualize: bool,
        ) -> AnalysisResult {
            self.calls.push(Call::Analyze {
                frame_time,
                score: check_for_score_screen,
            });
            let mut result = self
                .results
                .get(&frame_time)
                .cloned()
                .unwrap_or_else(|| {
                    AnalysisResult::unsuccessful(frame_time, ErrorReason::VideoDisconnected)
                });
            // The engine only reports a score screen when asked to look.
            result.is_score_screen = result.is_score_screen && check_for_score_screen;
            result
        }

        fn recalibrate(&mut self) {
            self.calls.push(Call::Recalibrate);
        }

        fn check_for_reset_screen(&mut self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordedCommands(Mutex<Vec<HostCommand>>);

    impl RecordedCommands {
        fn take(&self) -> Vec<HostCommand> {
            std::mem::take(&mut *self.0.lock())
        }
        fn all(&self) -> Vec<HostCommand> {
            self.0.lock().clone()
        }
    }

    impl CommandSink for RecordedCommands {
        fn send(&self, command: HostCommand) {
            self.0.lock().push(command);
        }
    }

    struct Fixture {
        timeline: SegmentTimeline,
        engine: ScriptedRecognizer,
        store: Arc<MemoryFrameStore>,
        frames: FrameSource,
        commands: RecordedCommands,
        observers: ObserverRegistry,
        host: HostSnapshot,
    }

    impl Fixture {
        fn new(game_id: &str, engine: ScriptedRecognizer) -> Self {
            let policy = PolicyTable::with_builtin().get(game_id).unwrap().clone();
            let store = Arc::new(MemoryFrameStore::new(64));
            store.start_capturing();
            Self {
                timeline: SegmentTimeline::new(policy),
                engine,
                frames: FrameSource::new(store.clone()),
                store,
                commands: RecordedCommands::default(),
                observers: ObserverRegistry::new(),
                host: HostSnapshot {
                    current_split_index: 0,
                    segment_count: 10,
                },
            }
        }

        fn tick_at(&mut self, frame_times: &[FrameTime]) {
            for &ft in frame_times {
                self.store.push(ft);
            }
            self.timeline.tick(
                &mut self.engine,
                &self.frames,
                &self.commands,
                &self.observers,
                self.host,
            );
        }
    }

    #[test]
    fn test_scenario_a_consistent_reading_accepted() {
        let engine = ScriptedRecognizer::new().time(1000, 500).time(1500, 1000);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        assert_eq!(fx.timeline.game_time(), 500);

        fx.tick_at(&[1500]);
        assert_eq!(fx.timeline.game_time(), 1000);
        assert!(fx.commands.all().contains(&HostCommand::SetGameTime(1000)));
    }

    #[test]
    fn test_scenario_b_decreasing_reading_rejected() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .time(2000, 400);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);
        fx.commands.take();

        fx.tick_at(&[2000]);
        assert_eq!(fx.timeline.game_time(), 1000);
        assert_eq!(fx.timeline.unsuccessful_streak(), 1);
        // The inconsistent frame was deleted so it is never re-analyzed.
        assert!(!fx.store.frame_times().contains(&2000));
        assert!(fx.commands.take().is_empty());
    }

    #[test]
    fn test_scenario_c_streak_forces_recalibration() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .time(2000, 400)
            .time(2600, 350)
            .time(3200, 300)
            .time(3800, 1600);
        let mut fx = Fixture::new("sonic-1", engine);

        for ft in [1000, 1500, 2000, 2600, 3200] {
            fx.tick_at(&[ft]);
        }
        assert_eq!(fx.timeline.unsuccessful_streak(), 3);

        fx.tick_at(&[3800]);
        assert_eq!(fx.timeline.unsuccessful_streak(), 0);

        // Recalibration happened immediately before the last analysis.
        let last_two = &fx.engine.calls[fx.engine.calls.len() - 2..];
        assert_eq!(last_two[0], Call::Recalibrate);
        assert_eq!(
            last_two[1],
            Call::Analyze {
                frame_time: 3800,
                score: false
            }
        );
    }

    #[test]
    fn test_scenario_d_black_transition_anchors_to_searched_frame() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .black(2000)
            .time(2500, 100)
            .time(3000, 1200);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);
        fx.tick_at(&[2000]);
        // The segment's final time was frozen at the boundary reading.
        assert_eq!(fx.timeline.game_time(), 1000);
        assert!(!fx.timeline.is_after_split());

        // Both post-transition frames are buffered; only 3000 is newest.
        fx.tick_at(&[2500, 3000]);
        // Anchored to the searched frame (reading 100), not the raw new one.
        assert_eq!(fx.timeline.game_time(), 1000 + (1200 - 100));
        assert!(!fx.timeline.need_to_confirm_first_frame_of_segment);
        assert_eq!(fx.timeline.first_frame_time_of_segment, 2500);
    }

    #[test]
    fn test_scenario_e_score_screen_debounce() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .score(5000, 5000)
            .score(6200, 5000);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);

        // First sighting: candidate only, recalibration, no split.
        fx.tick_at(&[5000]);
        assert!(!fx.timeline.is_after_split());
        assert!(!fx.commands.all().contains(&HostCommand::Split));
        assert_eq!(*fx.engine.calls.last().unwrap(), Call::Recalibrate);

        // Second matching sighting >= 1 s later: exactly one split.
        fx.tick_at(&[6200]);
        let splits = fx
            .commands
            .all()
            .iter()
            .filter(|&&c| c == HostCommand::Split)
            .count();
        assert_eq!(splits, 1);
        assert!(fx.timeline.is_after_split());
        assert_eq!(fx.timeline.ingame_timer_on_split, 5000);
        assert_eq!(fx.timeline.game_time(), 5000);
    }

    #[test]
    fn test_low_readings_never_score_candidates() {
        let engine = ScriptedRecognizer::new().score(1000, 500).score(2500, 500);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        fx.tick_at(&[2500]);
        assert!(!fx.commands.all().contains(&HostCommand::Split));
        assert!(!fx.timeline.is_after_split());
    }

    #[test]
    fn test_next_segment_confirmed_after_split() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .score(5000, 5000)
            .score(6200, 5000)
            .time(8000, 300);
        let mut fx = Fixture::new("sonic-1", engine);

        for ft in [1000, 1500, 5000, 6200] {
            fx.tick_at(&[ft]);
        }
        assert!(fx.timeline.is_after_split());
        fx.commands.take();

        fx.tick_at(&[8000]);
        assert!(!fx.timeline.is_after_split());
        // 300 ms of the new segment had already elapsed at first sighting.
        assert_eq!(fx.timeline.game_time(), 5300);
        assert!(fx.commands.all().contains(&HostCommand::SetGameTime(5300)));
    }

    #[test]
    fn test_residual_score_screen_does_not_start_segment() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .score(5000, 5000)
            .score(6200, 5000)
            .score(8000, 400);
        let mut fx = Fixture::new("sonic-1", engine);

        for ft in [1000, 1500, 5000, 6200] {
            fx.tick_at(&[ft]);
        }
        fx.tick_at(&[8000]);
        assert!(fx.timeline.is_after_split());
    }

    #[test]
    fn test_premature_split_is_undone() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .score(5000, 5000)
            .score(6200, 5000)
            .time(8000, 6800);
        let mut fx = Fixture::new("sonic-1", engine);

        for ft in [1000, 1500, 5000, 6200] {
            fx.tick_at(&[ft]);
        }
        assert!(fx.timeline.is_after_split());

        // The timer kept counting: the stage never ended.
        fx.tick_at(&[8000]);
        assert!(fx.commands.all().contains(&HostCommand::UndoSplit));
        assert!(!fx.timeline.is_after_split());
        // Pre-split anchors restored: 6800 projects through the original segment.
        assert_eq!(fx.timeline.game_time(), 6800);
    }

    #[test]
    fn test_white_transition_rederives_reading() {
        // Sonic CD: centisecond timer, -330 ms time-travel regression.
        let engine = ScriptedRecognizer::new()
            .time(1000, 10_000)
            .white(1500)
            .time(2000, 9670)
            .time(2500, 9800);
        let mut fx = Fixture::new("sonic-cd", engine);

        fx.tick_at(&[1000]);
        assert_eq!(fx.timeline.game_time(), 10_000);

        fx.tick_at(&[1500]);
        fx.tick_at(&[2000]);
        // The regressed reading projects back onto the frozen segment time.
        assert_eq!(fx.timeline.game_time(), 10_000);

        fx.tick_at(&[2500]);
        assert_eq!(fx.timeline.game_time(), 10_130);
    }

    #[test]
    fn test_black_transition_on_last_segment_splits() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .black(2000);
        let mut fx = Fixture::new("sonic-1", engine);
        fx.host = HostSnapshot {
            current_split_index: 9,
            segment_count: 10,
        };

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);
        fx.tick_at(&[2000]);
        assert!(fx.commands.all().contains(&HostCommand::Split));
        assert!(fx.timeline.is_after_split());
    }

    #[test]
    fn test_black_transition_split_policy_table() {
        // Segment 17 is in sonic-1's split-on-black table.
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .black(2000);
        let mut fx = Fixture::new("sonic-1", engine);
        fx.host = HostSnapshot {
            current_split_index: 17,
            segment_count: 19,
        };

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);
        fx.tick_at(&[2000]);
        assert!(fx.commands.all().contains(&HostCommand::Split));
    }

    #[test]
    fn test_ordinary_black_transition_does_not_split() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .black(2000);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);
        fx.tick_at(&[2000]);
        assert!(!fx.commands.all().contains(&HostCommand::Split));
        assert!(!fx.timeline.is_after_split());
    }

    #[test]
    fn test_provisional_anchor_corrected() {
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .black(2000)
            .time(3000, 9000) // misread anchor
            .time(3020, 9000) // near-duplicate of it
            .time(3400, 200)
            .time(4000, 800);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);
        fx.tick_at(&[2000]);
        fx.tick_at(&[3000]);
        // Fallback anchor at the newest frame stays provisional.
        assert!(fx.timeline.need_to_confirm_first_frame_of_segment);
        assert_eq!(fx.timeline.game_time(), 1000);

        fx.tick_at(&[3020, 3400, 4000]);
        // Near-duplicate pruned without penalty, anchor moved to 3400.
        assert!(!fx.store.frame_times().contains(&3020));
        assert_eq!(fx.timeline.first_frame_time_of_segment, 3400);
        assert!(!fx.timeline.need_to_confirm_first_frame_of_segment);
        assert_eq!(fx.timeline.game_time(), 1000 + (800 - 200));
        assert_eq!(fx.timeline.unsuccessful_streak(), 0);
    }

    #[test]
    fn test_game_time_is_monotonic() {
        // A small decrease passes the consistency margin but must not lower
        // the pushed game time.
        let engine = ScriptedRecognizer::new()
            .time(1000, 500)
            .time(1500, 1000)
            .time(2000, 950);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);
        fx.commands.take();

        fx.tick_at(&[2000]);
        assert_eq!(fx.timeline.game_time(), 1000);
        assert!(fx.commands.all().contains(&HostCommand::SetGameTime(1000)));
    }

    #[test]
    fn test_unsuccessful_frame_deleted() {
        let engine = ScriptedRecognizer::new();
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        assert_eq!(fx.timeline.unsuccessful_streak(), 1);
        assert!(fx.store.frame_times().is_empty());
        assert!(fx.commands.all().is_empty());
    }

    #[test]
    fn test_older_frames_pruned_after_tick() {
        let engine = ScriptedRecognizer::new().time(3000, 500);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000, 2000, 3000]);
        assert_eq!(fx.store.frame_times(), vec![3000]);
    }

    #[test]
    fn test_score_probe_rate_limited() {
        let engine = ScriptedRecognizer::new().time(1000, 500).time(1500, 1000);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);

        assert_eq!(
            fx.engine.calls,
            vec![
                Call::Analyze {
                    frame_time: 1000,
                    score: true
                },
                Call::Analyze {
                    frame_time: 1500,
                    score: false
                },
            ]
        );
    }

    #[test]
    fn test_start_emitted_until_run_starts() {
        let engine = ScriptedRecognizer::new().time(1000, 500).time(1500, 1000);
        let mut fx = Fixture::new("sonic-1", engine);
        fx.host = HostSnapshot {
            current_split_index: -1,
            segment_count: 10,
        };

        fx.tick_at(&[1000]);
        assert_eq!(
            fx.commands.take(),
            vec![HostCommand::Start, HostCommand::SetGameTime(500)]
        );

        fx.host.current_split_index = 0;
        fx.tick_at(&[1500]);
        assert_eq!(fx.commands.take(), vec![HostCommand::SetGameTime(1000)]);
    }

    #[test]
    fn test_reset_returns_to_zero_state() {
        let engine = ScriptedRecognizer::new().time(1000, 500).time(1500, 1000);
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[1000]);
        fx.tick_at(&[1500]);
        assert_eq!(fx.timeline.game_time(), 1000);

        fx.timeline.reset();
        assert_eq!(fx.timeline.game_time(), 0);
        assert!(!fx.timeline.is_after_split());
        assert_eq!(fx.timeline.unsuccessful_streak(), 0);
        assert!(fx.timeline.previous_result.is_none());
    }

    #[test]
    fn test_empty_store_is_a_noop() {
        let engine = ScriptedRecognizer::new();
        let mut fx = Fixture::new("sonic-1", engine);

        fx.tick_at(&[]);
        assert!(fx.engine.calls.is_empty());
        assert!(fx.commands.all().is_empty());
    }

    #[test]
    fn test_results_published_to_observers() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct Counting(Arc<AtomicU32>);
        impl crate::observers::ResultObserver for Counting {
            fn on_frame_analyzed(&self, _: &AnalysisResult) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst);
                true
            }
        }

        let engine = ScriptedRecognizer::new().time(1000, 500);
        let mut fx = Fixture::new("sonic-1", engine);
        let seen = Arc::new(AtomicU32::new(0));
        fx.observers.subscribe(Box::new(Counting(seen.clone())));

        fx.tick_at(&[1000]);
        // Unrecognizable frames are published too.
        fx.tick_at(&[2500]);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
