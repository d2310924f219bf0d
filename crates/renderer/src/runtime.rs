use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crtconfig::{SettingsStore, SettingsSubscription, Snapshot};
use winit::dpi::PhysicalSize;

use crate::engine::FrameRenderer;
use crate::sampler::{FrameSampler, VideoFrameSource};
use crate::types::{RenderFailure, RenderOutcome, RenderParameters, SkipReason};

/// One scheduling slot handed out by a [`TickSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub index: u64,
    pub at: Instant,
}

/// Where render ticks come from: a display refresh callback, a timer, or a test.
pub trait TickSource {
    /// Blocks until the next tick is due.
    fn wait_for_tick(&mut self) -> Tick;
}

/// Ticks at a fixed interval. A late tick moves the schedule forward instead
/// of bursting to catch up.
#[derive(Debug, Clone)]
pub struct FixedRateTicker {
    interval: Duration,
    next: Option<Instant>,
    index: u64,
}

impl FixedRateTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            next: None,
            index: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the next tick is due; `None` before the first one.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next
    }

    /// Non-blocking variant for hosts that own their own wait loop.
    pub fn poll_tick(&mut self, now: Instant) -> Option<Tick> {
        match self.next {
            Some(deadline) if now < deadline => None,
            Some(deadline) => {
                let mut next = deadline + self.interval;
                if next <= now {
                    next = now + self.interval;
                }
                Some(self.issue(now, next))
            }
            None => Some(self.issue(now, now + self.interval)),
        }
    }

    fn issue(&mut self, now: Instant, next: Instant) -> Tick {
        let tick = Tick {
            index: self.index,
            at: now,
        };
        self.index += 1;
        self.next = Some(next);
        tick
    }
}

impl TickSource for FixedRateTicker {
    fn wait_for_tick(&mut self) -> Tick {
        loop {
            let now = Instant::now();
            if let Some(tick) = self.poll_tick(now) {
                return tick;
            }
            if let Some(deadline) = self.next {
                thread::sleep(deadline.saturating_duration_since(now));
            }
        }
    }
}

/// Ticks immediately every time it is asked.
#[derive(Debug, Clone, Default)]
pub struct ManualTicker {
    index: u64,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> u64 {
        self.index
    }
}

impl TickSource for ManualTicker {
    fn wait_for_tick(&mut self) -> Tick {
        let tick = Tick {
            index: self.index,
            at: Instant::now(),
        };
        self.index += 1;
        tick
    }
}

/// Displayed size of the drawing surface, shared between the host's resize
/// handler and the render loop.
///
/// Updates may land in the middle of a tick; the engine picks the new size up
/// on its next render.
#[derive(Debug, Clone)]
pub struct DisplaySize {
    inner: Arc<RwLock<PhysicalSize<u32>>>,
}

impl DisplaySize {
    pub fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(size)),
        }
    }

    pub fn get(&self) -> PhysicalSize<u32> {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, size: PhysicalSize<u32>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = size;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// The overlay is switched off; nothing was drawn.
    Disabled,
    Rendered(RenderOutcome),
    /// The tick failed and was contained.
    Failed(RenderFailure),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub drawn: u64,
    pub skipped: u64,
    pub disabled: u64,
    /// Transparent frames presented after the overlay was switched off.
    pub cleared: u64,
    pub failed: u64,
}

/// Drives sampler and renderer once per tick using the newest published
/// settings snapshot.
pub struct RenderLoop<S, R> {
    subscription: SettingsSubscription,
    settings: Snapshot,
    source: S,
    sampler: FrameSampler,
    renderer: R,
    display: DisplaySize,
    state: LoopState,
    stats: LoopStats,
    /// A drawn frame may still be on screen.
    showing_frame: bool,
}

impl<S, R> RenderLoop<S, R>
where
    S: VideoFrameSource,
    R: FrameRenderer,
{
    pub fn new(store: &SettingsStore, source: S, renderer: R, display: DisplaySize) -> Self {
        let subscription = store.subscribe();
        Self {
            subscription,
            settings: store.values(),
            source,
            sampler: FrameSampler::new(),
            renderer,
            display,
            state: LoopState::Idle,
            stats: LoopStats::default(),
            showing_frame: false,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn settings(&self) -> &Snapshot {
        &self.settings
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn display(&self) -> &DisplaySize {
        &self.display
    }

    /// Runs one tick. Never panics and never returns an error: failures are
    /// logged and reported in the outcome.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state == LoopState::Idle {
            tracing::info!("render loop running");
            self.state = LoopState::Running;
        }
        self.stats.ticks += 1;
        self.refresh_settings();

        if !self.settings.enabled {
            self.stats.disabled += 1;
            if self.showing_frame {
                self.clear_surface();
            }
            return TickOutcome::Disabled;
        }

        let params = RenderParameters::from_settings(&self.settings, self.display.get());
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            draw_frame(
                &self.sampler,
                &mut self.source,
                &mut self.renderer,
                &params,
            )
        }));
        let failure = match result {
            Ok(Ok(outcome)) => {
                match outcome {
                    RenderOutcome::Drawn => {
                        self.stats.drawn += 1;
                        self.showing_frame = true;
                    }
                    RenderOutcome::Skipped(_) => self.stats.skipped += 1,
                }
                return TickOutcome::Rendered(outcome);
            }
            Ok(Err(failure)) => failure,
            Err(payload) => RenderFailure::Panicked(panic_message(payload.as_ref())),
        };
        self.stats.failed += 1;
        tracing::warn!(error = %failure, tick = self.stats.ticks, "render tick failed; continuing");
        TickOutcome::Failed(failure)
    }

    /// Ticks `count` times from `ticker`.
    pub fn run_ticks<T: TickSource + ?Sized>(&mut self, ticker: &mut T, count: u64) -> LoopStats {
        for _ in 0..count {
            ticker.wait_for_tick();
            self.tick();
        }
        self.stats
    }

    /// Ticks for as long as the process lives.
    pub fn run_with<T: TickSource + ?Sized>(&mut self, ticker: &mut T) -> ! {
        loop {
            ticker.wait_for_tick();
            self.tick();
        }
    }

    /// Takes the last frame off screen. Retried on later disabled ticks
    /// until it succeeds.
    fn clear_surface(&mut self) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.renderer.clear()));
        let failure = match result {
            Ok(Ok(())) => {
                tracing::debug!("overlay disabled; cleared the surface");
                self.stats.cleared += 1;
                self.showing_frame = false;
                return;
            }
            Ok(Err(failure)) => failure,
            Err(payload) => RenderFailure::Panicked(panic_message(payload.as_ref())),
        };
        tracing::warn!(error = %failure, "failed to clear the overlay; retrying next tick");
    }

    fn refresh_settings(&mut self) {
        if let Some(event) = self.subscription.latest() {
            tracing::debug!(generation = event.generation, "render loop picked up new settings");
            self.settings = event.snapshot;
        }
    }
}

fn draw_frame<S, R>(
    sampler: &FrameSampler,
    source: &mut S,
    renderer: &mut R,
    params: &RenderParameters,
) -> Result<RenderOutcome, RenderFailure>
where
    S: VideoFrameSource + ?Sized,
    R: FrameRenderer + ?Sized,
{
    match sampler.sample(source, params.viewport, params.pixel_scale) {
        Ok(frame) => renderer.render(Some(&frame), params),
        Err(err) => {
            tracing::debug!(error = %err, "skipping frame");
            renderer.render(None, params)?;
            Ok(RenderOutcome::Skipped(SkipReason::SourceUnavailable))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crtconfig::{MemoryStore, PixelScale, SettingValue};
    use image::RgbaImage;

    use crate::sampler::{FrameBuffer, TestPattern};

    #[derive(Default)]
    struct Recording {
        calls: Vec<Option<(u32, u32)>>,
        clears: usize,
    }

    impl FrameRenderer for Recording {
        fn render(
            &mut self,
            frame: Option<&FrameBuffer>,
            _params: &RenderParameters,
        ) -> Result<RenderOutcome, RenderFailure> {
            self.calls.push(frame.map(|f| (f.width(), f.height())));
            Ok(RenderOutcome::Drawn)
        }

        fn clear(&mut self) -> Result<(), RenderFailure> {
            self.clears += 1;
            Ok(())
        }
    }

    struct Exploding;

    impl FrameRenderer for Exploding {
        fn render(
            &mut self,
            _frame: Option<&FrameBuffer>,
            _params: &RenderParameters,
        ) -> Result<RenderOutcome, RenderFailure> {
            panic!("driver crashed");
        }

        fn clear(&mut self) -> Result<(), RenderFailure> {
            Ok(())
        }
    }

    fn store() -> SettingsStore {
        SettingsStore::open_blocking(MemoryStore::new()).unwrap()
    }

    #[test]
    fn first_tick_moves_idle_to_running() {
        let store = store();
        let recording = Recording::default();
        let mut render_loop = RenderLoop::new(
            &store,
            TestPattern::new(64, 32),
            recording,
            DisplaySize::new(PhysicalSize::new(300, 150)),
        );
        assert_eq!(render_loop.state(), LoopState::Idle);
        assert!(matches!(
            render_loop.tick(),
            TickOutcome::Rendered(RenderOutcome::Drawn)
        ));
        assert_eq!(render_loop.state(), LoopState::Running);
        assert_eq!(render_loop.renderer().calls, vec![Some((100, 50))]);
    }

    #[test]
    fn disabled_settings_gate_drawing_but_not_ticking() {
        let store = store();
        store.set_value(SettingValue::Enabled(false)).wait().unwrap();
        let mut render_loop = RenderLoop::new(
            &store,
            TestPattern::new(8, 8),
            Recording::default(),
            DisplaySize::new(PhysicalSize::new(90, 90)),
        );
        let stats = render_loop.run_ticks(&mut ManualTicker::new(), 5);
        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.disabled, 5);
        assert!(render_loop.renderer().calls.is_empty());

        store.set_value(SettingValue::Enabled(true)).wait().unwrap();
        assert!(matches!(render_loop.tick(), TickOutcome::Rendered(_)));
        assert_eq!(render_loop.renderer().calls.len(), 1);
    }

    #[test]
    fn switching_off_clears_the_surface_once() {
        let store = store();
        let mut render_loop = RenderLoop::new(
            &store,
            TestPattern::new(8, 8),
            Recording::default(),
            DisplaySize::new(PhysicalSize::new(90, 90)),
        );
        render_loop.run_ticks(&mut ManualTicker::new(), 2);
        assert_eq!(render_loop.renderer().calls.len(), 2);
        assert_eq!(render_loop.renderer().clears, 0);

        store.set_value(SettingValue::Enabled(false)).wait().unwrap();
        let stats = render_loop.run_ticks(&mut ManualTicker::new(), 4);
        assert_eq!(stats.disabled, 4);
        assert_eq!(stats.cleared, 1);
        assert_eq!(render_loop.renderer().clears, 1);
        assert_eq!(render_loop.renderer().calls.len(), 2);

        store.set_value(SettingValue::Enabled(true)).wait().unwrap();
        render_loop.tick();
        store.set_value(SettingValue::Enabled(false)).wait().unwrap();
        render_loop.tick();
        assert_eq!(render_loop.renderer().clears, 2);
        assert_eq!(render_loop.renderer().calls.len(), 3);
    }

    #[test]
    fn starting_disabled_never_clears() {
        let store = store();
        store.set_value(SettingValue::Enabled(false)).wait().unwrap();
        let mut render_loop = RenderLoop::new(
            &store,
            TestPattern::new(8, 8),
            Recording::default(),
            DisplaySize::new(PhysicalSize::new(90, 90)),
        );
        render_loop.run_ticks(&mut ManualTicker::new(), 3);
        assert_eq!(render_loop.renderer().clears, 0);
        assert_eq!(render_loop.stats().cleared, 0);
    }

    #[test]
    fn settings_changes_reach_the_next_tick() {
        let store = store();
        let mut render_loop = RenderLoop::new(
            &store,
            TestPattern::new(8, 8),
            Recording::default(),
            DisplaySize::new(PhysicalSize::new(300, 150)),
        );
        render_loop.tick();
        store
            .set_value(SettingValue::PixelSize(PixelScale::new(2).unwrap()))
            .wait()
            .unwrap();
        render_loop.tick();
        assert_eq!(render_loop.settings().pixel_size.get(), 2);
        assert_eq!(
            render_loop.renderer().calls,
            vec![Some((100, 50)), Some((50, 25))]
        );
    }

    #[test]
    fn sampler_failure_skips_the_frame() {
        let store = store();
        let mut render_loop = RenderLoop::new(
            &store,
            RgbaImage::new(8, 8),
            Recording::default(),
            DisplaySize::new(PhysicalSize::new(1, 1)),
        );
        assert!(matches!(
            render_loop.tick(),
            TickOutcome::Rendered(RenderOutcome::Skipped(SkipReason::SourceUnavailable))
        ));
        assert_eq!(render_loop.renderer().calls, vec![None]);
    }

    #[test]
    fn panics_are_contained_and_the_loop_continues() {
        let store = store();
        let mut render_loop = RenderLoop::new(
            &store,
            TestPattern::new(8, 8),
            Exploding,
            DisplaySize::new(PhysicalSize::new(30, 30)),
        );
        for _ in 0..3 {
            match render_loop.tick() {
                TickOutcome::Failed(RenderFailure::Panicked(message)) => {
                    assert_eq!(message, "driver crashed")
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(render_loop.stats().failed, 3);
        assert_eq!(render_loop.state(), LoopState::Running);
    }

    #[test]
    fn display_resizes_are_observed() {
        let store = store();
        let display = DisplaySize::new(PhysicalSize::new(300, 150));
        let mut render_loop = RenderLoop::new(
            &store,
            TestPattern::new(8, 8),
            Recording::default(),
            display.clone(),
        );
        render_loop.tick();
        display.set(PhysicalSize::new(600, 300));
        render_loop.tick();
        assert_eq!(
            render_loop.renderer().calls,
            vec![Some((100, 50)), Some((200, 100))]
        );
    }

    #[test]
    fn fixed_rate_ticker_does_not_burst_after_a_stall() {
        let mut ticker = FixedRateTicker::new(Duration::from_millis(10));
        let start = Instant::now();
        assert_eq!(ticker.poll_tick(start).map(|tick| tick.index), Some(0));
        assert!(ticker.poll_tick(start + Duration::from_millis(5)).is_none());

        let late = start + Duration::from_millis(55);
        assert_eq!(ticker.poll_tick(late).map(|tick| tick.index), Some(1));
        assert_eq!(ticker.next_deadline(), Some(late + Duration::from_millis(10)));
        assert!(ticker.poll_tick(late + Duration::from_millis(1)).is_none());
    }

    #[test]
    fn fixed_rate_ticker_waits_roughly_one_interval() {
        let mut ticker = FixedRateTicker::new(Duration::from_millis(5));
        let first = ticker.wait_for_tick();
        let second = ticker.wait_for_tick();
        assert_eq!(second.index, first.index + 1);
        assert!(second.at >= first.at + Duration::from_millis(5));
    }
}
