use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crtconfig::{PendingUpdate, PixelScale, SettingValue, SettingsRecord, SettingsStore};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::engine::ShaderEngine;
use crate::runtime::{DisplaySize, FixedRateTicker, RenderLoop, TickOutcome};
use crate::sampler::VideoFrameSource;
use crate::types::RenderFailure;

const BRIGHTNESS_STEP: f32 = 0.05;

/// Options for the desktop preview window.
#[derive(Debug, Clone)]
pub struct PreviewOptions {
    pub title: String,
    pub size: PhysicalSize<u32>,
    /// Tick on a fixed timer instead of on every display refresh.
    pub tick_interval: Option<Duration>,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            title: "CRT overlay".to_string(),
            size: PhysicalSize::new(960, 540),
            tick_interval: None,
        }
    }
}

/// Keyboard shortcuts mapped onto settings mutations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Shortcut {
    ToggleEnabled,
    Brightness(f32),
    PixelSize(PixelScale),
}

impl Shortcut {
    pub(crate) fn from_key(key: &Key) -> Option<Self> {
        match key {
            Key::Character(value) => match value.as_str() {
                "c" | "C" => Some(Shortcut::ToggleEnabled),
                "+" | "=" => Some(Shortcut::Brightness(BRIGHTNESS_STEP)),
                "-" | "_" => Some(Shortcut::Brightness(-BRIGHTNESS_STEP)),
                "1" | "2" | "3" => value
                    .parse::<u32>()
                    .ok()
                    .and_then(|n| PixelScale::new(n).ok())
                    .map(Shortcut::PixelSize),
                _ => None,
            },
            Key::Named(NamedKey::ArrowUp) => Some(Shortcut::Brightness(BRIGHTNESS_STEP)),
            Key::Named(NamedKey::ArrowDown) => Some(Shortcut::Brightness(-BRIGHTNESS_STEP)),
            _ => None,
        }
    }

    /// The value this shortcut produces on top of `current`.
    pub(crate) fn to_value(self, current: &SettingsRecord) -> SettingValue {
        match self {
            Shortcut::ToggleEnabled => SettingValue::Enabled(!current.enabled),
            Shortcut::Brightness(delta) => {
                SettingValue::Brightness((current.brightness + delta).clamp(0.0, 1.0))
            }
            Shortcut::PixelSize(scale) => SettingValue::PixelSize(scale),
        }
    }
}

fn handle_key(store: &SettingsStore, event: &KeyEvent) {
    if event.state != ElementState::Pressed || event.repeat {
        return;
    }
    let Some(shortcut) = Shortcut::from_key(&event.logical_key) else {
        return;
    };
    // Completion arrives as a settings event; the render path never waits on it.
    let _pending = apply_shortcut(store, shortcut);
}

/// Applies `shortcut` to the staged record, so presses that land before the
/// previous one is published still stack.
fn apply_shortcut(store: &SettingsStore, shortcut: Shortcut) -> (SettingValue, PendingUpdate) {
    let mut applied = None;
    let pending = store.update(|record| {
        let value = shortcut.to_value(record);
        record.apply(value);
        applied = Some(value);
    });
    let value = applied.unwrap_or_else(|| shortcut.to_value(&store.values()));
    tracing::info!(key = %value.key(), %value, "setting changed from preview window");
    (value, pending)
}

/// Opens a transparent window and runs the render loop on its event loop
/// until the window closes.
pub fn run_preview<S>(options: PreviewOptions, store: SettingsStore, source: S) -> Result<()>
where
    S: VideoFrameSource + 'static,
{
    let event_loop = EventLoopBuilder::new()
        .build()
        .map_err(|err| anyhow!("failed to create event loop: {err}"))?;

    let window = WindowBuilder::new()
        .with_title(options.title.clone())
        .with_inner_size(options.size)
        .with_transparent(true)
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let size = window.inner_size();
    let engine = ShaderEngine::initialize(window.clone(), size);
    let display = DisplaySize::new(size);
    let mut render_loop = RenderLoop::new(&store, source, engine, display.clone());
    let mut ticker = options.tick_interval.map(FixedRateTicker::new);

    tracing::info!(
        width = size.width,
        height = size.height,
        "preview running; C toggles, +/- brightness, 1/2/3 pixel size"
    );
    window.request_redraw();

    let run_result = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                elwt.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                handle_key(&store, &event);
            }
            WindowEvent::Resized(new_size) => {
                display.set(new_size);
            }
            WindowEvent::RedrawRequested => {
                if let TickOutcome::Failed(RenderFailure::Surface(wgpu::SurfaceError::OutOfMemory)) =
                    render_loop.tick()
                {
                    tracing::error!("surface out of memory; closing preview");
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => match ticker.as_mut() {
            Some(ticker) => {
                let now = std::time::Instant::now();
                if ticker.poll_tick(now).is_some() {
                    window.request_redraw();
                }
                match ticker.next_deadline() {
                    Some(deadline) => elwt.set_control_flow(ControlFlow::WaitUntil(deadline)),
                    None => elwt.set_control_flow(ControlFlow::Wait),
                }
            }
            None => {
                window.request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            }
        },
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crtconfig::MemoryStore;
    use winit::keyboard::SmolStr;

    fn character(value: &str) -> Key {
        Key::Character(SmolStr::new(value))
    }

    #[test]
    fn maps_shortcut_keys() {
        assert_eq!(
            Shortcut::from_key(&character("c")),
            Some(Shortcut::ToggleEnabled)
        );
        assert_eq!(
            Shortcut::from_key(&character("2")),
            Some(Shortcut::PixelSize(PixelScale::new(2).unwrap()))
        );
        assert_eq!(
            Shortcut::from_key(&Key::Named(NamedKey::ArrowDown)),
            Some(Shortcut::Brightness(-BRIGHTNESS_STEP))
        );
        assert_eq!(Shortcut::from_key(&character("4")), None);
        assert_eq!(Shortcut::from_key(&character("x")), None);
    }

    #[test]
    fn shortcuts_derive_values_from_current_record() {
        let current = SettingsRecord::default();
        assert_eq!(
            Shortcut::ToggleEnabled.to_value(&current),
            SettingValue::Enabled(false)
        );
        match Shortcut::Brightness(BRIGHTNESS_STEP).to_value(&current) {
            SettingValue::Brightness(value) => assert!((value - 0.175).abs() < 1e-6),
            other => panic!("unexpected value: {other:?}"),
        }
        assert_eq!(
            Shortcut::Brightness(-1.0).to_value(&current),
            SettingValue::Brightness(0.0)
        );
    }

    #[test]
    fn rapid_shortcuts_stack_before_publish() {
        let store = SettingsStore::open_blocking(MemoryStore::new()).unwrap();
        let (first, first_pending) = apply_shortcut(&store, Shortcut::ToggleEnabled);
        let (second, second_pending) = apply_shortcut(&store, Shortcut::ToggleEnabled);
        assert_eq!(first, SettingValue::Enabled(false));
        assert_eq!(second, SettingValue::Enabled(true));
        first_pending.wait().unwrap();
        second_pending.wait().unwrap();

        let (nudged, pending) = apply_shortcut(&store, Shortcut::Brightness(BRIGHTNESS_STEP));
        let (nudged_again, again) = apply_shortcut(&store, Shortcut::Brightness(BRIGHTNESS_STEP));
        pending.wait().unwrap();
        again.wait().unwrap();
        match (nudged, nudged_again) {
            (SettingValue::Brightness(a), SettingValue::Brightness(b)) => {
                assert!((a - 0.175).abs() < 1e-6);
                assert!((b - 0.225).abs() < 1e-6);
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }
}
