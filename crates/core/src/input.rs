//! Pointer input: the focus guard and the click dispatcher.

use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::InputError;
use crate::platform::Platform;
use crate::sleep;
use crate::types::Region;

pub const STATUS_WAITING_FOR_FOCUS: &str = "WAITING_FOR_TARGET_FOCUS";
pub const STATUS_FOCUS_READY: &str = "TARGET_FOCUS_READY";

/// Pointer-dispatch tuning, passed in rather than set globally.
#[derive(Debug, Clone, Copy)]
pub struct InputConfig {
    /// Abort when the pointer sits in a screen corner.
    pub fail_safe: bool,
    /// Pause after each pointer action.
    pub settle_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { fail_safe: true, settle_ms: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Lost,
    Regained,
}

impl FocusChange {
    pub fn status(&self) -> &'static str {
        match self {
            FocusChange::Lost => STATUS_WAITING_FOR_FOCUS,
            FocusChange::Regained => STATUS_FOCUS_READY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusCheck {
    pub focused: bool,
    /// Set only on the check where focus was lost or came back.
    pub change: Option<FocusChange>,
}

/// Gate on the foreground window title. Edge-triggered: reports a loss once
/// and a return once, however often it is polled.
#[derive(Debug, Clone, Default)]
pub struct FocusGuard {
    target: Option<String>,
    warning_active: bool,
}

impl FocusGuard {
    pub fn new(target_title: &str) -> Self {
        let target = target_title.trim();
        Self {
            target: (!target.is_empty()).then(|| target.to_lowercase()),
            warning_active: false,
        }
    }

    pub fn check(&mut self, foreground: Option<&str>) -> FocusCheck {
        let Some(target) = &self.target else {
            return FocusCheck { focused: true, change: None };
        };
        let active = foreground.map(str::trim).unwrap_or_default();
        let focused = !active.is_empty() && active.to_lowercase().contains(target.as_str());

        let change = match (focused, self.warning_active) {
            (false, false) => Some(FocusChange::Lost),
            (true, true) => Some(FocusChange::Regained),
            _ => None,
        };
        self.warning_active = !focused;
        FocusCheck { focused, change }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClickOptions {
    pub force_center: bool,
    pub extra_delay_ms: u64,
}

/// Moves the pointer into a region and clicks.
pub struct InputDispatcher {
    config: InputConfig,
    randomize: bool,
    click_delay_ms: u64,
    rng: StdRng,
}

impl InputDispatcher {
    pub fn new(config: InputConfig, randomize: bool, click_delay_ms: u64) -> Self {
        Self { config, randomize, click_delay_ms, rng: StdRng::from_entropy() }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Random point 2px inside the region when jitter applies, else center.
    pub fn target_point(&mut self, region: Region, force_center: bool) -> (f64, f64) {
        if self.randomize && !force_center && region.w > 4 && region.h > 4 {
            let x = self.rng.gen_range(region.x as f64 + 2.0..=(region.x + region.w) as f64 - 2.0);
            let y = self.rng.gen_range(region.y as f64 + 2.0..=(region.y + region.h) as f64 - 2.0);
            (x, y)
        } else {
            region.center()
        }
    }

    fn check_fail_safe(&self, platform: &dyn Platform) -> Result<(), InputError> {
        if !self.config.fail_safe {
            return Ok(());
        }
        let (w, h) = platform.screen_size()?;
        let (x, y) = platform.cursor_position()?;
        let at_edge_x = x <= 0 || x >= w - 1;
        let at_edge_y = y <= 0 || y >= h - 1;
        if at_edge_x && at_edge_y {
            return Err(InputError::FailSafe);
        }
        Ok(())
    }

    fn settle(&self) {
        if self.config.settle_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.settle_ms));
        }
    }

    /// Click inside `region`. Returns the point clicked.
    pub fn click(
        &mut self,
        platform: &mut dyn Platform,
        region: Region,
        opts: ClickOptions,
        stop: &AtomicBool,
    ) -> Result<(f64, f64), InputError> {
        let (x, y) = self.target_point(region, opts.force_center);
        self.check_fail_safe(platform)?;
        platform.move_to(x, y)?;
        self.settle();

        let pre_delay = self.click_delay_ms + opts.extra_delay_ms;
        if pre_delay > 0 {
            sleep::sleep_ms(pre_delay, stop);
        }

        self.check_fail_safe(platform)?;
        platform.click()?;
        self.settle();
        Ok((x, y))
    }

    /// Park the pointer at the region center without clicking.
    pub fn hover(&mut self, platform: &mut dyn Platform, region: Region) -> Result<(), InputError> {
        let (x, y) = region.center();
        self.check_fail_safe(platform)?;
        platform.move_to(x, y)?;
        self.settle();
        Ok(())
    }
}
