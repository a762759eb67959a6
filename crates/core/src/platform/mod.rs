pub mod stub;
pub mod hotkey;

#[cfg(target_os = "macos")]
pub mod darwin;

#[cfg(not(target_os = "macos"))]
pub mod desktop;

use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbaImage;

use crate::error::{InputError, OcrError};
use crate::logger;
use crate::types::Region;

/// Screen-level automation ops the engine drives. Coordinates are global
/// screen pixels.
pub trait Platform: Send {
    fn screen_size(&self) -> Result<(i32, i32), InputError>;
    fn cursor_position(&self) -> Result<(i32, i32), InputError>;
    fn move_to(&mut self, x: f64, y: f64) -> Result<(), InputError>;
    fn click(&mut self) -> Result<(), InputError>;
    fn capture(&mut self, region: Region) -> Result<RgbaImage, OcrError>;
    /// Title of the foreground window, if one can be determined.
    fn foreground_title(&self) -> Option<String>;
    /// Titles of visible windows, deduplicated, front to back.
    fn window_titles(&self) -> Vec<String>;
}

/// Create the platform appropriate for the current OS.
/// `stub_title` is what the stub reports as its foreground window.
pub fn create_platform(force_stub: bool, stub_title: &str) -> Box<dyn Platform> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Box::new(stub::StubPlatform::new(stub_title));
    }
    #[cfg(target_os = "macos")]
    {
        logger::register_prefix("darwin", logger::COLOR_GRAY);
        Box::new(darwin::DarwinPlatform::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        logger::register_prefix("desktop", logger::COLOR_GRAY);
        match desktop::DesktopPlatform::new() {
            Ok(p) => Box::new(p),
            Err(e) => {
                logger::error_p("desktop", &format!("input backend unavailable, using stub: {}", e));
                logger::register_prefix("stub", logger::COLOR_GRAY);
                Box::new(stub::StubPlatform::new(stub_title))
            }
        }
    }
}

/// Dedup titles keeping first occurrence; drops blanks.
pub(crate) fn unique_titles(titles: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in titles {
        let t = t.trim().to_string();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

/// Tracks a run of consecutive failures so a polled call warns once per
/// streak instead of on every poll.
#[derive(Debug, Default)]
pub struct FailureStreak {
    failing: AtomicBool,
}

impl FailureStreak {
    /// Record a failure. `true` only for the first failure of a streak.
    pub fn fail(&self) -> bool {
        !self.failing.swap(true, Ordering::AcqRel)
    }

    pub fn succeed(&self) {
        self.failing.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_streak_reports_first_failure_only() {
        let streak = FailureStreak::default();
        assert!(streak.fail());
        assert!(!streak.fail());
        assert!(!streak.fail());
        streak.succeed();
        assert!(streak.fail());
    }

    #[test]
    fn test_unique_titles_dedups_and_trims() {
        let titles = unique_titles(["Game ", "", "Game", "Chat"].map(String::from));
        assert_eq!(titles, vec!["Game", "Chat"]);
    }
}
