use enigo::{Button, Coordinate, Direction, Enigo, Mouse, Settings};
use image::{imageops, RgbaImage};

use crate::error::{InputError, OcrError};
use crate::logger;
use crate::types::Region;
use super::{unique_titles, FailureStreak, Platform};

/// Windows / Linux backend: enigo for pointer input, xcap for capture and
/// window lookup.
pub struct DesktopPlatform {
    enigo: Enigo,
    window_list: FailureStreak,
}

impl DesktopPlatform {
    pub fn new() -> anyhow::Result<Self> {
        let enigo = Enigo::new(&Settings::default())?;
        Ok(Self { enigo, window_list: FailureStreak::default() })
    }
}

fn dispatch_err(e: impl std::fmt::Display) -> InputError {
    InputError::Dispatch(e.to_string())
}

fn capture_err(e: impl std::fmt::Display) -> OcrError {
    OcrError::Capture(e.to_string())
}

impl Platform for DesktopPlatform {
    fn screen_size(&self) -> Result<(i32, i32), InputError> {
        self.enigo.main_display().map_err(dispatch_err)
    }

    fn cursor_position(&self) -> Result<(i32, i32), InputError> {
        self.enigo.location().map_err(dispatch_err)
    }

    fn move_to(&mut self, x: f64, y: f64) -> Result<(), InputError> {
        self.enigo
            .move_mouse(x.round() as i32, y.round() as i32, Coordinate::Abs)
            .map_err(dispatch_err)
    }

    fn click(&mut self) -> Result<(), InputError> {
        self.enigo.button(Button::Left, Direction::Click).map_err(dispatch_err)
    }

    fn capture(&mut self, region: Region) -> Result<RgbaImage, OcrError> {
        let monitor = xcap::Monitor::from_point(region.x, region.y).map_err(capture_err)?;
        let origin_x = monitor.x().map_err(capture_err)?;
        let origin_y = monitor.y().map_err(capture_err)?;
        let frame = monitor.capture_image().map_err(capture_err)?;

        // xcap may link a different `image` release; hand the pixels across raw.
        let (fw, fh) = (frame.width(), frame.height());
        let full = RgbaImage::from_raw(fw, fh, frame.into_raw())
            .ok_or_else(|| OcrError::Capture("monitor frame has unexpected size".into()))?;

        let left = (region.x - origin_x).max(0) as u32;
        let top = (region.y - origin_y).max(0) as u32;
        if left >= fw || top >= fh {
            return Err(OcrError::Capture(format!("{} lies outside monitor", region)));
        }
        let w = (region.w as u32).min(fw - left);
        let h = (region.h as u32).min(fh - top);
        Ok(imageops::crop_imm(&full, left, top, w, h).to_image())
    }

    fn foreground_title(&self) -> Option<String> {
        let windows = match xcap::Window::all() {
            Ok(w) => {
                self.window_list.succeed();
                w
            }
            Err(e) => {
                if self.window_list.fail() {
                    logger::warn_p("desktop", &format!("window list failed: {}", e));
                }
                return None;
            }
        };
        windows
            .into_iter()
            .find(|w| w.is_focused().unwrap_or(false))
            .and_then(|w| w.title().ok())
    }

    fn window_titles(&self) -> Vec<String> {
        let windows = xcap::Window::all().unwrap_or_default();
        unique_titles(windows.into_iter().filter_map(|w| w.title().ok()))
    }
}
