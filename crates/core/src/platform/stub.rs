use image::{Rgba, RgbaImage};

use crate::error::{InputError, OcrError};
use crate::logger;
use crate::types::Region;
use super::Platform;

/// Platform that only logs what it would do. Captures are blank.
pub struct StubPlatform {
    title: String,
    cursor: (i32, i32),
}

impl StubPlatform {
    pub fn new(title: &str) -> Self {
        let title = if title.trim().is_empty() { "Stub Target".to_string() } else { title.to_string() };
        Self { title, cursor: (960, 540) }
    }
}

impl Platform for StubPlatform {
    fn screen_size(&self) -> Result<(i32, i32), InputError> {
        Ok((1920, 1080))
    }

    fn cursor_position(&self) -> Result<(i32, i32), InputError> {
        Ok(self.cursor)
    }

    fn move_to(&mut self, x: f64, y: f64) -> Result<(), InputError> {
        self.cursor = (x.round() as i32, y.round() as i32);
        logger::info_p("stub", &format!("move_to({:.0}, {:.0})", x, y));
        Ok(())
    }

    fn click(&mut self) -> Result<(), InputError> {
        logger::info_p("stub", &format!("click at {:?}", self.cursor));
        Ok(())
    }

    fn capture(&mut self, region: Region) -> Result<RgbaImage, OcrError> {
        logger::info_p("stub", &format!("capture({})", region));
        let w = region.w.max(1) as u32;
        let h = region.h.max(1) as u32;
        Ok(RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255])))
    }

    fn foreground_title(&self) -> Option<String> {
        Some(self.title.clone())
    }

    fn window_titles(&self) -> Vec<String> {
        vec![self.title.clone()]
    }
}
