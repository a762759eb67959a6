use core_foundation::array::CFArray;
use core_foundation::base::TCFType;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::display::CGDisplay;
use core_graphics::event::*;
use core_graphics::event_source::*;
use core_graphics::geometry::*;
use core_graphics::window::*;
use image::RgbaImage;

use crate::error::{InputError, OcrError};
use crate::logger;
use crate::types::Region;
use super::{unique_titles, Platform};

type WindowInfo = CFDictionary<CFString, *const std::ffi::c_void>;

pub struct DarwinPlatform;

impl DarwinPlatform {
    pub fn new() -> Self {
        DarwinPlatform
    }

    fn event_source() -> Result<CGEventSource, InputError> {
        CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| InputError::Dispatch("failed to create event source".into()))
    }

    fn post_mouse(&self, kind: CGEventType, point: CGPoint) -> Result<(), InputError> {
        let event = CGEvent::new_mouse_event(Self::event_source()?, kind, point, CGMouseButton::Left)
            .map_err(|_| InputError::Dispatch("failed to create mouse event".into()))?;
        event.post(CGEventTapLocation::HID);
        Ok(())
    }

    /// On-screen layer-0 windows as (title, owner), front to back.
    fn windows(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        unsafe {
            let option = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
            let window_list_ref = CGWindowListCopyWindowInfo(option, kCGNullWindowID);
            if window_list_ref.is_null() {
                logger::warn_p("darwin", "failed to get window list");
                return out;
            }

            let list: CFArray = CFArray::wrap_under_create_rule(window_list_ref as _);
            for dict_ptr in &list.get_all_values() {
                let dict: WindowInfo = CFDictionary::wrap_under_get_rule(*dict_ptr as _);
                if get_cf_number(&dict, "kCGWindowLayer") != Some(0) {
                    continue;
                }
                let name = get_cf_string(&dict, "kCGWindowName").unwrap_or_default();
                let owner = get_cf_string(&dict, "kCGWindowOwnerName").unwrap_or_default();
                out.push((name, owner));
            }
        }
        out
    }
}

impl Default for DarwinPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for DarwinPlatform {
    fn screen_size(&self) -> Result<(i32, i32), InputError> {
        let bounds = CGDisplay::main().bounds();
        Ok((bounds.size.width as i32, bounds.size.height as i32))
    }

    fn cursor_position(&self) -> Result<(i32, i32), InputError> {
        let event = CGEvent::new(Self::event_source()?)
            .map_err(|_| InputError::Dispatch("failed to query pointer".into()))?;
        let p = event.location();
        Ok((p.x as i32, p.y as i32))
    }

    fn move_to(&mut self, x: f64, y: f64) -> Result<(), InputError> {
        self.post_mouse(CGEventType::MouseMoved, CGPoint::new(x, y))
    }

    fn click(&mut self) -> Result<(), InputError> {
        let (x, y) = self.cursor_position()?;
        let point = CGPoint::new(x as f64, y as f64);
        self.post_mouse(CGEventType::LeftMouseDown, point)?;
        std::thread::sleep(std::time::Duration::from_millis(15));
        self.post_mouse(CGEventType::LeftMouseUp, point)
    }

    fn capture(&mut self, region: Region) -> Result<RgbaImage, OcrError> {
        let rect = CGRect::new(
            &CGPoint::new(region.x as f64, region.y as f64),
            &CGSize::new(region.w as f64, region.h as f64),
        );
        let image_option = kCGWindowImageBoundsIgnoreFraming | kCGWindowImageNominalResolution;
        let image = create_image(rect, kCGWindowListOptionOnScreenOnly, kCGNullWindowID, image_option)
            .ok_or_else(|| OcrError::Capture(format!("screen capture of {} returned nothing", region)))?;

        let bpr = image.bytes_per_row();
        let width = image.width() as u32;
        let height = image.height() as u32;
        let cf_data = image.data();
        let bytes = cf_data.bytes();

        // BGRA rows, possibly padded past width * 4
        let mut out = RgbaImage::new(width, height);
        for (x, y, px) in out.enumerate_pixels_mut() {
            let idx = y as usize * bpr + x as usize * 4;
            if let Some(bgra) = bytes.get(idx..idx + 4) {
                *px = image::Rgba([bgra[2], bgra[1], bgra[0], bgra[3]]);
            }
        }
        Ok(out)
    }

    fn foreground_title(&self) -> Option<String> {
        self.windows()
            .into_iter()
            .next()
            .map(|(name, owner)| if name.is_empty() { owner } else { name })
    }

    fn window_titles(&self) -> Vec<String> {
        unique_titles(
            self.windows()
                .into_iter()
                .map(|(name, owner)| if name.is_empty() { owner } else { name }),
        )
    }
}

// --- CF Dictionary helpers ---

unsafe fn get_cf_string(dict: &WindowInfo, key: &str) -> Option<String> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    let cf_str: CFString = CFString::wrap_under_get_rule(*value as _);
    Some(cf_str.to_string())
}

unsafe fn get_cf_number(dict: &WindowInfo, key: &str) -> Option<i64> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    let cf_num: CFNumber = CFNumber::wrap_under_get_rule(*value as _);
    cf_num.to_i64()
}
