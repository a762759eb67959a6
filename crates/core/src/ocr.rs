//! Price reading: capture a region, clean it up, OCR it, parse it.

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use image::{imageops, DynamicImage, GrayImage, ImageFormat, RgbaImage};

use crate::error::OcrError;
use crate::parse::parse_numeric;
use crate::platform::Platform;
use crate::types::Region;

/// Characters the OCR engine may emit.
pub const WHITELIST: &str = "0123456789Kk,.";

/// Black-box image → text recognizer.
pub trait OcrEngine: Send {
    fn recognize(&mut self, image: &GrayImage) -> Result<String, OcrError>;

    /// Fails when the engine cannot be run at all.
    fn check_available(&self) -> Result<(), OcrError> {
        Ok(())
    }
}

/// Runs the `tesseract` executable in single-line mode, piping a PNG through
/// stdin/stdout.
pub struct TesseractCli {
    binary: PathBuf,
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&mut self, image: &GrayImage) -> Result<String, OcrError> {
        let mut png = Vec::new();
        DynamicImage::ImageLuma8(image.clone())
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| OcrError::Engine(format!("png encode: {}", e)))?;

        let whitelist = format!("tessedit_char_whitelist={}", WHITELIST);
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "--psm", "7", "-c", &whitelist])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OcrError::Engine(format!("spawn {}: {}", self.binary.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&png) {
                // reap before bailing out
                child.kill().ok();
                child.wait().ok();
                return Err(OcrError::Engine(format!("write image: {}", e)));
            }
        }
        let output = child
            .wait_with_output()
            .map_err(|e| OcrError::Engine(format!("wait: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn check_available(&self) -> Result<(), OcrError> {
        let status = Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| OcrError::Engine(format!("{} not found: {}", self.binary.display(), e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(OcrError::Engine(format!("{} --version exited with {}", self.binary.display(), status)))
        }
    }
}

/// Engine that replays canned text, ignoring the image. `Err` entries are
/// reported as engine failures. Used by `--stub` runs and tests.
pub struct ScriptedOcr {
    script: VecDeque<Result<String, String>>,
    replay: Vec<Result<String, String>>,
}

impl ScriptedOcr {
    /// Play `lines` once, then return empty text forever.
    pub fn once<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self {
            script: lines.into_iter().map(|s| Ok(s.into())).collect(),
            replay: Vec::new(),
        }
    }

    /// Play `lines` in a loop.
    pub fn cycle<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        let replay: Vec<_> = lines.into_iter().map(|s| Ok(s.into())).collect();
        Self { script: replay.iter().cloned().collect(), replay }
    }

    /// Append an engine failure to the script.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push_back(Err(message.to_string()));
        self
    }
}

impl OcrEngine for ScriptedOcr {
    fn recognize(&mut self, _image: &GrayImage) -> Result<String, OcrError> {
        if self.script.is_empty() && !self.replay.is_empty() {
            self.script.extend(self.replay.iter().cloned());
        }
        match self.script.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(OcrError::Engine(e)),
            None => Ok(String::new()),
        }
    }
}

/// Grayscale, unsharp mask, stretch contrast, then hard threshold at mid gray.
pub fn preprocess(image: &RgbaImage) -> GrayImage {
    let gray = imageops::grayscale(image);
    let mut sharpened: GrayImage = imageops::unsharpen(&gray, 2.0, 3);
    autocontrast(&mut sharpened);
    for px in sharpened.pixels_mut() {
        px.0[0] = if px.0[0] > 128 { 255 } else { 0 };
    }
    sharpened
}

fn autocontrast(image: &mut GrayImage) {
    let (lo, hi) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if hi <= lo {
        return;
    }
    let span = (hi - lo) as u32;
    for px in image.pixels_mut() {
        px.0[0] = ((px.0[0] - lo) as u32 * 255 / span) as u8;
    }
}

/// Outcome of sampling one region.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Mean of the attempts that parsed, if any did.
    pub value: Option<f64>,
    /// Trimmed OCR text of every attempt, parsed or not.
    pub raw: Vec<String>,
}

/// Captures a region repeatedly and averages the numbers read.
pub struct PriceSampler {
    ocr: Box<dyn OcrEngine>,
}

impl PriceSampler {
    pub fn new(ocr: Box<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    pub fn check_available(&self) -> Result<(), OcrError> {
        self.ocr.check_available()
    }

    pub fn sample(
        &mut self,
        platform: &mut dyn Platform,
        region: Region,
        attempts: u32,
    ) -> Result<Sample, OcrError> {
        let mut values = Vec::new();
        let mut raw = Vec::new();
        for _ in 0..attempts {
            let frame = preprocess(&platform.capture(region)?);
            let text = self.ocr.recognize(&frame)?;
            if let Some(v) = parse_numeric(&text) {
                values.push(v);
            }
            raw.push(text.trim().to_string());
        }
        let value = if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };
        Ok(Sample { value, raw })
    }

    /// Read the balance region once. A `K` in the text scales by 1000.
    pub fn read_balance(
        &mut self,
        platform: &mut dyn Platform,
        region: Region,
    ) -> Result<Option<f64>, OcrError> {
        let sample = self.sample(platform, region, 1)?;
        let thousands = sample
            .raw
            .first()
            .is_some_and(|t| t.to_uppercase().contains('K'));
        Ok(sample.value.map(|v| if thousands { v * 1_000.0 } else { v }))
    }
}
