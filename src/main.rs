use std::io;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use buybot_core::input::InputConfig;
use buybot_core::logger;
use buybot_core::ocr::{OcrEngine, ScriptedOcr, TesseractCli};
use buybot_core::platform::{create_platform, hotkey};
use buybot_core::recorder::CsvLedger;
use buybot_core::settings::SettingsStore;
use buybot_tui::{App, Backends};

/// Lines the stub OCR cycles through: prices either side of a typical
/// max plus the odd unreadable frame.
const STUB_OCR_LINES: &[&str] = &["1,250", "980", "", "1.2K", "875", "12,400"];

fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let force_stub = args.iter().any(|a| a == "--stub");
    let target_override = flag_value(&args, "--target");
    let tesseract = flag_value(&args, "--tesseract").unwrap_or_else(|| "tesseract".to_string());

    let work_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    logger::init(&work_dir.join("logs"))?;

    let mut settings = SettingsStore::load(&work_dir.join("settings.json"));
    if let Some(title) = &target_override {
        if let Err(e) = settings.set_target_window(title) {
            logger::error(&format!("saving target window: {}", e));
        }
    }

    let ledger = CsvLedger::open(&work_dir)?;
    logger::info(&format!("trade ledger at {}", ledger.path().display()));

    let stub_title = settings.target_window().to_string();
    let backends = Backends {
        platform: Box::new(move || create_platform(force_stub, &stub_title)),
        ocr: Box::new(move || -> Box<dyn OcrEngine> {
            if force_stub {
                Box::new(ScriptedOcr::cycle(STUB_OCR_LINES.iter().copied()))
            } else {
                Box::new(TesseractCli::new(tesseract.clone()))
            }
        }),
        ledger: Arc::new(ledger),
        input: InputConfig { fail_safe: true, settle_ms: 0 },
    };

    // Wire logger to TUI
    let (log_tx, log_rx) = mpsc::channel::<String>();
    logger::set_tui_sender(log_tx);
    logger::info("buybot started");

    let mut app = App::new(settings, backends, log_rx);

    // Global stop hotkey
    let hotkey_flag = Arc::new(AtomicBool::new(false));
    hotkey::start_stop_hotkey(Arc::clone(&hotkey_flag));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = buybot_tui::event::run(&mut terminal, &mut app, hotkey_flag);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_value_takes_following_arg() {
        let args: Vec<String> = ["buybot", "--stub", "--target", "Market", "--tesseract"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(flag_value(&args, "--target").as_deref(), Some("Market"));
        assert_eq!(flag_value(&args, "--tesseract"), None);
        assert_eq!(flag_value(&args, "--missing"), None);
    }
}
