use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use chrono::Local;

use buybot_core::engine::{self, EngineDeps, EngineHandle, RunOptions};
use buybot_core::events::{DebugRecord, EngineEvent};
use buybot_core::input::InputConfig;
use buybot_core::logger;
use buybot_core::ocr::{OcrEngine, PriceSampler};
use buybot_core::platform::Platform;
use buybot_core::recorder::{LedgerSink, TradeLedgerEntry};
use buybot_core::settings::{NumericField, SettingsStore};
use buybot_core::types::RegionRole;

use crate::confirm::ConfirmDialog;

const DEBUG_LINES: usize = 500;
/// Trades kept on screen; the ledger file holds the full history.
const TRADE_ROWS: usize = 200;
const BALANCE_POLL: Duration = Duration::from_secs(2);
const QUIT_GRACE: Duration = Duration::from_secs(1);

/// Builds fresh collaborators for each run; a run owns its platform and
/// OCR engine for its whole lifetime.
pub struct Backends {
    pub platform: Box<dyn Fn() -> Box<dyn Platform>>,
    pub ocr: Box<dyn Fn() -> Box<dyn OcrEngine>>,
    pub ledger: Arc<dyn LedgerSink>,
    pub input: InputConfig,
}

pub struct App {
    pub settings: SettingsStore,
    backends: Backends,
    /// Controller-side platform for window listing and balance reads.
    probe: Box<dyn Platform>,
    balance_reader: PriceSampler,
    ocr_available: bool,
    last_balance_poll: Option<Instant>,

    engine: Option<EngineHandle>,
    engine_rx: Option<mpsc::Receiver<EngineEvent>>,
    pub options: RunOptions,
    pub status: String,
    pub trades: VecDeque<TradeLedgerEntry>,

    pub debug_visible: bool,
    pub detail_view: bool,
    pub debug_lines: VecDeque<String>,
    pub detail_lines: VecDeque<String>,

    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,

    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(settings: SettingsStore, backends: Backends, log_rx: mpsc::Receiver<String>) -> Self {
        let probe = (backends.platform)();
        let balance_reader = PriceSampler::new((backends.ocr)());
        let ocr_available = match balance_reader.check_available() {
            Ok(()) => true,
            Err(e) => {
                logger::warn(&format!("balance polling disabled: {}", e));
                false
            }
        };
        Self {
            settings,
            backends,
            probe,
            balance_reader,
            ocr_available,
            last_balance_poll: None,
            engine: None,
            engine_rx: None,
            options: RunOptions { randomize_clicks: true, skip_buy: false, skip_max: false },
            status: "IDLE".into(),
            trades: VecDeque::new(),
            debug_visible: false,
            detail_view: false,
            debug_lines: VecDeque::new(),
            detail_lines: VecDeque::new(),
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            confirm: None,
            should_quit: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_some()
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
    }

    fn push_debug(&mut self, text: impl AsRef<str>) {
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), text.as_ref());
        push_capped(&mut self.debug_lines, line, DEBUG_LINES);
    }

    fn push_detail(&mut self, record: &DebugRecord) {
        let mut line = format!(
            "[{}] {}: {}",
            record.timestamp.with_timezone(&Local).format("%H:%M:%S%.3f"),
            record.state,
            record.message
        );
        for (key, value) in &record.extra {
            line.push_str(&format!(" {}={}", key, value));
        }
        push_capped(&mut self.detail_lines, line, DEBUG_LINES);
    }

    pub fn start(&mut self) {
        if self.engine.is_some() {
            return;
        }
        let ocr = (self.backends.ocr)();
        let (regions, params) = match engine::prepare_run(&self.settings, self.options, ocr.as_ref()) {
            Ok(prepared) => prepared,
            Err(e) => {
                logger::warn(&format!("cannot start: {}", e));
                self.status = e.to_string();
                return;
            }
        };
        logger::info(&format!(
            "starting {} run on '{}'",
            params.buy_method, params.target_window_title
        ));
        let (tx, rx) = mpsc::channel();
        let deps = EngineDeps {
            platform: (self.backends.platform)(),
            ocr,
            ledger: Arc::clone(&self.backends.ledger),
            input: self.backends.input,
        };
        self.engine = Some(engine::start(regions, params, deps, tx));
        self.engine_rx = Some(rx);
        self.status = "RUNNING".into();
        self.push_debug("Worker started.");
    }

    pub fn stop(&mut self) {
        if let Some(handle) = &self.engine {
            handle.stop();
            self.push_debug("Stop requested.");
        }
    }

    pub fn start_stop(&mut self) {
        if self.is_running() {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Apply everything the engine has reported since the last frame.
    pub fn drain_engine(&mut self) {
        let Some(rx) = &self.engine_rx else { return };
        let events: Vec<EngineEvent> = rx.try_iter().collect();
        for event in events {
            match event {
                EngineEvent::Status(s) => {
                    self.push_debug(format!("STATUS: {}", s));
                    self.status = s;
                }
                EngineEvent::Debug(message) => self.push_debug(message),
                EngineEvent::DebugRecord(record) => self.push_detail(&record),
                EngineEvent::TradeLogged(entry) => push_capped(&mut self.trades, entry, TRADE_ROWS),
                EngineEvent::BalanceChanged(balance) => self.set_current_balance(balance),
                EngineEvent::PersistenceFailed(message) => {
                    logger::error(&format!("trade not written to ledger: {}", message));
                }
                EngineEvent::Fatal(message) => {
                    logger::error(&format!("automation error: {}", message));
                    self.push_debug(format!("ERROR: {}", message));
                    self.stop();
                }
                EngineEvent::Finished => self.finish_run(),
            }
        }
    }

    fn finish_run(&mut self) {
        if let Some(handle) = self.engine.take() {
            handle.join();
        }
        self.engine_rx = None;
        self.status = "IDLE".into();
        self.push_debug("Worker finished.");
    }

    /// Adopt a balance unless it is negative or within a cent of the
    /// current one.
    pub fn set_current_balance(&mut self, value: f64) {
        if value < 0.0 {
            return;
        }
        let current = self.settings.numeric(NumericField::CurrentBalance);
        if (current - value).abs() < 0.01 {
            return;
        }
        if let Err(e) = self.settings.set_numeric(NumericField::CurrentBalance, value) {
            logger::error(&format!("saving balance: {}", e));
            self.status = format!("PERSISTENCE_FAILED:{}", e);
        }
    }

    /// Read the balance region every few seconds while no run is active.
    pub fn poll_balance(&mut self) {
        if self.engine.is_some() || !self.ocr_available {
            return;
        }
        if self.last_balance_poll.is_some_and(|t| t.elapsed() < BALANCE_POLL) {
            return;
        }
        self.last_balance_poll = Some(Instant::now());

        let method = self.settings.buy_method();
        let Some(region) = self.settings.get_region(RegionRole::Balance, method) else {
            return;
        };
        match self.balance_reader.read_balance(self.probe.as_mut(), region) {
            Ok(Some(value)) => self.set_current_balance(value),
            Ok(None) => {}
            Err(e) => self.push_debug(format!("BALANCE_OCR_ERROR:{}", e)),
        }
    }

    pub fn toggle_method(&mut self) {
        if self.is_running() {
            return;
        }
        let next = self.settings.buy_method().toggled();
        match self.settings.set_buy_method(next) {
            Ok(()) => logger::info(&format!("buy method: {}", next)),
            Err(e) => logger::error(&format!("saving buy method: {}", e)),
        }
    }

    /// Step the target window through the currently open windows.
    pub fn cycle_target_window(&mut self) {
        if self.is_running() {
            return;
        }
        let titles = self.probe.window_titles();
        if titles.is_empty() {
            logger::warn("no windows found");
            return;
        }
        let current = self.settings.target_window();
        let next = titles
            .iter()
            .position(|t| t == current)
            .map_or(0, |i| (i + 1) % titles.len());
        let title = titles[next].clone();
        match self.settings.set_target_window(&title) {
            Ok(()) => logger::info(&format!("target window: {}", title)),
            Err(e) => logger::error(&format!("saving target window: {}", e)),
        }
    }

    pub fn toggle_randomize(&mut self) {
        self.options.randomize_clicks = !self.options.randomize_clicks;
    }

    pub fn toggle_skip_buy(&mut self) {
        self.options.skip_buy = !self.options.skip_buy;
    }

    pub fn toggle_skip_max(&mut self) {
        self.options.skip_max = !self.options.skip_max;
    }

    pub fn toggle_debug(&mut self) {
        self.debug_visible = !self.debug_visible;
    }

    pub fn toggle_detail_view(&mut self) {
        self.detail_view = !self.detail_view;
    }

    pub fn clear_details(&mut self) {
        self.detail_lines.clear();
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    /// Turn a press of the global stop hotkey into a stop.
    pub fn check_hotkey(&mut self, flag: &AtomicBool) {
        if flag.swap(false, Ordering::AcqRel) && self.is_running() {
            logger::info("stop hotkey pressed");
            self.push_debug("Hotkey -> Stop requested.");
            self.stop();
        }
    }

    /// Quit directly when idle; ask first while a run is active.
    pub fn request_quit(&mut self) {
        if self.is_running() {
            self.confirm = Some(ConfirmDialog::new("A run is active. Stop it and quit?"));
        } else {
            self.quit();
        }
    }

    pub fn quit(&mut self) {
        if let Some(handle) = self.engine.take() {
            handle.stop();
            let deadline = Instant::now() + QUIT_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                handle.join();
            } else {
                logger::warn("engine still busy at exit");
            }
        }
        self.should_quit = true;
    }
}

fn push_capped<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    if buf.len() >= cap {
        buf.pop_front();
    }
    buf.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use buybot_core::ocr::ScriptedOcr;
    use buybot_core::platform::stub::StubPlatform;
    use buybot_core::recorder::CsvLedger;
    use buybot_core::types::Region;

    fn app_in(dir: &tempfile::TempDir, ocr_lines: &'static [&'static str]) -> App {
        let settings = SettingsStore::load(&dir.path().join("settings.json"));
        let backends = Backends {
            platform: Box::new(|| Box::new(StubPlatform::new("Game")) as Box<dyn Platform>),
            ocr: Box::new(move || Box::new(ScriptedOcr::cycle(ocr_lines.iter().copied())) as Box<dyn OcrEngine>),
            ledger: Arc::new(CsvLedger::open(dir.path()).unwrap()),
            input: InputConfig { fail_safe: false, settle_ms: 0 },
        };
        let (_tx, rx) = mpsc::channel();
        App::new(settings, backends, rx)
    }

    #[test]
    fn test_start_refused_without_regions() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(&dir, &["100"]);
        app.start();
        assert!(!app.is_running());
        assert!(app.status.starts_with("regions not configured for simple"), "{}", app.status);
    }

    #[test]
    fn test_balance_changes_below_a_cent_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(&dir, &["100"]);
        app.set_current_balance(500.0);
        app.set_current_balance(500.004);
        app.set_current_balance(-3.0);
        assert_eq!(app.settings.numeric(NumericField::CurrentBalance), 500.0);
    }

    #[test]
    fn test_poll_balance_reads_k_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(&dir, &["12.5K"]);
        let method = app.settings.buy_method();
        app.settings
            .set_region(RegionRole::Balance, Region::new(0, 0, 40, 12), method)
            .unwrap();
        app.poll_balance();
        assert_eq!(app.settings.numeric(NumericField::CurrentBalance), 12_500.0);
    }

    #[test]
    fn test_cycle_target_window_uses_open_windows() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(&dir, &["1"]);
        app.cycle_target_window();
        assert_eq!(app.settings.target_window(), "Game");
    }

    #[test]
    fn test_trade_list_keeps_newest_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(&dir, &["1"]);
        let (tx, rx) = mpsc::channel();
        app.engine_rx = Some(rx);
        for i in 0..(TRADE_ROWS + 5) {
            let entry = TradeLedgerEntry {
                timestamp: chrono::Utc::now(),
                unit_price: i as f64,
                spent: i as f64,
                balance_after: 0.0,
            };
            tx.send(EngineEvent::TradeLogged(entry)).unwrap();
        }
        app.drain_engine();
        assert_eq!(app.trades.len(), TRADE_ROWS);
        assert_eq!(app.trades.front().map(|t| t.unit_price), Some(5.0));
        assert_eq!(app.trades.back().map(|t| t.unit_price), Some((TRADE_ROWS + 4) as f64));
    }
}

