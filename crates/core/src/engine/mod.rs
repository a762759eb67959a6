//! The buy loop: one background thread per run driving either the simple
//! item/price/buy cycle or the single-shot bulk purchase.

mod bulk;
mod simple;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Result};

pub use bulk::{bulk_target, decide_bulk, BulkDecision};

use crate::error::{InputError, StartError};
use crate::events::{Emitter, EngineEvent};
use crate::format_money;
use crate::input::{ClickOptions, FocusGuard, InputConfig, InputDispatcher};
use crate::logger;
use crate::ocr::{OcrEngine, PriceSampler};
use crate::platform::Platform;
use crate::recorder::{LedgerSink, TradeRecorder};
use crate::settings::{Delays, NumericField, SettingsStore};
use crate::sleep;
use crate::types::{BuyMethod, RegionRole, RegionSet};

pub const STATUS_IDLE: &str = "IDLE";
pub const STATUS_WAIT: &str = "WAIT";
pub const STATUS_BUY_PLACED: &str = "BUY_PLACED";
pub const STATUS_BULK_READY: &str = "BULK_READY";
pub const STATUS_STOPPED: &str = "STOPPED";
pub const STATUS_FLOOR_REACHED: &str = "BALANCE_FLOOR_REACHED";
pub const STATUS_FAILSAFE: &str = "FAILSAFE_TRIGGERED - stopping";

/// Back-off while the target window is not in front.
const FOCUS_RETRY_MS: u64 = 200;

/// Simple-mode FSM states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    ClickItem,
    CheckPrice,
    OutOfRangeClose,
    Wait,
    InRangeExecute,
    Stopped,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Idle => "IDLE",
            State::ClickItem => "CLICK_ITEM",
            State::CheckPrice => "CHECK_PRICE",
            State::OutOfRangeClose => "OUT_OF_RANGE_CLOSE",
            State::Wait => "WAIT",
            State::InRangeExecute => "IN_RANGE_EXECUTE",
            State::Stopped => "STOPPED",
        }
    }
}

/// Outcome of running one state's actions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// Idle or Wait finished sleeping.
    DelayElapsed,
    ItemClickFailed,
    /// Item clicked (or already open) and the item-wait elapsed.
    ItemReady,
    PriceRead { price: Option<f64>, max_price: f64 },
    CloseDone,
    FloorReached,
    /// A max or buy click failed.
    ActionFailed,
    /// Fresh price rose above max mid-spam and the dialog was closed.
    LeftRange,
    BuyPlaced,
    Stop,
}

/// Flag updates that accompany a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    RequestItemClick,
    /// Clears the should-click-item flag and the max latch.
    ItemHandled,
    StorePrice(f64),
    ClearTotal,
}

/// Next state for `event` in `state`. Events that do not apply to `state`
/// leave it unchanged.
pub fn transition(state: State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    match (state, event) {
        (_, Event::Stop) => (State::Stopped, vec![]),
        (State::Idle, Event::DelayElapsed) => (State::ClickItem, vec![]),
        (State::Wait, Event::DelayElapsed) => (State::ClickItem, vec![ClearTotal]),
        (State::ClickItem, Event::ItemClickFailed) => (State::ClickItem, vec![]),
        (State::ClickItem, Event::ItemReady) => (State::CheckPrice, vec![ItemHandled]),
        (State::CheckPrice, Event::PriceRead { price: None, .. }) => {
            (State::ClickItem, vec![RequestItemClick])
        }
        (State::CheckPrice, Event::PriceRead { price: Some(p), max_price }) => {
            let next = if p > max_price { State::OutOfRangeClose } else { State::InRangeExecute };
            (next, vec![StorePrice(p), ClearTotal])
        }
        (State::OutOfRangeClose, Event::CloseDone) => (State::Wait, vec![RequestItemClick, ClearTotal]),
        (State::InRangeExecute, Event::FloorReached) => (State::Wait, vec![RequestItemClick]),
        (State::InRangeExecute, Event::ActionFailed) => (State::Wait, vec![]),
        (State::InRangeExecute, Event::LeftRange) => (State::Wait, vec![RequestItemClick, ClearTotal]),
        (State::InRangeExecute, Event::BuyPlaced) => (State::InRangeExecute, vec![]),
        (s, _) => (s, vec![]),
    }
}

/// Snapshot of everything a run needs, taken at start.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub max_price: f64,
    pub current_balance: f64,
    pub balance_floor: f64,
    pub delays: Delays,
    pub target_window_title: String,
    pub randomize_clicks: bool,
    pub skip_buy: bool,
    pub skip_max: bool,
    pub buy_method: BuyMethod,
    pub buy_amount: f64,
}

/// Per-run switches chosen in the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub randomize_clicks: bool,
    pub skip_buy: bool,
    pub skip_max: bool,
}

impl RunParams {
    pub fn from_settings(settings: &SettingsStore, options: RunOptions) -> Self {
        let method = settings.buy_method();
        let (max_price, buy_amount) = match method {
            BuyMethod::Simple => (settings.numeric(NumericField::MaxPrice), 1.0),
            BuyMethod::Bulk => (
                settings.numeric(NumericField::BulkMaxPrice),
                settings.numeric(NumericField::BulkBuyAmount),
            ),
        };
        Self {
            max_price,
            current_balance: settings.numeric(NumericField::CurrentBalance),
            balance_floor: settings.numeric(NumericField::BalanceFloor),
            delays: settings.delays(),
            target_window_title: settings.target_window().to_string(),
            randomize_clicks: options.randomize_clicks,
            skip_buy: options.skip_buy,
            skip_max: options.skip_max,
            buy_method: method,
            buy_amount,
        }
    }
}

/// Validate a start request against the stored settings, in the order the
/// controller reports problems.
pub fn prepare_run(
    settings: &SettingsStore,
    options: RunOptions,
    ocr: &dyn OcrEngine,
) -> Result<(RegionSet, RunParams), StartError> {
    let method = settings.buy_method();
    let missing = settings.missing_regions(method);
    if !missing.is_empty() {
        return Err(StartError::MissingRegions { method, missing });
    }
    match method {
        BuyMethod::Simple if settings.numeric(NumericField::MaxPrice) <= 0.0 => {
            return Err(StartError::InvalidMaxPrice);
        }
        BuyMethod::Bulk
            if settings.numeric(NumericField::BulkMaxPrice) <= 0.0
                || settings.numeric(NumericField::BulkBuyAmount) <= 0.0 =>
        {
            return Err(StartError::InvalidBulkValues);
        }
        _ => {}
    }
    if settings.target_window().trim().is_empty() {
        return Err(StartError::NoTargetWindow);
    }
    ocr.check_available().map_err(|e| StartError::OcrUnavailable(e.to_string()))?;

    Ok((settings.regions(method), RunParams::from_settings(settings, options)))
}

/// Mutable per-run bookkeeping.
#[derive(Debug)]
pub struct EngineState {
    pub state: State,
    pub latest_price: Option<f64>,
    /// Cleared whenever a new cycle begins.
    pub latest_total: Option<f64>,
    pub should_click_item: bool,
    pub max_clicked: bool,
    pub pending_confirm_delay: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            state: State::Idle,
            latest_price: None,
            latest_total: None,
            should_click_item: true,
            max_clicked: false,
            pending_confirm_delay: false,
        }
    }
}

impl EngineState {
    fn apply(&mut self, effects: &[Effect]) {
        for effect in effects {
            match *effect {
                Effect::RequestItemClick => self.should_click_item = true,
                Effect::ItemHandled => {
                    self.should_click_item = false;
                    self.max_clicked = false;
                }
                Effect::StorePrice(p) => self.latest_price = Some(p),
                Effect::ClearTotal => self.latest_total = None,
            }
        }
    }
}

/// Collaborators handed to a run. Each run owns its own.
pub struct EngineDeps {
    pub platform: Box<dyn Platform>,
    pub ocr: Box<dyn OcrEngine>,
    pub ledger: Arc<dyn LedgerSink>,
    pub input: InputConfig,
}

/// Controller-side handle to a running engine thread.
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    events: mpsc::Sender<EngineEvent>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Request a stop. Never blocks; repeated calls are no-ops.
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            self.events.send(EngineEvent::Debug("Stop signal received.".into())).ok();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    pub fn join(mut self) {
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                logger::error_p("engine", "engine thread panicked");
            }
        }
    }
}

/// Spawn a run on its own thread.
pub fn start(
    regions: RegionSet,
    params: RunParams,
    deps: EngineDeps,
    events: mpsc::Sender<EngineEvent>,
) -> EngineHandle {
    logger::register_prefix("engine", logger::COLOR_GREEN);
    let stop = Arc::new(AtomicBool::new(false));
    let engine = Engine::new(regions, params, deps, Emitter::new(events.clone()), stop.clone());
    let thread = thread::spawn(move || engine.run());
    EngineHandle { stop, events, thread: Some(thread) }
}

pub(crate) struct Engine {
    regions: RegionSet,
    params: RunParams,
    platform: Box<dyn Platform>,
    sampler: PriceSampler,
    input: InputDispatcher,
    recorder: TradeRecorder,
    focus: FocusGuard,
    emit: Emitter,
    stop: Arc<AtomicBool>,
    st: EngineState,
}

impl Engine {
    fn new(
        regions: RegionSet,
        params: RunParams,
        deps: EngineDeps,
        emit: Emitter,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let input = InputDispatcher::new(deps.input, params.randomize_clicks, params.delays.click_delay_ms);
        Self {
            focus: FocusGuard::new(&params.target_window_title),
            regions,
            platform: deps.platform,
            sampler: PriceSampler::new(deps.ocr),
            input,
            recorder: TradeRecorder::new(deps.ledger),
            emit,
            stop,
            st: EngineState::default(),
            params,
        }
    }

    fn run(mut self) {
        logger::info_p(
            "engine",
            &format!(
                "run started: {} max={} balance={}",
                self.params.buy_method,
                format_money(self.params.max_price),
                format_money(self.params.current_balance)
            ),
        );
        let result = match self.params.buy_method {
            BuyMethod::Simple => self.simple_loop(),
            BuyMethod::Bulk => self.bulk_loop(),
        };
        if let Err(e) = result {
            let message = format!("{:#}", e);
            logger::error_p("engine", &message);
            self.emit.send(EngineEvent::Fatal(message));
        }
        self.st.state = State::Idle;
        self.emit.status(STATUS_IDLE);
        self.debug("STATE -> IDLE");
        self.emit.send(EngineEvent::Finished);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Stop-aware pause. Returns `true` once a stop has been requested, so
    /// a step can bail out before its next action.
    fn sleep(&self, ms: u64) -> bool {
        if ms > 0 {
            sleep::sleep_ms(ms, &self.stop);
        }
        self.stopped()
    }

    fn debug(&self, message: impl Into<String>) {
        self.emit.debug(self.st.state.as_str(), message);
    }

    fn debug_with(&self, message: impl Into<String>, extra: Vec<(&'static str, String)>) {
        self.emit.debug_with(self.st.state.as_str(), message, extra);
    }

    fn debug_timed(&self, message: impl Into<String>, started: Instant, mut extra: Vec<(&'static str, String)>) {
        extra.insert(0, ("duration_ms", started.elapsed().as_millis().to_string()));
        self.debug_with(message, extra);
    }

    /// Feed `event` through the FSM. Announces real state changes.
    fn advance(&mut self, event: Event) {
        let (next, effects) = transition(self.st.state, event);
        self.st.apply(&effects);
        if next != self.st.state {
            self.st.state = next;
            self.debug(format!("STATE -> {}", next.as_str()));
        }
    }

    /// Focus gate. Emits a status only when focus is lost or regained.
    fn ensure_focus(&mut self) -> bool {
        let title = self.platform.foreground_title();
        let check = self.focus.check(title.as_deref());
        if let Some(change) = check.change {
            self.emit.status(change.status());
        }
        check.focused
    }

    fn trip_fail_safe(&self) {
        self.emit.status(STATUS_FAILSAFE);
        self.stop.store(true, Ordering::Release);
        self.debug("Fail-safe triggered.");
    }

    /// Click a configured region. All failures are reported here and turn
    /// into `false`.
    fn click_region(&mut self, role: RegionRole, opts: ClickOptions) -> bool {
        if self.stopped() || !self.ensure_focus() {
            return false;
        }
        let Some(region) = self.regions.get(role) else {
            return false;
        };
        match self.input.click(self.platform.as_mut(), region, opts, &self.stop) {
            Ok((x, y)) => {
                self.debug(format!("CLICK {} ({:.0}, {:.0})", role, x, y));
                true
            }
            Err(InputError::FailSafe) => {
                self.trip_fail_safe();
                false
            }
            Err(e) => {
                self.emit.status(format!("CLICK_FAILED:{}:{}", role, e));
                self.debug(format!("CLICK_FAILED {}: {}", role, e));
                false
            }
        }
    }

    fn click(&mut self, role: RegionRole) -> bool {
        self.click_region(role, ClickOptions::default())
    }

    /// Park the pointer over a region. Only the fail-safe is tolerated.
    fn hover(&mut self, role: RegionRole) -> Result<()> {
        let Some(region) = self.regions.get(role) else {
            return Ok(());
        };
        match self.input.hover(self.platform.as_mut(), region) {
            Ok(()) => Ok(()),
            Err(InputError::FailSafe) => {
                self.trip_fail_safe();
                Ok(())
            }
            Err(e) => Err(anyhow!("moving to {}: {}", role, e)),
        }
    }

    /// Sample a region and report the outcome as `<LABEL>:<value>` or a
    /// read-failure status.
    fn read_value(&mut self, role: RegionRole, label: &str, attempts: u32) -> Option<f64> {
        let region = self.regions.get(role)?;
        if self.stopped() || !self.ensure_focus() {
            return None;
        }
        let started = Instant::now();
        let sample = match self.sampler.sample(self.platform.as_mut(), region, attempts) {
            Ok(sample) => sample,
            Err(e) => {
                let message = format!("OCR_ERROR:{}", e);
                self.emit.status(message.clone());
                self.debug_timed(message, started, vec![]);
                return None;
            }
        };
        let Some(value) = sample.value else {
            let message = format!("{}_READ_FAIL ({})", label, sample.raw.join(" | "));
            self.emit.status(message.clone());
            self.debug_timed(message, started, vec![]);
            return None;
        };
        let formatted = format_money(value);
        self.debug_timed(
            format!("{}_READ {}", label, formatted),
            started,
            vec![("value", formatted.clone())],
        );
        self.emit.status(format!("{}:{}", label, formatted));
        Some(value)
    }

    /// Deduct and record a trade, then tell the controller.
    fn log_trade(&mut self, unit_price: f64, spent: f64) {
        let recorded = self.recorder.record(&mut self.params.current_balance, unit_price, spent);
        let balance = recorded.entry.balance_after;
        self.emit.send(EngineEvent::TradeLogged(recorded.entry));
        self.emit.send(EngineEvent::BalanceChanged(balance));
        self.debug(format!(
            "LOGGED_TRADE price={} total={} balance={}",
            format_money(unit_price),
            format_money(spent),
            format_money(balance)
        ));
        if let Some(err) = recorded.write_error {
            logger::error_p("engine", &format!("ledger write failed: {}", err));
            self.emit.status(format!("PERSISTENCE_FAILED:{}", err));
            self.emit.send(EngineEvent::PersistenceFailed(err));
        }
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::error::OcrError;
    use crate::recorder::TradeLedgerEntry;
    use crate::types::Region;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Action {
        Move(i32, i32),
        Click(i32, i32),
        Capture(Region),
    }

    /// Platform that records every call into a shared log.
    pub struct RecordingPlatform {
        pub log: Arc<Mutex<Vec<Action>>>,
        cursor: (i32, i32),
        title: Option<String>,
        fail_move_at: Option<usize>,
        moves: usize,
        corner_after_click: Option<usize>,
        clicks: usize,
    }

    impl RecordingPlatform {
        pub fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
                cursor: (960, 540),
                title: Some("Game".into()),
                fail_move_at: None,
                moves: 0,
                corner_after_click: None,
                clicks: 0,
            }
        }

        pub fn cursor(mut self, x: i32, y: i32) -> Self {
            self.cursor = (x, y);
            self
        }

        pub fn title(mut self, title: Option<&str>) -> Self {
            self.title = title.map(str::to_string);
            self
        }

        /// Fail the n-th pointer move (0-based).
        pub fn fail_move_at(mut self, n: usize) -> Self {
            self.fail_move_at = Some(n);
            self
        }

        /// Park the cursor in the bottom-left corner once the n-th click
        /// (1-based) has landed.
        pub fn corner_after_click(mut self, n: usize) -> Self {
            self.corner_after_click = Some(n);
            self
        }
    }

    impl Platform for RecordingPlatform {
        fn screen_size(&self) -> Result<(i32, i32), InputError> {
            Ok((1920, 1080))
        }

        fn cursor_position(&self) -> Result<(i32, i32), InputError> {
            Ok(self.cursor)
        }

        fn move_to(&mut self, x: f64, y: f64) -> Result<(), InputError> {
            let n = self.moves;
            self.moves += 1;
            if self.fail_move_at == Some(n) {
                return Err(InputError::Dispatch("pointer device gone".into()));
            }
            self.cursor = (x.round() as i32, y.round() as i32);
            self.log.lock().unwrap().push(Action::Move(self.cursor.0, self.cursor.1));
            Ok(())
        }

        fn click(&mut self) -> Result<(), InputError> {
            self.log.lock().unwrap().push(Action::Click(self.cursor.0, self.cursor.1));
            self.clicks += 1;
            if self.corner_after_click == Some(self.clicks) {
                self.cursor = (0, 1079);
            }
            Ok(())
        }

        fn capture(&mut self, region: Region) -> Result<RgbaImage, OcrError> {
            self.log.lock().unwrap().push(Action::Capture(region));
            Ok(RgbaImage::from_pixel(region.w as u32, region.h as u32, Rgba([255, 255, 255, 255])))
        }

        fn foreground_title(&self) -> Option<String> {
            self.title.clone()
        }

        fn window_titles(&self) -> Vec<String> {
            self.title.iter().cloned().collect()
        }
    }

    #[derive(Default)]
    pub struct MemoryLedger {
        pub rows: Mutex<Vec<TradeLedgerEntry>>,
    }

    impl LedgerSink for MemoryLedger {
        fn append(&self, entry: &TradeLedgerEntry) -> anyhow::Result<()> {
            self.rows.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    /// Sink whose every append fails.
    pub struct FailingLedger;

    impl LedgerSink for FailingLedger {
        fn append(&self, _entry: &TradeLedgerEntry) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }
    }

    /// Non-overlapping 50x20 regions laid out on one row, one per role.
    pub fn regions_for(method: BuyMethod) -> RegionSet {
        method
            .required_roles()
            .iter()
            .enumerate()
            .fold(RegionSet::new(), |set, (i, role)| {
                set.with(*role, Region::new(100 * (i as i32 + 1), 100, 50, 20))
            })
    }

    /// Roles whose regions contain each click, in click order.
    pub fn clicked_roles(log: &[Action], regions: &RegionSet, method: BuyMethod) -> Vec<RegionRole> {
        log.iter()
            .filter_map(|a| match a {
                Action::Click(x, y) => method.required_roles().iter().copied().find(|r| {
                    regions.get(*r).is_some_and(|g| {
                        *x >= g.x && *x <= g.x + g.w && *y >= g.y && *y <= g.y + g.h
                    })
                }),
                _ => None,
            })
            .collect()
    }

    pub fn zero_delays() -> Delays {
        Delays {
            loop_delay_ms: 0,
            action_delay_ms: 0,
            item_wait_ms: 0,
            close_to_item_ms: 0,
            overlay_dismiss_click_ms: 0,
            post_overlay_wait_ms: 0,
            click_delay_ms: 0,
        }
    }

    pub fn params(method: BuyMethod, max_price: f64, balance: f64) -> RunParams {
        RunParams {
            max_price,
            current_balance: balance,
            balance_floor: 0.0,
            delays: zero_delays(),
            target_window_title: String::new(),
            randomize_clicks: false,
            skip_buy: false,
            skip_max: false,
            buy_method: method,
            buy_amount: 1.0,
        }
    }

    pub fn deps(
        platform: RecordingPlatform,
        ocr: impl OcrEngine + 'static,
        ledger: Arc<dyn LedgerSink>,
    ) -> EngineDeps {
        EngineDeps {
            platform: Box::new(platform),
            ocr: Box::new(ocr),
            ledger,
            input: InputConfig { fail_safe: true, settle_ms: 0 },
        }
    }

    /// Receive until `done` matches an event or `timeout` passes.
    pub fn collect_until(
        rx: &mpsc::Receiver<EngineEvent>,
        timeout: Duration,
        done: impl Fn(&EngineEvent) -> bool,
    ) -> Vec<EngineEvent> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(ev) => {
                    let finished = done(&ev);
                    out.push(ev);
                    if finished {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        out
    }

    pub fn statuses(events: &[EngineEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Status(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn debugs(events: &[EngineEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Debug(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}
