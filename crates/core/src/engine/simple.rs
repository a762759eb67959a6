use std::time::Instant;

use anyhow::Result;

use super::*;

impl Engine {
    /// Item → price → close-or-buy cycle until stopped.
    pub(super) fn simple_loop(&mut self) -> Result<()> {
        self.emit.status(STATUS_IDLE);
        self.debug("STATE -> IDLE");

        while !self.stopped() {
            if !self.ensure_focus() {
                self.sleep(FOCUS_RETRY_MS);
                continue;
            }
            let started = Instant::now();
            let event = match self.st.state {
                State::Idle => {
                    if self.sleep(self.params.delays.loop_delay_ms) {
                        Event::Stop
                    } else {
                        Event::DelayElapsed
                    }
                }
                State::ClickItem => self.click_item(),
                State::CheckPrice => self.check_price(),
                State::OutOfRangeClose => self.close_out_of_range(),
                State::Wait => {
                    self.emit.status(STATUS_WAIT);
                    if self.sleep(self.params.delays.loop_delay_ms) {
                        Event::Stop
                    } else {
                        Event::DelayElapsed
                    }
                }
                State::InRangeExecute => self.execute_in_range(),
                State::Stopped => break,
            };
            let from = self.st.state;
            self.advance(event);
            self.report(from, event, started);
        }

        self.advance(Event::Stop);
        self.emit.status(STATUS_STOPPED);
        Ok(())
    }

    /// Timing line for the state that just ran.
    fn report(&self, from: State, event: Event, started: Instant) {
        match (from, event) {
            (State::ClickItem, Event::ItemReady) | (State::OutOfRangeClose, Event::CloseDone) => {
                self.debug_timed(format!("{} complete", from.as_str()), started, vec![]);
            }
            (State::CheckPrice, Event::PriceRead { price: Some(p), .. }) => {
                self.debug_timed("CHECK_PRICE complete", started, vec![("price", format_money(p))]);
            }
            (State::InRangeExecute, Event::BuyPlaced) => {
                let fmt = |v: Option<f64>| v.filter(|v| *v != 0.0).map(format_money).unwrap_or_default();
                self.debug_timed(
                    "IN_RANGE_EXECUTE iteration complete",
                    started,
                    vec![("price", fmt(self.st.latest_price)), ("total", fmt(self.st.latest_total))],
                );
            }
            _ => {}
        }
    }

    fn click_item(&mut self) -> Event {
        if self.st.should_click_item && !self.click(RegionRole::Item) {
            self.sleep(self.params.delays.loop_delay_ms);
            return Event::ItemClickFailed;
        }
        if self.sleep(self.params.delays.item_wait_ms) {
            return Event::Stop;
        }
        Event::ItemReady
    }

    fn check_price(&mut self) -> Event {
        let price = self.read_value(RegionRole::Price, "PRICE", 3);
        if self.stopped() {
            return Event::Stop;
        }
        if price.is_none() {
            self.debug("PRICE read failed, restarting loop.");
        }
        Event::PriceRead { price, max_price: self.params.max_price }
    }

    fn close_out_of_range(&mut self) -> Event {
        if !self.click(RegionRole::Close) {
            self.sleep(self.params.delays.loop_delay_ms);
        }
        if self.sleep(self.params.delays.close_to_item_ms) {
            return Event::Stop;
        }
        Event::CloseDone
    }

    /// One buy-spam iteration. Returns `BuyPlaced` to run again immediately.
    /// A stop seen before the buy click abandons the iteration; one seen after
    /// it still books the purchase that was placed.
    fn execute_in_range(&mut self) -> Event {
        if self.params.current_balance <= self.params.balance_floor {
            self.emit.status(STATUS_FLOOR_REACHED);
            return Event::FloorReached;
        }

        if !self.params.skip_max && !self.st.max_clicked {
            if !self.click(RegionRole::Max) {
                return Event::ActionFailed;
            }
            self.st.max_clicked = true;
            if self.sleep(self.params.delays.action_delay_ms) {
                return Event::Stop;
            }
        }

        if self.st.latest_total.is_none() {
            let total = match self.read_value(RegionRole::Total, "TOTAL", 1) {
                Some(total) => total,
                None => {
                    let fallback = self.st.latest_price.unwrap_or(0.0);
                    self.debug(format!(
                        "TOTAL read failed, using fallback value {}",
                        format_money(fallback)
                    ));
                    fallback
                }
            };
            self.st.latest_total = Some(total);
        }
        if self.stopped() {
            return Event::Stop;
        }

        if self.params.skip_buy {
            self.debug("SKIP_BUY enabled, not clicking buy.");
        } else if !self.click(RegionRole::Buy) {
            return Event::ActionFailed;
        }
        if self.sleep(self.params.delays.overlay_dismiss_click_ms.max(1)) {
            self.book_trade();
            return Event::Stop;
        }

        match self.read_value(RegionRole::Price, "PRICE", 1) {
            Some(price) => {
                self.st.latest_price = Some(price);
                if price > self.params.max_price {
                    self.debug("Price left range during buy spam, closing.");
                    self.click(RegionRole::Close);
                    self.sleep(self.params.delays.close_to_item_ms);
                    return Event::LeftRange;
                }
            }
            None => self.debug("PRICE read failed during buy spam; continuing."),
        }

        self.book_trade();
        Event::BuyPlaced
    }

    fn book_trade(&mut self) {
        if let (Some(price), Some(total)) = (self.st.latest_price, self.st.latest_total) {
            self.log_trade(price, total);
        }
        self.emit.status(STATUS_BUY_PLACED);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use super::super::testkit::*;
    use super::*;
    use crate::ocr::ScriptedOcr;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn is_status(e: &EngineEvent, s: &str) -> bool {
        matches!(e, EngineEvent::Status(got) if got == s)
    }

    #[test]
    fn test_out_of_range_then_buy_spam_until_floor() {
        let regions = regions_for(BuyMethod::Simple);
        let platform = RecordingPlatform::new();
        let log = platform.log.clone();
        let ledger = Arc::new(MemoryLedger::default());
        // check ×3 (150) → close; check ×3 (80) → total 160 → re-check 80;
        // second spam pass re-check 80; afterwards reads come back empty.
        let ocr = ScriptedOcr::once(["150", "150", "150", "80", "80", "80", "160", "80", "80"]);
        let (tx, rx) = mpsc::channel();
        let handle = start(
            regions.clone(),
            params(BuyMethod::Simple, 100.0, 300.0),
            deps(platform, ocr, ledger.clone()),
            tx,
        );

        let events = collect_until(&rx, TIMEOUT, |e| is_status(e, STATUS_FLOOR_REACHED));
        handle.stop();
        let tail = collect_until(&rx, TIMEOUT, |e| *e == EngineEvent::Finished);
        handle.join();

        let clicks = clicked_roles(&log.lock().unwrap(), &regions, BuyMethod::Simple);
        use RegionRole::*;
        assert_eq!(clicks[..6], [Item, Close, Item, Max, Buy, Buy]);

        let rows = ledger.rows.lock().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].unit_price, rows[0].spent, rows[0].balance_after), (80.0, 160.0, 140.0));
        assert_eq!(rows[1].balance_after, 0.0);

        let notes = debugs(&events);
        let states: Vec<&str> = notes.iter().filter_map(|d| d.strip_prefix("STATE -> ")).collect();
        assert_eq!(
            states[..8],
            ["IDLE", "CLICK_ITEM", "CHECK_PRICE", "OUT_OF_RANGE_CLOSE", "WAIT", "CLICK_ITEM", "CHECK_PRICE", "IN_RANGE_EXECUTE"]
        );
        assert!(notes.iter().any(|d| d == "LOGGED_TRADE price=80 total=160 balance=140"));

        let seen = statuses(&events);
        assert!(seen.contains(&"PRICE:150".to_string()));
        assert!(seen.contains(&"TOTAL:160".to_string()));
        assert_eq!(seen.iter().filter(|s| *s == STATUS_BUY_PLACED).count(), 2);

        let balances: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::BalanceChanged(b) => Some(*b),
                _ => None,
            })
            .collect();
        assert_eq!(balances, vec![140.0, 0.0]);

        let tail_statuses = statuses(&tail);
        assert_eq!(tail_statuses[tail_statuses.len() - 2..], [STATUS_STOPPED, STATUS_IDLE]);
    }

    #[test]
    fn test_skip_flags_still_record_with_fallback_total() {
        let regions = regions_for(BuyMethod::Simple);
        let platform = RecordingPlatform::new();
        let log = platform.log.clone();
        let ledger = Arc::new(MemoryLedger::default());
        // price ×3, total unreadable, re-check price
        let ocr = ScriptedOcr::once(["90", "90", "90", "?", "90"]);
        let mut p = params(BuyMethod::Simple, 100.0, 1_000.0);
        p.skip_buy = true;
        p.skip_max = true;
        let (tx, rx) = mpsc::channel();
        let handle = start(regions.clone(), p, deps(platform, ocr, ledger.clone()), tx);

        let events = collect_until(&rx, TIMEOUT, |e| matches!(e, EngineEvent::TradeLogged(_)));
        handle.stop();
        handle.join();

        let clicks = clicked_roles(&log.lock().unwrap(), &regions, BuyMethod::Simple);
        assert!(!clicks.is_empty());
        assert!(clicks.iter().all(|r| *r == RegionRole::Item), "{:?}", clicks);
        let rows = ledger.rows.lock().unwrap();
        assert_eq!((rows[0].unit_price, rows[0].spent), (90.0, 90.0));

        let notes = debugs(&events);
        assert!(notes.iter().any(|d| d == "TOTAL read failed, using fallback value 90"));
        assert!(notes.iter().any(|d| d == "SKIP_BUY enabled, not clicking buy."));
        assert!(statuses(&events).contains(&"TOTAL_READ_FAIL (?)".to_string()));
    }

    #[test]
    fn test_price_leaving_range_mid_spam_closes() {
        let regions = regions_for(BuyMethod::Simple);
        let platform = RecordingPlatform::new();
        let log = platform.log.clone();
        let ledger = Arc::new(MemoryLedger::default());
        let ocr = ScriptedOcr::once(["50", "50", "50", "50", "130"]);
        let (tx, rx) = mpsc::channel();
        let handle = start(
            regions.clone(),
            params(BuyMethod::Simple, 100.0, 1_000.0),
            deps(platform, ocr, ledger.clone()),
            tx,
        );

        let events = collect_until(&rx, TIMEOUT, |e| is_status(e, STATUS_WAIT));
        handle.stop();
        handle.join();

        let clicks = clicked_roles(&log.lock().unwrap(), &regions, BuyMethod::Simple);
        use RegionRole::*;
        assert_eq!(clicks[..4], [Item, Max, Buy, Close]);
        assert!(ledger.rows.lock().unwrap().is_empty());
        assert!(debugs(&events).iter().any(|d| d == "Price left range during buy spam, closing."));
    }

    #[test]
    fn test_focus_loss_pauses_without_clicking() {
        let regions = regions_for(BuyMethod::Simple);
        let platform = RecordingPlatform::new().title(Some("Terminal"));
        let log = platform.log.clone();
        let ledger = Arc::new(MemoryLedger::default());
        let mut p = params(BuyMethod::Simple, 100.0, 1_000.0);
        p.target_window_title = "Game".into();
        let (tx, rx) = mpsc::channel();
        let handle = start(regions, p, deps(platform, ScriptedOcr::once(["1"]), ledger), tx);

        std::thread::sleep(Duration::from_millis(450));
        handle.stop();
        let events = collect_until(&rx, TIMEOUT, |e| *e == EngineEvent::Finished);
        handle.join();

        assert!(log.lock().unwrap().is_empty());
        let waits = statuses(&events)
            .iter()
            .filter(|s| *s == crate::input::STATUS_WAITING_FOR_FOCUS)
            .count();
        assert_eq!(waits, 1);
    }

    fn is_click_on(e: &EngineEvent, role: &str) -> bool {
        matches!(e, EngineEvent::Debug(d) if d.starts_with(&format!("CLICK {} ", role)))
    }

    #[test]
    fn test_stop_during_max_delay_skips_buy() {
        let regions = regions_for(BuyMethod::Simple);
        let platform = RecordingPlatform::new();
        let log = platform.log.clone();
        let ledger = Arc::new(MemoryLedger::default());
        let mut p = params(BuyMethod::Simple, 100.0, 1_000.0);
        p.delays.action_delay_ms = 5_000;
        let (tx, rx) = mpsc::channel();
        let handle = start(regions.clone(), p, deps(platform, ScriptedOcr::cycle(["80"]), ledger.clone()), tx);

        collect_until(&rx, TIMEOUT, |e| is_click_on(e, "max"));
        let requested = Instant::now();
        handle.stop();
        let tail = collect_until(&rx, TIMEOUT, |e| *e == EngineEvent::Finished);
        let elapsed = requested.elapsed();
        handle.join();

        assert!(elapsed < Duration::from_millis(200), "stop took {:?}", elapsed);
        let actions = log.lock().unwrap();
        use RegionRole::*;
        assert_eq!(clicked_roles(&actions, &regions, BuyMethod::Simple), vec![Item, Max]);
        // the three price samples only; no total read after the stop
        assert_eq!(actions.iter().filter(|a| matches!(a, Action::Capture(_))).count(), 3);
        assert!(ledger.rows.lock().unwrap().is_empty());
        let seen = statuses(&tail);
        assert_eq!(seen[seen.len() - 2..], [STATUS_STOPPED, STATUS_IDLE]);
    }

    #[test]
    fn test_stop_after_buy_click_still_books_trade() {
        let regions = regions_for(BuyMethod::Simple);
        let platform = RecordingPlatform::new();
        let log = platform.log.clone();
        let ledger = Arc::new(MemoryLedger::default());
        let mut p = params(BuyMethod::Simple, 100.0, 1_000.0);
        p.delays.overlay_dismiss_click_ms = 5_000;
        let (tx, rx) = mpsc::channel();
        let handle = start(regions.clone(), p, deps(platform, ScriptedOcr::cycle(["80"]), ledger.clone()), tx);

        collect_until(&rx, TIMEOUT, |e| is_click_on(e, "buy"));
        handle.stop();
        let tail = collect_until(&rx, TIMEOUT, |e| *e == EngineEvent::Finished);
        handle.join();

        let actions = log.lock().unwrap();
        use RegionRole::*;
        assert_eq!(clicked_roles(&actions, &regions, BuyMethod::Simple), vec![Item, Max, Buy]);
        // price x3 and total; the post-buy price check is skipped
        assert_eq!(actions.iter().filter(|a| matches!(a, Action::Capture(_))).count(), 4);

        let rows = ledger.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].unit_price, rows[0].spent, rows[0].balance_after), (80.0, 80.0, 920.0));
        let seen = statuses(&tail);
        assert_eq!(seen[seen.len() - 3..], [STATUS_BUY_PLACED, STATUS_STOPPED, STATUS_IDLE]);
    }
}
