use anyhow::Result;

use super::*;

/// Extra pre-click pause on confirm after the previous attempt cancelled.
const CONFIRM_AFTER_CANCEL_MS: u64 = 250;
/// Re-reads of the price when the first bulk read finds nothing.
const PRICE_RETRIES: u32 = 2;

/// Spend ceiling for the whole bulk lot.
pub fn bulk_target(max_price: f64, buy_amount: f64) -> f64 {
    max_price * buy_amount.max(1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BulkDecision {
    /// No price could be read; cancel and go around again.
    Retry,
    /// Lot costs more than the target; cancel and back off.
    Cancel { price: f64 },
    Buy { unit_price: f64, total: f64 },
}

pub fn decide_bulk(price: Option<f64>, target: f64, buy_amount: f64) -> BulkDecision {
    match price {
        None => BulkDecision::Retry,
        Some(p) if p > target => BulkDecision::Cancel { price: p },
        Some(p) => BulkDecision::Buy { unit_price: p / buy_amount.max(1.0), total: p },
    }
}

impl Engine {
    /// Confirm → read lot price → cancel or buy. Ends after one purchase.
    /// Every pause and the hover re-check the stop flag, so a stop or the
    /// fail-safe never leads to a later click.
    pub(super) fn bulk_loop(&mut self) -> Result<()> {
        let delays = self.params.delays;
        let target = bulk_target(self.params.max_price, self.params.buy_amount);
        self.emit.status(STATUS_BULK_READY);
        self.debug(format!("BULK target price {}", format_money(target)));

        while !self.stopped() {
            if !self.ensure_focus() {
                self.sleep(FOCUS_RETRY_MS);
                continue;
            }

            let extra_delay_ms = if std::mem::take(&mut self.st.pending_confirm_delay) {
                CONFIRM_AFTER_CANCEL_MS
            } else {
                0
            };
            let opts = ClickOptions { force_center: false, extra_delay_ms };
            if !self.click_region(RegionRole::Confirm, opts) {
                self.sleep(delays.loop_delay_ms);
                continue;
            }
            if self.sleep(delays.item_wait_ms) {
                break;
            }
            // Be over cancel before the OCR result is in.
            self.hover(RegionRole::Cancel)?;
            if self.stopped() {
                break;
            }

            let mut price = self.read_value(RegionRole::Price, "PRICE", 1);
            let mut retries = PRICE_RETRIES;
            while price.is_none() && retries > 0 {
                if self.sleep((delays.action_delay_ms / 2).max(1)) {
                    break;
                }
                price = self.read_value(RegionRole::Price, "PRICE", 1);
                retries -= 1;
            }
            if self.stopped() {
                break;
            }

            match decide_bulk(price, target, self.params.buy_amount) {
                BulkDecision::Retry => {
                    self.debug("BULK price read failed; retrying from confirm.");
                    self.click(RegionRole::Cancel);
                    self.sleep(delays.action_delay_ms);
                    self.st.pending_confirm_delay = true;
                }
                BulkDecision::Cancel { price } => {
                    self.debug_with(
                        "BULK price above target",
                        vec![("price", format_money(price)), ("target", format_money(target))],
                    );
                    self.click(RegionRole::Cancel);
                    self.sleep(delays.action_delay_ms);
                    self.sleep(delays.action_delay_ms);
                    self.st.pending_confirm_delay = true;
                }
                BulkDecision::Buy { unit_price, total } => {
                    if self.click(RegionRole::Buy) {
                        self.debug_with(
                            "BULK_BUY_EXECUTED",
                            vec![
                                ("unit_price", format_money(unit_price)),
                                ("total_price", format_money(total)),
                            ],
                        );
                        self.log_trade(unit_price, total);
                        self.emit.status(STATUS_BUY_PLACED);
                        break;
                    }
                    self.sleep(delays.action_delay_ms);
                }
            }
        }

        self.emit.status(STATUS_STOPPED);
        self.debug("BULK loop finished");
        self.debug("STATE -> STOPPED");
        Ok(())
    }
}
