//! Trade bookkeeping: balance deduction plus the append-only CSV ledger.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub const LEDGER_HEADER: &str = "timestamp,price,spent,balance_after";

/// One executed trade. Never modified after it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeLedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub unit_price: f64,
    pub spent: f64,
    pub balance_after: f64,
}

impl TradeLedgerEntry {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{:.2},{:.2},{:.2}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
            self.unit_price,
            self.spent,
            self.balance_after
        )
    }
}

/// Append-only destination for ledger rows.
pub trait LedgerSink: Send + Sync {
    fn append(&self, entry: &TradeLedgerEntry) -> Result<()>;
}

/// `trades.csv` writer. Appends are serialized through a lock and flushed
/// before returning.
pub struct CsvLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvLedger {
    /// Open the ledger in `dir`, writing the header if the file is missing
    /// or empty.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("trades.csv");
        let has_rows = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        if !has_rows {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            fs::write(&path, format!("{}\n", LEDGER_HEADER))
                .with_context(|| format!("writing header to {}", path.display()))?;
        }
        Ok(Self { path, lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerSink for CsvLedger {
    fn append(&self, entry: &TradeLedgerEntry) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("ledger lock poisoned"))?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{}", entry.to_csv_row())?;
        file.flush()?;
        Ok(())
    }
}

/// Result of recording a trade. The balance change stands even when the
/// ledger write failed.
#[derive(Debug)]
pub struct Recorded {
    pub entry: TradeLedgerEntry,
    pub write_error: Option<String>,
}

pub struct TradeRecorder {
    sink: Arc<dyn LedgerSink>,
}

impl TradeRecorder {
    pub fn new(sink: Arc<dyn LedgerSink>) -> Self {
        Self { sink }
    }

    /// Deduct `spent` from `balance` (never below zero) and append the row.
    pub fn record(&self, balance: &mut f64, unit_price: f64, spent: f64) -> Recorded {
        *balance = (*balance - spent).max(0.0);
        let entry = TradeLedgerEntry {
            timestamp: Utc::now(),
            unit_price,
            spent,
            balance_after: *balance,
        };
        let write_error = self.sink.append(&entry).err().map(|e| format!("{:#}", e));
        Recorded { entry, write_error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl LedgerSink for FailingSink {
        fn append(&self, _entry: &TradeLedgerEntry) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    #[test]
    fn test_balance_never_negative() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = TradeRecorder::new(Arc::new(CsvLedger::open(dir.path()).unwrap()));
        let mut balance = 1_000.0;
        for spent in [400.0, 400.0, 400.0, 400.0] {
            let rec = recorder.record(&mut balance, 100.0, spent);
            assert!(rec.entry.balance_after >= 0.0);
            assert!(balance >= 0.0);
        }
        assert_eq!(balance, 0.0);
    }

    #[test]
    fn test_ledger_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(CsvLedger::open(dir.path()).unwrap());
        let recorder = TradeRecorder::new(ledger.clone());
        let mut balance = 10_000.0;
        recorder.record(&mut balance, 96.0, 4_800.0);
        recorder.record(&mut balance, 50.5, 101.0);

        let text = fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], LEDGER_HEADER);
        assert!(lines[1].ends_with(",96.00,4800.00,5200.00"), "{}", lines[1]);
        assert!(lines[2].ends_with(",50.50,101.00,5099.00"), "{}", lines[2]);
    }

    #[test]
    fn test_reopen_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let recorder = TradeRecorder::new(Arc::new(CsvLedger::open(dir.path()).unwrap()));
            let mut balance = 100.0;
            recorder.record(&mut balance, 10.0, 10.0);
        }
        let ledger = CsvLedger::open(dir.path()).unwrap();
        let text = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(text.matches(LEDGER_HEADER).count(), 1);
    }

    #[test]
    fn test_write_failure_keeps_deduction() {
        let recorder = TradeRecorder::new(Arc::new(FailingSink));
        let mut balance = 500.0;
        let rec = recorder.record(&mut balance, 10.0, 200.0);
        assert_eq!(balance, 300.0);
        assert_eq!(rec.write_error.as_deref(), Some("disk full"));
    }
}
