//! Persistent configuration in `settings.json`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::SettingsError;
use crate::logger;
use crate::types::{BuyMethod, Region, RegionRole, RegionSet};

/// Legacy name of `overlay_dismiss_click_ms`.
const LEGACY_OVERLAY_KEY: &str = "buy_overlay_click_ms";

/// Timing knobs in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Delays {
    pub loop_delay_ms: u64,
    pub action_delay_ms: u64,
    pub item_wait_ms: u64,
    pub close_to_item_ms: u64,
    pub overlay_dismiss_click_ms: u64,
    pub post_overlay_wait_ms: u64,
    pub click_delay_ms: u64,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            loop_delay_ms: 700,
            action_delay_ms: 200,
            item_wait_ms: 400,
            close_to_item_ms: 350,
            overlay_dismiss_click_ms: 1,
            post_overlay_wait_ms: 150,
            click_delay_ms: 0,
        }
    }
}

impl Delays {
    pub const KEYS: [&'static str; 7] = [
        "loop_delay_ms",
        "action_delay_ms",
        "item_wait_ms",
        "close_to_item_ms",
        "overlay_dismiss_click_ms",
        "post_overlay_wait_ms",
        "click_delay_ms",
    ];

    fn slot(&mut self, key: &str) -> Option<&mut u64> {
        Some(match key {
            "loop_delay_ms" => &mut self.loop_delay_ms,
            "action_delay_ms" => &mut self.action_delay_ms,
            "item_wait_ms" => &mut self.item_wait_ms,
            "close_to_item_ms" => &mut self.close_to_item_ms,
            "overlay_dismiss_click_ms" => &mut self.overlay_dismiss_click_ms,
            "post_overlay_wait_ms" => &mut self.post_overlay_wait_ms,
            "click_delay_ms" => &mut self.click_delay_ms,
            _ => return None,
        })
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        let mut copy = *self;
        copy.slot(key).map(|v| *v)
    }

    /// Parse the `delays` object. Bad or missing keys keep their defaults.
    fn from_json(raw: Option<&Value>) -> Self {
        let mut delays = Delays::default();
        let Some(obj) = raw.and_then(Value::as_object) else {
            return delays;
        };
        for key in Self::KEYS {
            if let (Some(v), Some(slot)) = (obj.get(key).and_then(as_millis), delays.slot(key)) {
                *slot = v;
            }
        }
        if !obj.contains_key("overlay_dismiss_click_ms") {
            if let Some(v) = obj.get(LEGACY_OVERLAY_KEY).and_then(as_millis) {
                delays.overlay_dismiss_click_ms = v;
            }
        }
        delays
    }
}

/// Integer-ish JSON value as a non-negative millisecond count.
fn as_millis(value: &Value) -> Option<u64> {
    let n = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Some(n.max(0) as u64)
}

/// Numeric settings addressable through `numeric`/`set_numeric`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    MinPrice,
    MaxPrice,
    BalanceFloor,
    CurrentBalance,
    BulkMaxPrice,
    BulkBuyAmount,
}

impl NumericField {
    pub const ALL: [NumericField; 6] = [
        NumericField::MinPrice,
        NumericField::MaxPrice,
        NumericField::BalanceFloor,
        NumericField::CurrentBalance,
        NumericField::BulkMaxPrice,
        NumericField::BulkBuyAmount,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            NumericField::MinPrice => "min_price",
            NumericField::MaxPrice => "max_price",
            NumericField::BalanceFloor => "balance_floor",
            NumericField::CurrentBalance => "current_balance",
            NumericField::BulkMaxPrice => "bulk_max_price",
            NumericField::BulkBuyAmount => "bulk_buy_amount",
        }
    }

    fn default_value(&self) -> f64 {
        match self {
            NumericField::BulkBuyAmount => 1.0,
            _ => 0.0,
        }
    }
}

#[derive(Serialize)]
struct Document<'a> {
    rois: BTreeMap<&'static str, BTreeMap<&'static str, Option<Region>>>,
    min_price: f64,
    max_price: f64,
    balance_floor: f64,
    current_balance: f64,
    target_window: &'a str,
    buy_method: &'static str,
    bulk_max_price: f64,
    bulk_buy_amount: f64,
    delays: Delays,
}

/// Region layout, prices, target window and delays, written back to disk on
/// every change.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    regions: HashMap<BuyMethod, RegionSet>,
    numbers: HashMap<&'static str, f64>,
    target_window: String,
    buy_method: BuyMethod,
    delays: Delays,
}

impl SettingsStore {
    fn defaults(path: PathBuf) -> Self {
        Self {
            path,
            regions: BuyMethod::ALL.iter().map(|m| (*m, RegionSet::new())).collect(),
            numbers: NumericField::ALL.iter().map(|f| (f.key(), f.default_value())).collect(),
            target_window: String::new(),
            buy_method: BuyMethod::Simple,
            delays: Delays::default(),
        }
    }

    /// Load `path`. A missing file is created with defaults. Unreadable JSON
    /// is moved aside to `<stem>.corrupt.json` and replaced by defaults.
    pub fn load(path: &Path) -> Self {
        let mut store = Self::defaults(path.to_path_buf());

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                store.save_or_warn();
                return store;
            }
            Err(e) => {
                logger::warn(&format!("reading {}: {}, using defaults", path.display(), e));
                return store;
            }
        };

        let raw = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(obj)) => obj,
            Ok(_) | Err(_) => {
                let backup = path.with_extension("corrupt.json");
                match fs::rename(path, &backup) {
                    Ok(()) => logger::warn(&format!(
                        "settings unreadable, moved to {}",
                        backup.display()
                    )),
                    Err(e) => logger::warn(&format!("moving corrupt settings aside: {}", e)),
                }
                store.save_or_warn();
                return store;
            }
        };

        store.apply(&raw);
        store
    }

    fn apply(&mut self, raw: &Map<String, Value>) {
        let rois = raw.get("rois").and_then(Value::as_object);
        let grouped = rois.is_some_and(|r| {
            BuyMethod::ALL.iter().all(|m| r.get(m.as_str()).is_some_and(Value::is_object))
        });

        for method in BuyMethod::ALL {
            let group = match (rois, grouped) {
                (Some(r), true) => r.get(method.as_str()).and_then(Value::as_object),
                // Flat pre-bulk layout belongs to the simple group.
                (Some(r), false) if method == BuyMethod::Simple => Some(r),
                _ => None,
            };
            let mut set = RegionSet::new();
            for role in method.required_roles() {
                if let Some(region) = group.and_then(|g| g.get(role.as_str())).and_then(region_from_json) {
                    set.insert(*role, region);
                }
            }
            self.regions.insert(method, set);
        }

        for field in NumericField::ALL {
            if let Some(v) = raw.get(field.key()).and_then(number_from_json) {
                self.numbers.insert(field.key(), v);
            }
        }
        if let Some(title) = raw.get("target_window").and_then(Value::as_str) {
            self.target_window = title.trim().to_string();
        }
        if let Some(method) = raw.get("buy_method").and_then(Value::as_str) {
            self.buy_method = BuyMethod::normalize(method);
        }
        self.delays = Delays::from_json(raw.get("delays"));
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write through `<stem>.tmp` and rename over the real file.
    pub fn save(&self) -> Result<(), SettingsError> {
        let rois = BuyMethod::ALL
            .iter()
            .map(|m| {
                let set = self.regions(*m);
                let group: BTreeMap<_, _> = m
                    .required_roles()
                    .iter()
                    .map(|r| (r.as_str(), set.get(*r).filter(Region::is_valid)))
                    .collect();
                (m.as_str(), group)
            })
            .collect();
        let doc = Document {
            rois,
            min_price: self.numeric(NumericField::MinPrice),
            max_price: self.numeric(NumericField::MaxPrice),
            balance_floor: self.numeric(NumericField::BalanceFloor),
            current_balance: self.numeric(NumericField::CurrentBalance),
            target_window: &self.target_window,
            buy_method: self.buy_method.as_str(),
            bulk_max_price: self.numeric(NumericField::BulkMaxPrice),
            bulk_buy_amount: self.numeric(NumericField::BulkBuyAmount),
            delays: self.delays,
        };
        let json = serde_json::to_string_pretty(&doc)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn save_or_warn(&self) {
        if let Err(e) = self.save() {
            logger::warn(&format!("writing {}: {}", self.path.display(), e));
        }
    }

    fn check_role(role: RegionRole, method: BuyMethod) -> Result<(), SettingsError> {
        if method.required_roles().contains(&role) {
            Ok(())
        } else {
            Err(SettingsError::UnknownRegion { role, method })
        }
    }

    pub fn get_region(&self, role: RegionRole, method: BuyMethod) -> Option<Region> {
        self.regions.get(&method).and_then(|s| s.get(role)).filter(Region::is_valid)
    }

    pub fn set_region(
        &mut self,
        role: RegionRole,
        region: Region,
        method: BuyMethod,
    ) -> Result<(), SettingsError> {
        Self::check_role(role, method)?;
        let set = self.regions.entry(method).or_default();
        if region.is_valid() {
            set.insert(role, region);
        } else {
            set.remove(role);
        }
        self.save()
    }

    pub fn reset_region(&mut self, role: RegionRole, method: BuyMethod) -> Result<(), SettingsError> {
        Self::check_role(role, method)?;
        self.regions.entry(method).or_default().remove(role);
        self.save()
    }

    pub fn regions(&self, method: BuyMethod) -> RegionSet {
        self.regions.get(&method).cloned().unwrap_or_default()
    }

    pub fn missing_regions(&self, method: BuyMethod) -> Vec<RegionRole> {
        self.regions(method).missing(method)
    }

    pub fn all_regions_ready(&self, method: BuyMethod) -> bool {
        self.missing_regions(method).is_empty()
    }

    pub fn numeric(&self, field: NumericField) -> f64 {
        self.numbers.get(field.key()).copied().unwrap_or_else(|| field.default_value())
    }

    pub fn set_numeric(&mut self, field: NumericField, value: f64) -> Result<(), SettingsError> {
        self.numbers.insert(field.key(), value);
        self.save()
    }

    pub fn target_window(&self) -> &str {
        &self.target_window
    }

    pub fn set_target_window(&mut self, title: &str) -> Result<(), SettingsError> {
        self.target_window = title.trim().to_string();
        self.save()
    }

    pub fn buy_method(&self) -> BuyMethod {
        self.buy_method
    }

    pub fn set_buy_method(&mut self, method: BuyMethod) -> Result<(), SettingsError> {
        self.buy_method = method;
        self.save()
    }

    pub fn delays(&self) -> Delays {
        self.delays
    }

    /// Negative values clamp to zero.
    pub fn set_delay(&mut self, key: &str, value: i64) -> Result<(), SettingsError> {
        let slot = self
            .delays
            .slot(key)
            .ok_or_else(|| SettingsError::UnknownDelay(key.to_string()))?;
        *slot = value.max(0) as u64;
        self.save()
    }

    pub fn reset_delays(&mut self) -> Result<Delays, SettingsError> {
        self.delays = Delays::default();
        self.save()?;
        Ok(self.delays)
    }
}

fn region_from_json(value: &Value) -> Option<Region> {
    let parts = value.as_array()?;
    if parts.len() != 4 {
        return None;
    }
    let mut xywh = [0i32; 4];
    for (slot, part) in xywh.iter_mut().zip(parts) {
        *slot = match part {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))? as i32,
            _ => return None,
        };
    }
    Some(Region::from(xywh)).filter(Region::is_valid)
}

fn number_from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::load(&dir.path().join("settings.json"))
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.path().exists());
        assert_eq!(store.buy_method(), BuyMethod::Simple);
        assert_eq!(store.numeric(NumericField::BulkBuyAmount), 1.0);
        assert_eq!(store.delays(), Delays::default());

        let raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert!(raw["rois"]["bulk"]["confirm"].is_null());
        assert_eq!(raw["delays"]["item_wait_ms"], 400);
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::load(&path);
        assert_eq!(store.numeric(NumericField::MaxPrice), 0.0);
        let backup = dir.path().join("settings.corrupt.json");
        assert_eq!(fs::read_to_string(backup).unwrap(), "{ not json");
        let rewritten: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten["buy_method"], "simple");
    }

    #[test]
    fn test_legacy_flat_rois_map_to_simple() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"rois": {"item": [1, 2, 30, 40], "price": [5, 5, 0, 10], "confirm": [1, 1, 9, 9]},
                "max_price": 120.5}"#,
        )
        .unwrap();

        let store = SettingsStore::load(&path);
        assert_eq!(store.get_region(RegionRole::Item, BuyMethod::Simple), Some(Region::new(1, 2, 30, 40)));
        assert_eq!(store.get_region(RegionRole::Price, BuyMethod::Simple), None);
        assert_eq!(store.get_region(RegionRole::Confirm, BuyMethod::Bulk), None);
        assert_eq!(store.numeric(NumericField::MaxPrice), 120.5);
    }

    #[test]
    fn test_legacy_overlay_delay_and_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"delays": {"buy_overlay_click_ms": 80, "item_wait_ms": "oops", "click_delay_ms": "25"}}"#,
        )
        .unwrap();

        let delays = SettingsStore::load(&path).delays();
        assert_eq!(delays.overlay_dismiss_click_ms, 80);
        assert_eq!(delays.item_wait_ms, 400);
        assert_eq!(delays.click_delay_ms, 25);
    }

    #[test]
    fn test_region_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.set_region(RegionRole::Confirm, Region::new(10, 20, 30, 40), BuyMethod::Bulk).unwrap();
        store.set_target_window("  Game Client ").unwrap();
        store.set_buy_method(BuyMethod::Bulk).unwrap();

        let reloaded = store_in(&dir);
        assert_eq!(
            reloaded.get_region(RegionRole::Confirm, BuyMethod::Bulk),
            Some(Region::new(10, 20, 30, 40))
        );
        assert_eq!(reloaded.target_window(), "Game Client");
        assert_eq!(reloaded.buy_method(), BuyMethod::Bulk);
        assert!(!dir.path().join("settings.tmp").exists());
    }

    #[test]
    fn test_unknown_region_for_method() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let err = store
            .set_region(RegionRole::Item, Region::new(0, 0, 5, 5), BuyMethod::Bulk)
            .unwrap_err();
        assert!(matches!(err, SettingsError::UnknownRegion { role: RegionRole::Item, .. }));
    }

    #[test]
    fn test_missing_regions_in_required_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        for role in [RegionRole::Confirm, RegionRole::Buy, RegionRole::Price] {
            store.set_region(role, Region::new(0, 0, 8, 8), BuyMethod::Bulk).unwrap();
        }
        assert_eq!(
            store.missing_regions(BuyMethod::Bulk),
            vec![RegionRole::Cancel, RegionRole::Balance]
        );
        store.reset_region(RegionRole::Confirm, BuyMethod::Bulk).unwrap();
        assert!(!store.all_regions_ready(BuyMethod::Bulk));
        assert_eq!(store.missing_regions(BuyMethod::Bulk)[0], RegionRole::Confirm);
    }

    #[test]
    fn test_set_delay_clamps_and_rejects_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.set_delay("click_delay_ms", -50).unwrap();
        assert_eq!(store.delays().click_delay_ms, 0);
        store.set_delay("loop_delay_ms", 900).unwrap();
        assert_eq!(store.delays().get("loop_delay_ms"), Some(900));
        assert!(matches!(store.set_delay("nope", 1), Err(SettingsError::UnknownDelay(_))));
        assert_eq!(store.reset_delays().unwrap(), Delays::default());
    }
}
