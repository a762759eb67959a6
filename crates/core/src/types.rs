use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Screen-coordinate rectangle a role is clicked or read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_valid(&self) -> bool {
        self.w > 0 && self.h > 0
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.w as f64 / 2.0,
            self.y as f64 + self.h as f64 / 2.0,
        )
    }
}

impl From<[i32; 4]> for Region {
    fn from([x, y, w, h]: [i32; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<Region> for [i32; 4] {
    fn from(r: Region) -> Self {
        [r.x, r.y, r.w, r.h]
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x:{} y:{} w:{} h:{}", self.x, self.y, self.w, self.h)
    }
}

/// Logical role of a screen region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionRole {
    Item,
    Price,
    Total,
    Max,
    Buy,
    Close,
    Balance,
    Confirm,
    Cancel,
}

impl RegionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionRole::Item => "item",
            RegionRole::Price => "price",
            RegionRole::Total => "total",
            RegionRole::Max => "max",
            RegionRole::Buy => "buy",
            RegionRole::Close => "close",
            RegionRole::Balance => "balance",
            RegionRole::Confirm => "confirm",
            RegionRole::Cancel => "cancel",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "item" => RegionRole::Item,
            "price" => RegionRole::Price,
            "total" => RegionRole::Total,
            "max" => RegionRole::Max,
            "buy" => RegionRole::Buy,
            "close" => RegionRole::Close,
            "balance" => RegionRole::Balance,
            "confirm" => RegionRole::Confirm,
            "cancel" => RegionRole::Cancel,
            _ => return None,
        })
    }
}

impl fmt::Display for RegionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purchase flow the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuyMethod {
    #[default]
    Simple,
    Bulk,
}

const SIMPLE_ROLES: &[RegionRole] = &[
    RegionRole::Item,
    RegionRole::Price,
    RegionRole::Total,
    RegionRole::Max,
    RegionRole::Buy,
    RegionRole::Close,
    RegionRole::Balance,
];

const BULK_ROLES: &[RegionRole] = &[
    RegionRole::Confirm,
    RegionRole::Cancel,
    RegionRole::Buy,
    RegionRole::Balance,
    RegionRole::Price,
];

impl BuyMethod {
    pub const ALL: [BuyMethod; 2] = [BuyMethod::Simple, BuyMethod::Bulk];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuyMethod::Simple => "simple",
            BuyMethod::Bulk => "bulk",
        }
    }

    /// Unknown names fall back to `Simple`.
    pub fn normalize(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "bulk" => BuyMethod::Bulk,
            _ => BuyMethod::Simple,
        }
    }

    pub fn required_roles(&self) -> &'static [RegionRole] {
        match self {
            BuyMethod::Simple => SIMPLE_ROLES,
            BuyMethod::Bulk => BULK_ROLES,
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            BuyMethod::Simple => BuyMethod::Bulk,
            BuyMethod::Bulk => BuyMethod::Simple,
        }
    }
}

impl fmt::Display for BuyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regions handed to a run, keyed by role.
#[derive(Debug, Clone, Default)]
pub struct RegionSet {
    regions: HashMap<RegionRole, Region>,
}

impl RegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: RegionRole, region: Region) -> Self {
        self.insert(role, region);
        self
    }

    pub fn insert(&mut self, role: RegionRole, region: Region) {
        self.regions.insert(role, region);
    }

    pub fn remove(&mut self, role: RegionRole) {
        self.regions.remove(&role);
    }

    pub fn get(&self, role: RegionRole) -> Option<Region> {
        self.regions.get(&role).copied()
    }

    /// Required roles that are absent or have a non-positive size.
    pub fn missing(&self, method: BuyMethod) -> Vec<RegionRole> {
        method
            .required_roles()
            .iter()
            .copied()
            .filter(|role| !self.get(*role).is_some_and(|r| r.is_valid()))
            .collect()
    }

    pub fn is_ready(&self, method: BuyMethod) -> bool {
        self.missing(method).is_empty()
    }
}

/// Format a money value with thousands grouping, dropping a zero fraction.
pub fn format_money(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let negative = rounded < 0.0;
    let abs = rounded.abs();
    let whole = abs.trunc() as u64;
    let cents = ((abs - abs.trunc()) * 100.0).round() as u64;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let mut out = if negative { format!("-{}", grouped) } else { grouped };
    if cents > 0 {
        let frac = format!("{:02}", cents);
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_serializes_as_array() {
        let r = Region::new(10, 20, 30, 40);
        assert_eq!(serde_json::to_string(&r).unwrap(), "[10,20,30,40]");
        let back: Region = serde_json::from_str("[1,2,3,4]").unwrap();
        assert_eq!(back, Region::new(1, 2, 3, 4));
    }

    #[test]
    fn test_region_set_missing_roles() {
        let set = RegionSet::new()
            .with(RegionRole::Confirm, Region::new(0, 0, 10, 10))
            .with(RegionRole::Cancel, Region::new(0, 0, 0, 10))
            .with(RegionRole::Buy, Region::new(0, 0, 10, 10))
            .with(RegionRole::Price, Region::new(0, 0, 10, 10));
        assert_eq!(
            set.missing(BuyMethod::Bulk),
            vec![RegionRole::Cancel, RegionRole::Balance]
        );
        assert!(!set.is_ready(BuyMethod::Bulk));
    }

    #[test]
    fn test_buy_method_normalize() {
        assert_eq!(BuyMethod::normalize(" BULK "), BuyMethod::Bulk);
        assert_eq!(BuyMethod::normalize("whatever"), BuyMethod::Simple);
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(1234.0), "1,234");
        assert_eq!(format_money(1234567.5), "1,234,567.5");
        assert_eq!(format_money(0.25), "0.25");
        assert_eq!(format_money(999.999), "1,000");
    }
}
