use thiserror::Error;

use crate::types::{BuyMethod, RegionRole};

/// Screen capture or OCR engine failure. "No number found" is not an error.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("ocr engine failed: {0}")]
    Engine(String),
}

#[derive(Debug, Error)]
pub enum InputError {
    /// Pointer was parked in a guarded screen corner.
    #[error("fail-safe triggered from pointer in screen corner")]
    FailSafe,
    #[error("{0}")]
    Dispatch(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings encode: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown delay key '{0}'")]
    UnknownDelay(String),
    #[error("unknown region '{role}' for method '{method}'")]
    UnknownRegion { role: RegionRole, method: BuyMethod },
}

/// Reasons a run refuses to start.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("regions not configured for {method}: {}", join_roles(.missing))]
    MissingRegions { method: BuyMethod, missing: Vec<RegionRole> },
    #[error("max price must be greater than zero")]
    InvalidMaxPrice,
    #[error("bulk max price and buy amount must be greater than zero")]
    InvalidBulkValues,
    #[error("no target window selected")]
    NoTargetWindow,
    #[error("ocr engine unavailable: {0}")]
    OcrUnavailable(String),
}

fn join_roles(roles: &[RegionRole]) -> String {
    roles.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
}
