pub mod engine;
pub mod error;
pub mod events;
pub mod input;
pub mod logger;
pub mod ocr;
pub mod parse;
pub mod platform;
pub mod recorder;
pub mod settings;
pub mod sleep;
pub mod types;

pub use types::format_money;
