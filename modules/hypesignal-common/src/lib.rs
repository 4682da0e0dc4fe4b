pub mod config;
pub mod parse;
pub mod types;

pub use config::AppConfig;
pub use parse::{parse_count, truncate_to_char_boundary};
pub use types::*;
