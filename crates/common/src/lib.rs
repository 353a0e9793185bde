pub mod plate_text;
pub mod plates;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
