pub mod clock;
pub mod config;
pub mod types;

pub use clock::epoch_millis;
pub use config::BerthConfig;
pub use types::*;
