//! Domain types shared by the stores, the update pipeline and the CLI.

pub mod bar;
pub mod exchange;

pub use bar::DailyBar;
pub use exchange::{Company, ExchangeRecord};
