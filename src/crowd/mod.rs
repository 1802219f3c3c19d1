pub mod aggregate;
pub mod swing;

pub use aggregate::{aggregate_markets, recent_snapshots, write_snapshot, MarketAggregate};
pub use swing::{build_swing_alert, SwingAlert};
