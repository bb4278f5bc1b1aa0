pub mod account;
pub mod event;
pub mod opportunity;
pub mod position;

// Re-export commonly used types
pub use account::{AccountState, PauseReason, TradingState};
pub use event::TradeEvent;
pub use opportunity::Opportunity;
pub use position::{ExitReason, PerformanceStats, Position};
