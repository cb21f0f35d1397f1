// Trading decisions, order placement and position tracking
pub mod executor;
pub mod order_protocol;
pub mod position_manager;
pub mod quote_feed;

pub use executor::{ExecutionAction, ExecutionDecision, Executor, PriceBand};
pub use order_protocol::{
    OrderProtocol, OrderResult, OrderState, RejectReason, MAX_CONFIRMATION_ROUNDS,
};
pub use position_manager::{PositionBook, PositionSummary};
pub use quote_feed::QuoteFeed;
