pub mod entities;
pub mod errors;
pub mod events;
pub mod task;
pub mod value_objects;

pub use entities::{PaymentDetails, Refund, Settlement, SettlementSplit, Trade};
pub use errors::{DomainError, DomainResult};
pub use events::*;
pub use task::{PayeeAccount, Task, TaskLog};
pub use value_objects::{
    Money, OrderType, RefundStatus, SettlementStatus, TaskStatus, TradeStatus, TradeType,
};
