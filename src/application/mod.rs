pub mod dto;
pub mod payment_engine;

pub use dto::*;
pub use payment_engine::{
    generate_order_no, parse_gateway_time, PaymentEngine, PAY_CALLBACK_PATH,
    REFUND_CALLBACK_PATH, TRANSFER_CALLBACK_PATH,
};
