//! 任务平台支付引擎：预支付、回调、退款与任务结算

pub mod api;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod ports;
