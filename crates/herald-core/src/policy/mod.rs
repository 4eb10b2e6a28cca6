//! Policy - 配送ポリシー

pub mod retry;

pub use retry::RetryPolicy;
