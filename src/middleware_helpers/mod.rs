pub mod retry;

pub use retry::{with_retry, ApiRetryPolicy, RetryConfig, RetryPolicy};
