//! HTTP plumbing shared by the streaming fetcher: client construction and
//! retry-with-backoff for transient faults.

pub mod client;
pub mod retry;

pub use client::{build_client, is_permanent_failure, is_retryable_status};
pub use retry::{retry_async, RetryConfig, RetryStats};
