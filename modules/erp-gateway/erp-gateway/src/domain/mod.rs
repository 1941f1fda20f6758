pub mod backoff;
pub mod caller;
pub mod classifier;
pub mod dispatch_queue;
pub mod error;
pub mod idempotency;
pub mod ports;
pub mod service;

#[cfg(test)]
mod test_support;
