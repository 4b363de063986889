//! Shared data model for alertpush: the Alertmanager webhook payload and the
//! label helpers notification templates rely on.

pub mod types;

#[cfg(test)]
mod tests;
