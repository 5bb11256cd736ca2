//! Batch lifecycle and step execution: the core state machines of the
//! EBR service.
//!
//! Both state machines mutate persisted state and emit exactly one audit
//! entry per accepted transition, on the same transaction as the change
//! they describe.

pub mod lifecycle;
pub mod steps;

#[cfg(test)]
mod tests;

pub use lifecycle::{cancel_batch, complete_batch, create_batch, get_batch, list_batches, start_batch};
pub use steps::{list_steps, sign_step, transition, update_step};
