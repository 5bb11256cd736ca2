//! Tenant/identity context: credentials, sessions, and the
//! role-capability policy.

pub mod password;
pub mod policy;
pub mod session;

pub use policy::{allowed, Operation};
pub use session::Session;
