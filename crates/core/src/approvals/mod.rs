pub mod chain;
pub mod engine;

pub use engine::{ApprovalAction, ApprovalEngine, TransitionError};
