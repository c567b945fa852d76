//! Alert decisions: the per-key state machines, the per-pair evaluation
//! pipeline that feeds them, and the chat text for what they emit.

pub mod message;
pub mod pipeline;
pub mod scheduler;

pub use pipeline::{evaluate, Alert, AlertBody, EvaluationPolicy};
pub use scheduler::{AlertScheduler, AlertState};
