//! Per-role evaluation agents.
//!
//! Each agent analyses a commit from one role's point of view and refines
//! its own answer until it is clear enough.

pub mod clarity;
pub mod controller;
pub mod invoker;
pub mod prompts;
pub mod state_machine;

pub use clarity::{ClarityEvaluator, ClarityWeights};
pub use controller::{AgentOutcome, IterationController};
pub use invoker::{ModelInvoker, OllamaInvoker, OllamaSettings};
pub use prompts::{PromptBuilder, RolePromptBuilder};
