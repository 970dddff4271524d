//! Built-in structural rewrite visitors.

mod console;
mod guard;
mod keys;
pub mod params;

pub use console::ConsoleLogVisitor;
pub use guard::{
    GlobalGuardVisitor, GuardDecision, GuardMode, GuardPlan, decide as decide_guard,
    guard_global_for, is_guarded,
};
pub use keys::IterationKeyVisitor;
