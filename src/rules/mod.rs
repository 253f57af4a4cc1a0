//! Path/method-matched rate rules loaded from YAML, with escalation ladders.

pub mod engine;

pub use engine::{EscalationAction, EscalationStep, Rule, RulesEngine, parse_rate_string};
