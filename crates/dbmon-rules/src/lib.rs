//! Rule intake: prompt parsing and static validation.
//!
//! The parser turns a free-text rule prompt (optionally merged with a
//! structured draft from the wizard) into a normalized [`RuleSpec`]. The
//! validator walks a spec and accumulates every field-level problem before
//! rejecting, so the control plane can surface them all at once.

pub mod parser;
pub mod validator;

pub use parser::{parse_prompt, parse_prompt_with_draft};
pub use validator::validate_rule_spec;
