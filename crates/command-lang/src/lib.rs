//! Command language for spreadsheet-driven form automation.
//!
//! A header cell holds one or more commands (`click(...)`, `fill(...)`,
//! `if(...)`, `macro:name(...)`, ...). This crate turns a cell into a typed
//! [`Command`] and provides the text rewriting that happens before parsing:
//! sequence placeholders, `${var}` substitution and macro parameters.

pub mod command;
pub mod parser;
pub mod substitute;

pub use command::{
    ColumnSpec, Command, CompareOp, ConfigDirective, ErrorPolicy, WaitDuration, MAX_WAIT_SECS,
};
pub use parser::{parse, MAX_COMMAND_LENGTH};
pub use substitute::{
    expand_sequence, redact, substitute, substitute_macro_params, substitute_with_report,
    ScopedVariables, Substitution, VariableLookup, MAX_SUBSTITUTION_DEPTH,
};
