//! SQL analysis
//!
//! Turns raw SQL into a `ParsedQuery` describing the statement's shape:
//! base tables, aliases, and column predicate roles. Purely structural —
//! no database round-trips.

pub mod query;
mod walk;

pub use query::{ParsedQuery, PredicateRole};
pub use walk::parse_statement;
