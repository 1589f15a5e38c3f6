//! querybus query language
//!
//! Parses the query text and event directives carried by bus subscriptions.
//! Only the subset needed to track result sets is supported:
//!
//! ```text
//! SELECT pid, name FROM processes
//! SELECT p.pid AS id FROM processes WHERE uid = 0 AND state = 'R';
//! ```
//!
//! # Usage
//!
//! ```rust
//! use querybus_lang::{parse_select, EventMode};
//!
//! let query = parse_select("SELECT pid, name FROM processes").unwrap();
//! assert_eq!(query.table, "processes");
//!
//! let mode: EventMode = "BOTH".parse().unwrap();
//! assert!(mode.reports_removed());
//! ```

pub mod ast;
pub mod error;
pub mod event;
pub mod lexer;
pub mod parser;
pub mod span;

pub use ast::{Column, Filter, Projection, SelectQuery};
pub use error::ParseError;
pub use event::EventMode;
pub use parser::parse_select;
pub use span::Span;
