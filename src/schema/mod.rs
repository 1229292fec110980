//! Device upload schema
//!
//! This module defines the payload devices upload and the parsing and
//! validation that turn it into records the store accepts. Devices send either
//! a single measurement object or a batch (JSON array or NDJSON).

mod parser;
mod upload;

pub use parser::*;
pub use upload::*;
