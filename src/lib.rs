//! asmsched: an assembly superoptimizer
//!
//! Straight-line code and loop bodies are turned into a constraint model
//! that jointly decides instruction order, register allocation and, for
//! loops, software pipelining. The solved model is read back into code and
//! checked against the original before it is handed out.
//!
//! ```text
//! frontend ──▶ dataflow ──▶ optimizer ──▶ backend (z3)
//!                               │
//!                               ▼
//!                           verifier
//! ```

pub mod backend;
pub mod common;
pub mod config;
pub mod dataflow;
pub mod frontend;
pub mod heuristics;
pub mod optimizer;
pub mod pipeline;
pub mod target;
pub mod verifier;
