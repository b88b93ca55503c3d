//! HTML → LD-JSON sections → JSON objects → typed page aggregate.

pub mod aggregate;
pub mod graph;
pub mod objects;
pub mod sections;
