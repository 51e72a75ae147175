//! JVM-level model the runtime consults
//!
//! The runtime never parses class files: classes and methods are declared in a [`ClassGraph`]
//! by whoever loads them (in tests and in the command line tool, by hand) and the runtime only
//! needs their names, their access flags, their defining loader and their super types.
//!
//! [`ClassGraph`]: class_graph::ClassGraph

mod access_flags;
pub mod class_graph;
mod errors;
mod names;

pub use access_flags::*;
pub use errors::*;
pub use names::*;
