// Reference expressions
// Placeholder scanning, resolution against completed results, and parameter tree walking

pub mod builder;
pub mod lexer;
pub mod resolver;

pub use builder::ParameterBuilder;
pub use lexer::{extract_references, whole_reference, Lexer, PathSegment, Reference, Segment};
pub use resolver::{render, walk_path, Lookup, ReferenceError, ReferenceResolver, ResultSource};
