pub mod ast;
pub mod eval;
pub mod parser;

pub use ast::Filter;
pub use eval::evaluate;
pub use parser::{parse, ParseError};
