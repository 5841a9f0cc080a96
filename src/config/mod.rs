pub mod ast;
pub mod loader;
pub mod parser;

pub use ast::*;
pub use loader::load_config;
pub use parser::parse_config;
