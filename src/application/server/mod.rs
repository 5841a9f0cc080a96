pub mod manager;
pub mod resolver;
pub mod server;

pub use resolver::{Dispatch, ResolvedRequest, Resolver};
pub use server::{Server, ServerOptions};
