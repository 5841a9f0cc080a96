pub mod event;
pub mod poller;
pub mod event_loop;

pub use event::{Event, FdKind, Interest};
pub use poller::Poller;
pub use event_loop::EventLoop;
