pub mod framing;
pub mod headers;
pub mod method;
pub mod parser;
pub mod request;
pub mod response;
pub mod serializer;
pub mod status;

pub use framing::PendingRequest;
pub use headers::Headers;
pub use method::Method;
pub use parser::{parse_head, parse_request, Head, ParseError};
pub use request::Request;
pub use response::Response;
pub use status::StatusCode;
