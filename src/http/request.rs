use super::headers::Headers;

/// A framed request before routing. The method is kept verbatim so that
/// unknown verbs can be answered with 501 instead of 400.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub query_string: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn host(&self) -> Option<&str> {
        self.header("Host")
    }

    pub fn content_type(&self) -> &str {
        self.header("Content-Type").unwrap_or("")
    }
}
