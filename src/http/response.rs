use super::headers::Headers;
use super::status::StatusCode;

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: Headers::new(), body: Vec::new() }
    }

    pub fn with_body(status: StatusCode, content_type: &str, body: Vec<u8>) -> Self {
        let mut resp = Self::new(status);
        resp.headers.insert("Content-Type", content_type);
        resp.body = body;
        resp
    }

    pub fn redirect(status: StatusCode, target: &str) -> Self {
        let mut resp = Self::new(status);
        resp.headers.insert("Location", target);
        resp
    }

    /// Drops the body for HEAD while keeping the length it would have had.
    pub fn strip_body(&mut self) {
        if !self.headers.contains_key("Content-Length") {
            self.headers.insert("Content-Length", self.body.len().to_string());
        }
        self.body.clear();
    }
}
