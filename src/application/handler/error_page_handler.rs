use std::fs;

use tracing::debug;

use crate::config::VirtualServer;
use crate::http::{Response, StatusCode};

/// Builds the response for a failed request.
///
/// A mapped page that cannot be read escalates the response to 500 and
/// the 500 page is tried once. A generated page is the last resort.
pub fn error_response(status: StatusCode, server: &VirtualServer) -> Response {
    let (status, body) = match server.error_page(status.as_u16()) {
        None => (status, None),
        Some(_) => match custom_page(server, status.as_u16()) {
            Some(page) => (status, Some(page)),
            None => (StatusCode::InternalServerError, custom_page(server, 500)),
        },
    };
    let body = body.unwrap_or_else(|| generated_page(status.as_u16()).into_bytes());
    Response::with_body(status, "text/html; charset=utf-8", body)
}

fn custom_page(server: &VirtualServer, code: u16) -> Option<Vec<u8>> {
    let path = server.error_page(code)?;
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!(code, path = %path.display(), error = %e, "error page unreadable");
            None
        }
    }
}

pub fn generated_page(code: u16) -> String {
    format!(
        "<!doctype html>\n<html>\n<head>\n\t<meta charset=\"UTF-8\" />\n\t<title>Error {code}</title>\n</head>\n\
         <body>\n\t<h1>ERROR - {code}</h1>\n\t<p>(This page was generated by the server)</p>\n</body>\n</html>\n"
    )
}
