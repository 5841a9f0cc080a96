pub mod cgi;
pub mod delete;
pub mod error_page_handler;
pub mod proxy;
pub mod static_file;
pub mod upload;

use tracing::error;

use crate::application::server::resolver::{Dispatch, ResolvedRequest};
use crate::http::{Response, StatusCode};

use error_page_handler::error_response;

/// Produces the response for every dispatch that completes synchronously.
/// CGI requests never reach this point; the server starts a session for them.
pub fn build_response(resolved: &ResolvedRequest<'_>) -> Response {
    let server = resolved.server();
    let outcome = match &resolved.dispatch {
        Dispatch::Error(status) => Err(*status),
        Dispatch::Redirect { status, target } => Ok(Response::redirect(*status, target)),
        Dispatch::Proxy { addr } => Ok(proxy::forward(*addr, server)),
        Dispatch::File => static_file::serve_file(&resolved.script_path),
        Dispatch::Listing => static_file::serve_autoindex(&resolved.request.uri, &resolved.script_path),
        Dispatch::Upload { folder } => upload::handle_upload(folder, &resolved.request),
        Dispatch::Delete => delete::handle_delete(&resolved.script_path),
        Dispatch::Cgi { .. } => {
            error!(uri = %resolved.request.uri, "CGI request reached the static responder");
            Err(StatusCode::InternalServerError)
        }
    };

    let mut resp = outcome.unwrap_or_else(|status| error_response(status, server));
    if resolved.is_head() {
        resp.strip_body();
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::server::resolver::Resolver;
    use crate::config::parse_config;
    use super::proxy::ProxyCache;
    use std::fs;

    #[test]
    fn head_keeps_length_but_drops_body() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<p>hi</p>").unwrap();
        let config = parse_config("server { listen 8080; index index.html; location / { } }", dir.path()).unwrap();
        let proxies = ProxyCache::default();
        let resolver = Resolver::new(&config, &proxies);

        let get = build_response(&resolver.resolve(8080, b"GET / HTTP/1.1\r\n\r\n"));
        assert_eq!(get.status, StatusCode::Ok);
        assert_eq!(get.body, b"<p>hi</p>");

        let head = build_response(&resolver.resolve(8080, b"HEAD / HTTP/1.1\r\n\r\n"));
        assert_eq!(head.status, StatusCode::Ok);
        assert!(head.body.is_empty());
        assert_eq!(head.headers.get("Content-Length"), Some("9"));
    }

    #[test]
    fn errors_use_the_error_page_chain() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nf.html"), "not here").unwrap();
        let config = parse_config(
            "server { listen 8080; error_page 404 /nf.html; location / { } }",
            dir.path(),
        )
        .unwrap();
        let proxies = ProxyCache::default();
        let resolved = Resolver::new(&config, &proxies).resolve(8080, b"GET /nope HTTP/1.1\r\n\r\n");
        let resp = build_response(&resolved);
        assert_eq!(resp.status, StatusCode::NotFound);
        assert_eq!(resp.body, b"not here");
    }

    #[test]
    fn redirect_sets_location() {
        let config = parse_config(
            "server { listen 8080; location /old { redirect /new; } }",
            std::path::Path::new("."),
        )
        .unwrap();
        let proxies = ProxyCache::default();
        let resolved = Resolver::new(&config, &proxies).resolve(8080, b"GET /old HTTP/1.1\r\n\r\n");
        let resp = build_response(&resolved);
        assert_eq!(resp.status, StatusCode::MovedPermanently);
        assert_eq!(resp.headers.get("Location"), Some("/new"));
    }
}
