use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use crate::http::{Response, StatusCode};

const MAX_STATIC_BYTES: u64 = 8 * 1024 * 1024;

pub fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn io_status(e: &io::Error) -> StatusCode {
    match e.kind() {
        io::ErrorKind::NotFound => StatusCode::NotFound,
        io::ErrorKind::PermissionDenied => StatusCode::Forbidden,
        _ => StatusCode::InternalServerError,
    }
}

/// Reads `target` into a 200 response. The caller has already checked
/// that it is a regular file.
pub fn serve_file(target: &Path) -> Result<Response, StatusCode> {
    let meta = fs::metadata(target).map_err(|e| io_status(&e))?;
    if meta.len() > MAX_STATIC_BYTES {
        return Err(StatusCode::PayloadTooLarge);
    }

    let mut f = File::open(target).map_err(|e| io_status(&e))?;
    let mut bytes = Vec::with_capacity(meta.len() as usize);
    f.read_to_end(&mut bytes)
        .map_err(|_| StatusCode::InternalServerError)?;

    Ok(Response::with_body(StatusCode::Ok, mime_for(target), bytes))
}

pub fn serve_autoindex(req_path: &str, dir_path: &Path) -> Result<Response, StatusCode> {
    let entries = fs::read_dir(dir_path).map_err(|e| io_status(&e))?;

    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let slash = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) { "/" } else { "" };
            format!("{name}{slash}")
        })
        .collect();
    names.sort();

    let base = req_path.trim_end_matches('/');
    let mut html = format!("<html><head><title>Index of {req_path}</title></head><body><h1>Index of {req_path}</h1><hr><ul>");
    for name in names {
        html.push_str(&format!("<li><a href=\"{base}/{name}\">{name}</a></li>"));
    }
    html.push_str("</ul><hr></body></html>");

    Ok(Response::with_body(StatusCode::Ok, "text/html; charset=utf-8", html.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_file_with_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("style.css");
        fs::write(&path, "body {}").unwrap();
        let resp = serve_file(&path).unwrap();
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(resp.body, b"body {}");
        assert_eq!(resp.headers.get("Content-Type"), Some("text/css"));
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(serve_file(&dir.path().join("nope")).unwrap_err(), StatusCode::NotFound);
    }

    #[test]
    fn autoindex_lists_entries_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let resp = serve_autoindex("/files/", dir.path()).unwrap();
        let html = String::from_utf8(resp.body).unwrap();
        assert!(html.contains("Index of /files/"));
        let a = html.find("href=\"/files/a.txt\"").unwrap();
        let b = html.find("href=\"/files/b.txt\"").unwrap();
        assert!(a < b);
        assert!(html.contains("href=\"/files/sub/\""));
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        assert_eq!(mime_for(Path::new("blob.xyz")), "application/octet-stream");
        assert_eq!(mime_for(Path::new("index.HTM")), "application/octet-stream");
        assert_eq!(mime_for(Path::new("index.htm")), "text/html; charset=utf-8");
    }
}
