use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::http::{Request, Response, StatusCode};

const FALLBACK_NAME: &str = "upload.bin";

/// Stores a POST body under `upload_dir`.
///
/// A `multipart/form-data` body keeps its first file part under the client's
/// file name. Any other body is stored whole, named after the last segment
/// of the request path.
pub fn handle_upload(upload_dir: &Path, req: &Request) -> Result<Response, StatusCode> {
    let (filename, data) = if req.content_type().starts_with("multipart/form-data") {
        let boundary = match req.content_type().split("boundary=").nth(1) {
            Some(b) => format!("--{}", b.trim().trim_matches('"')),
            None => return Err(StatusCode::BadRequest),
        };
        parse_multipart(&boundary, &req.body).ok_or(StatusCode::BadRequest)?
    } else {
        let name = req.uri.rsplit('/').next().unwrap_or("").to_string();
        (name, req.body.clone())
    };

    fs::create_dir_all(upload_dir).map_err(|e| {
        warn!(dir = %upload_dir.display(), error = %e, "cannot create upload folder");
        StatusCode::InternalServerError
    })?;

    let fname = sanitize(&filename);
    let path = upload_dir.join(fname);
    fs::write(&path, &data).map_err(|e| {
        warn!(path = %path.display(), error = %e, "cannot store upload");
        StatusCode::InternalServerError
    })?;
    info!(path = %path.display(), bytes = data.len(), "stored upload");

    let location = if fname == filename.as_str() && req.uri.ends_with(fname) {
        req.uri.clone()
    } else {
        format!("{}/{fname}", req.uri.trim_end_matches('/'))
    };
    let mut resp = Response::with_body(StatusCode::Created, "text/plain; charset=utf-8", format!("Stored {fname}\n").into_bytes());
    resp.headers.insert("Location", location);
    Ok(resp)
}

fn sanitize(filename: &str) -> &str {
    let name = filename
        .rsplit('/')
        .next()
        .unwrap_or("")
        .rsplit('\\')
        .next()
        .unwrap_or("");
    if name.is_empty() || name == "." || name == ".." {
        FALLBACK_NAME
    } else {
        name
    }
}

/// First part carrying a `filename` in its Content-Disposition.
fn parse_multipart(boundary: &str, body: &[u8]) -> Option<(String, Vec<u8>)> {
    let delimiter = format!("\r\n{}", boundary);
    let delimiter_bytes = delimiter.as_bytes();
    let boundary_bytes = boundary.as_bytes();

    let start_offset = twoway::find_bytes(body, boundary_bytes)? + boundary_bytes.len();
    if body.get(start_offset..start_offset + 2) != Some(&b"\r\n"[..]) {
        return None;
    }

    let mut current_pos = start_offset + 2;
    loop {
        let end_of_part = current_pos + twoway::find_bytes(&body[current_pos..], delimiter_bytes)?;
        let part_data = &body[current_pos..end_of_part];

        if let Some(header_end_rel) = twoway::find_bytes(part_data, b"\r\n\r\n") {
            let headers_bytes = &part_data[..header_end_rel];
            let content_bytes = &part_data[header_end_rel + 4..];

            if let Ok(headers_str) = std::str::from_utf8(headers_bytes) {
                let filename = headers_str
                    .lines()
                    .filter(|line| {
                        line.split(':')
                            .next()
                            .is_some_and(|name| name.trim().eq_ignore_ascii_case("Content-Disposition"))
                    })
                    .filter_map(|line| line.split("filename=").nth(1))
                    .map(|v| v.split(';').next().unwrap_or("").trim().trim_matches('"'))
                    .find(|v| !v.is_empty());
                if let Some(fname) = filename {
                    return Some((fname.to_string(), content_bytes.to_vec()));
                }
            }
        }

        current_pos = end_of_part + delimiter_bytes.len();
        match body.get(current_pos..current_pos + 2) {
            Some(b"\r\n") => current_pos += 2,
            _ => break,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    fn request(uri: &str, content_type: &str, body: &[u8]) -> Request {
        let mut headers = Headers::new();
        if !content_type.is_empty() {
            headers.insert("Content-Type", content_type);
        }
        Request {
            method: "POST".into(),
            uri: uri.into(),
            version: "HTTP/1.1".into(),
            headers,
            body: body.to_vec(),
            ..Request::default()
        }
    }

    #[test]
    fn stores_first_file_part() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--XyZ\r\n\
            Content-Disposition: form-data; name=\"note\"\r\n\r\n\
            ignored\r\n\
            --XyZ\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"../hello.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            hello world\r\n\
            --XyZ--\r\n";
        let req = request("/upload", "multipart/form-data; boundary=XyZ", body);

        let resp = handle_upload(dir.path(), &req).unwrap();
        assert_eq!(resp.status, StatusCode::Created);
        assert_eq!(resp.headers.get("Location"), Some("/upload/hello.txt"));
        assert_eq!(fs::read(dir.path().join("hello.txt")).unwrap(), b"hello world");
    }

    #[test]
    fn raw_body_is_named_after_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let req = request("/upload/notes.txt", "text/plain", b"raw bytes");
        let resp = handle_upload(&dir.path().join("nested"), &req).unwrap();
        assert_eq!(resp.headers.get("Location"), Some("/upload/notes.txt"));
        assert_eq!(fs::read(dir.path().join("nested/notes.txt")).unwrap(), b"raw bytes");

        let req = request("/upload/", "", b"anon");
        handle_upload(dir.path(), &req).unwrap();
        assert_eq!(fs::read(dir.path().join(FALLBACK_NAME)).unwrap(), b"anon");
    }

    #[test]
    fn multipart_without_boundary_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let req = request("/upload", "multipart/form-data", b"whatever");
        assert_eq!(handle_upload(dir.path(), &req).unwrap_err(), StatusCode::BadRequest);
    }
}
