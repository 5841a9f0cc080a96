use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

use crate::http::{Response, StatusCode};

pub fn handle_delete(full_path: &Path) -> Result<Response, StatusCode> {
    match fs::remove_file(full_path) {
        Ok(()) => {
            info!(path = %full_path.display(), "deleted");
            Ok(Response::with_body(StatusCode::Ok, "text/plain; charset=utf-8", b"Deleted\n".to_vec()))
        }
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => Err(StatusCode::NotFound),
        Err(ref e) if e.kind() == io::ErrorKind::PermissionDenied => Err(StatusCode::Forbidden),
        Err(_) => Err(StatusCode::InternalServerError),
    }
}
