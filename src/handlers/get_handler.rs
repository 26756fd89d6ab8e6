use crate::prelude::*;

/// Serves a regular file: resolved MIME type, Last-Modified from the file
/// mtime, and the file handle attached for streamed delivery.
pub fn handle_static_file(response: &mut HttpResponse, path: &Path) -> std::result::Result<(), u16> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) => return Err(status_for_fs_error(&e)),
    };
    if !metadata.is_file() {
        return Err(HTTP_FORBIDDEN);
    }

    let mime = get_mime_type(path.extension().and_then(|e| e.to_str()));
    response.set_status_code(HTTP_OK);
    response.set_content_type(mime);
    if let Ok(mtime) = metadata.modified() {
        response.set_header("Last-Modified", &httpdate::fmt_http_date(mtime));
    }
    response.set_body_file(path.to_path_buf(), metadata.len());
    Ok(())
}

/// Directory listing: directories first, then case-insensitive by name, with
/// a parent link everywhere except the site root.
pub fn handle_directory(
    response: &mut HttpResponse,
    path: &Path,
    request_path: &str,
) -> std::result::Result<(), u16> {
    let entries = fs::read_dir(path).map_err(|e| status_for_fs_error(&e))?;

    let mut listing: Vec<(String, bool)> = Vec::new();
    for entry in entries.flatten() {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if let Ok(name) = entry.file_name().into_string() {
            listing.push((name, is_dir));
        }
    }
    listing.sort_by(|(a, a_dir), (b, b_dir)| {
        b_dir
            .cmp(a_dir)
            .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
    });

    let base = request_path.trim_end_matches('/');
    let mut html = format!("<html><head><title>Index of {request_path}</title></head><body>");
    html.push_str(&format!("<h1>Index of {request_path}</h1><ul>"));
    if request_path != "/" {
        html.push_str("<li><a href=\"../\">../</a></li>");
    }
    for (name, is_dir) in listing {
        let slash = if is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<li><a href=\"{base}/{name}{slash}\">{name}{slash}</a></li>"
        ));
    }
    html.push_str("</ul></body></html>");

    response.set_status_code(HTTP_OK);
    response.set_body(html.into_bytes(), "text/html");
    Ok(())
}

pub fn status_for_fs_error(err: &io::Error) -> u16 {
    match err.kind() {
        ErrorKind::NotFound => HTTP_NOT_FOUND,
        ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
        _ => HTTP_INTERNAL_SERVER_ERROR,
    }
}
