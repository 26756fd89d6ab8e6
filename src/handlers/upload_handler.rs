use crate::handlers::get_handler::status_for_fs_error;
use crate::prelude::*;

/// Stores an upload and answers 201 Created.
///
/// Multipart requests store each file part under the route root with a
/// sanitized filename; any other body is written verbatim to the resolved
/// target path (atomically when it was spilled to disk).
pub fn handle_upload(
    request: &mut HttpRequest,
    response: &mut HttpResponse,
    route: &RouteConfig,
    target: &Path,
) -> std::result::Result<(), u16> {
    let body = std::mem::take(&mut request.body);

    let saved = match body {
        Body::Parts(parts) => store_multipart(parts, route)?,
        Body::Spilled(tmp) => {
            tmp.persist(target)
                .map_err(|_| HTTP_INTERNAL_SERVER_ERROR)?;
            vec![file_name_of(target)]
        }
        Body::Bytes(bytes) => {
            fs::write(target, &bytes).map_err(|e| status_for_fs_error(&e))?;
            vec![file_name_of(target)]
        }
        Body::Empty => return Err(HTTP_BAD_REQUEST),
    };

    if saved.is_empty() {
        return Err(HTTP_BAD_REQUEST);
    }

    response.set_status_code(HTTP_CREATED);
    if saved.len() == 1 {
        let location = format!("{}/{}", route.path.trim_end_matches('/'), saved[0]);
        response.set_header("Location", &location);
        response.set_body(
            format!("File saved as {}", saved[0]).into_bytes(),
            "text/plain",
        );
    } else {
        response.set_body(
            format!("Saved files: {}", saved.join(", ")).into_bytes(),
            "text/plain",
        );
    }
    Ok(())
}

fn store_multipart(parts: Vec<Part>, route: &RouteConfig) -> std::result::Result<Vec<String>, u16> {
    let root = route.root.as_deref().ok_or(HTTP_INTERNAL_SERVER_ERROR)?;
    let canonical_root = Path::new(root)
        .canonicalize()
        .map_err(|_| HTTP_NOT_FOUND)?;

    let mut saved = Vec::new();
    for part in parts {
        let Some(raw_name) = &part.filename else {
            // Field parts carry form values, not files to store.
            continue;
        };
        let clean = sanitize_filename(raw_name);
        let dest = canonical_root.join(&clean);

        // Sanitization strips every separator, but the destination is still
        // verified against the canonical root before anything is written.
        let contained = match dest.parent() {
            Some(parent) => parent
                .canonicalize()
                .map(|p| p.starts_with(&canonical_root))
                .unwrap_or(false),
            None => false,
        };
        if !contained {
            return Err(HTTP_FORBIDDEN);
        }

        match part.data {
            PartData::File(tmp) => {
                tmp.persist(&dest).map_err(|_| HTTP_INTERNAL_SERVER_ERROR)?;
            }
            PartData::Bytes(bytes) => {
                fs::write(&dest, &bytes).map_err(|e| status_for_fs_error(&e))?;
            }
        }
        saved.push(clean);
    }
    Ok(saved)
}

/// Reduces an attacker-controlled filename to a bare, safe file name:
/// directory components are stripped, anything outside `[A-Za-z0-9._-]`
/// becomes `_`, and a leading dot is prefixed so no upload can hide.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    let mut clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if clean.starts_with('.') {
        clean.insert(0, '_');
    }
    if clean.is_empty() {
        clean.push_str("upload");
    }
    clean
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}
