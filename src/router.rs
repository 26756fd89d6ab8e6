use crate::prelude::*;

/// Outcome of routing: the variant tells the orchestrator which handler to
/// dispatch, with the filesystem target already resolved and containment-
/// checked where one applies.
#[derive(Debug)]
pub enum Handler {
    StaticFile(PathBuf),
    Directory(PathBuf),
    Upload {
        target: PathBuf,
        route: RouteConfig,
    },
    Delete(PathBuf),
    Redirect {
        code: u16,
        location: String,
    },
    Error(u16),
    Session,
    Cgi {
        script: PathBuf,
    },
}

pub fn route_request(request: &HttpRequest, s_cfg: &Arc<ServerConfig>) -> Handler {
    // Fixed demo endpoint, outside the configured route table.
    if request.path == "/session" {
        return Handler::Session;
    }

    let Some(route) = match_route(s_cfg, &request.path) else {
        return Handler::Error(HTTP_NOT_FOUND);
    };

    if let Some(location) = &route.redirect_to {
        let code = match route.redirect_status_code {
            Some(HTTP_FOUND) => HTTP_FOUND,
            _ => HTTP_MOVED_PERMANENTLY,
        };
        return Handler::Redirect {
            code,
            location: location.clone(),
        };
    }

    let method = request.method();
    if !route.allows(method.as_str()) {
        return Handler::Error(HTTP_METHOD_NOT_ALLOWED);
    }

    let Some(root) = route.root.as_deref() else {
        return Handler::Error(HTTP_INTERNAL_SERVER_ERROR);
    };
    let suffix = request
        .path
        .strip_prefix(&route.path)
        .unwrap_or("")
        .trim_start_matches('/');
    let target = match resolve_target(root, suffix) {
        Ok(path) => path,
        Err(code) => return Handler::Error(code),
    };

    if let Some(ext) = route.cgi_ext() {
        if target.is_file() && has_extension(&target, ext) {
            return Handler::Cgi { script: target };
        }
    }

    match method {
        Method::POST => {
            return Handler::Upload {
                target,
                route: route.clone(),
            };
        }
        Method::DELETE => return Handler::Delete(target),
        Method::GET => {}
    }

    if target.is_dir() {
        if route.directory_listing.unwrap_or(false) {
            return Handler::Directory(target);
        }
        let index = target.join(route.index_file());
        if index.is_file() {
            return Handler::StaticFile(index);
        }
        return Handler::Error(HTTP_FORBIDDEN);
    }

    if target.exists() {
        Handler::StaticFile(target)
    } else {
        Handler::Error(HTTP_NOT_FOUND)
    }
}

/// Longest matching route whose path is a prefix of the request path with a
/// `/` at the boundary (or an exact match).
pub fn match_route<'a>(s_cfg: &'a ServerConfig, path: &str) -> Option<&'a RouteConfig> {
    let mut best: Option<&RouteConfig> = None;
    for route in &s_cfg.routes {
        let prefix = route.path.as_str();
        let matches = path == prefix
            || prefix == "/" && path.starts_with('/')
            || path.starts_with(prefix) && path[prefix.len()..].starts_with('/');
        if matches && best.is_none_or(|b| prefix.len() > b.path.len()) {
            best = Some(route);
        }
    }
    best
}

/// Joins `suffix` under `root` and verifies the result stays inside the
/// canonical root. The traversal guard is canonicalization, not string
/// inspection: symlinked escapes fail the containment check too.
pub fn resolve_target(root: &str, suffix: &str) -> std::result::Result<PathBuf, u16> {
    let canonical_root = Path::new(root).canonicalize().map_err(|_| HTTP_NOT_FOUND)?;
    let joined = canonical_root.join(suffix);

    if joined.exists() {
        let canonical = joined.canonicalize().map_err(|_| HTTP_FORBIDDEN)?;
        if !canonical.starts_with(&canonical_root) {
            return Err(HTTP_FORBIDDEN);
        }
        return Ok(canonical);
    }

    // Nonexistent targets (uploads, stale deletes) are checked through their
    // closest existing ancestor.
    let Some(parent) = joined.parent() else {
        return Err(HTTP_FORBIDDEN);
    };
    let Some(file_name) = joined.file_name() else {
        return Err(HTTP_NOT_FOUND);
    };
    let canonical_parent = parent.canonicalize().map_err(|_| HTTP_NOT_FOUND)?;
    if !canonical_parent.starts_with(&canonical_root) {
        return Err(HTTP_FORBIDDEN);
    }
    Ok(canonical_parent.join(file_name))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}
