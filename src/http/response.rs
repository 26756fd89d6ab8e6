use crate::cgi::CgiProcess;
use crate::prelude::*;

#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    None,
    Bytes(Vec<u8>),
    File {
        path: PathBuf,
        size: u64,
    },
    PendingCgi(CgiProcess),
}

/// Mutable response under construction. Serialization happens once the
/// orchestrator has decided the connection semantics (keep-alive or close);
/// file bodies emit only the header block here and are streamed separately.
#[derive(Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HeaderStore,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        HttpResponse {
            status_code,
            headers: HeaderStore::new(),
            body: ResponseBody::None,
        }
    }

    pub fn set_status_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    pub fn set_content_type(&mut self, mime: &str) -> &mut Self {
        self.set_header("Content-Type", mime)
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.set_content_type(content_type);
        self.body = ResponseBody::Bytes(body);
        self
    }

    pub fn set_body_file(&mut self, path: PathBuf, size: u64) -> &mut Self {
        self.body = ResponseBody::File { path, size };
        self
    }

    pub fn set_pending_process(&mut self, process: CgiProcess) -> &mut Self {
        self.body = ResponseBody::PendingCgi(process);
        self
    }

    /// One-shot transfer of the CGI child to the caller; the builder never
    /// keeps a second reference.
    pub fn take_pending_process(&mut self) -> Option<CgiProcess> {
        if matches!(self.body, ResponseBody::PendingCgi(_)) {
            match std::mem::take(&mut self.body) {
                ResponseBody::PendingCgi(process) => Some(process),
                _ => None,
            }
        } else {
            None
        }
    }

    pub fn content_length(&self) -> u64 {
        match &self.body {
            ResponseBody::None | ResponseBody::PendingCgi(_) => 0,
            ResponseBody::Bytes(b) => b.len() as u64,
            ResponseBody::File { size, .. } => *size,
        }
    }

    pub fn status_text(code: u16) -> &'static str {
        match code {
            HTTP_OK => "OK",
            HTTP_CREATED => "Created",
            HTTP_NO_CONTENT => "No Content",
            HTTP_MOVED_PERMANENTLY => "Moved Permanently",
            HTTP_FOUND => "Found",
            HTTP_BAD_REQUEST => "Bad Request",
            HTTP_FORBIDDEN => "Forbidden",
            HTTP_NOT_FOUND => "Not Found",
            HTTP_METHOD_NOT_ALLOWED => "Method Not Allowed",
            HTTP_REQUEST_TIMEOUT => "Request Timeout",
            HTTP_PAYLOAD_TOO_LARGE => "Payload Too Large",
            HTTP_URI_TOO_LONG => "URI Too Long",
            HTTP_INTERNAL_SERVER_ERROR => "Internal Server Error",
            HTTP_NOT_IMPLEMENTED => "Not Implemented",
            _ => "Unknown",
        }
    }

    /// Full wire form: header block plus the in-memory body.
    pub fn to_bytes(&self, keep_alive: bool, server: &str) -> Vec<u8> {
        let mut out = self.to_bytes_headers_only(keep_alive, server);
        if let ResponseBody::Bytes(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }

    /// Header block only; used as-is for file bodies, whose content is
    /// streamed in bounded slices afterwards.
    pub fn to_bytes_headers_only(&self, keep_alive: bool, server: &str) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status_code,
            Self::status_text(self.status_code)
        )
        .into_bytes();

        let mut has_date = false;
        let mut has_server = false;
        for (name, value) in self.headers.iter() {
            // The connection semantics and the framing are owned by the
            // serializer, whatever a handler or CGI script put in the store.
            if name == "content-length" || name == "connection" {
                continue;
            }
            has_date |= name == "date";
            has_server |= name == "server";
            out.extend_from_slice(
                format!("{}: {}\r\n", to_pascal_case(name), value).as_bytes(),
            );
        }

        if !has_date {
            out.extend_from_slice(
                format!("Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now())).as_bytes(),
            );
        }
        if !has_server {
            out.extend_from_slice(format!("Server: {}\r\n", server).as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.content_length()).as_bytes());
        out.extend_from_slice(
            format!(
                "Connection: {}\r\n",
                if keep_alive { "keep-alive" } else { "close" }
            )
            .as_bytes(),
        );
        out.extend_from_slice(b"\r\n");
        out
    }

    pub fn redirect(code: u16, location: &str) -> HttpResponse {
        let mut res = HttpResponse::new(code);
        res.set_header("Location", location);
        res
    }
}

fn to_pascal_case(name: &str) -> String {
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Replaces the response content with the configured error page for `code`,
/// or a generated fallback page when none is configured or readable.
pub fn handle_error(res: &mut HttpResponse, code: u16, s_cfg: Option<&Arc<ServerConfig>>) {
    res.set_status_code(code);

    if let Some(cfg) = s_cfg {
        if let Some(page) = cfg.error_page(code) {
            if let Ok(content) = fs::read(page) {
                res.set_body(content, "text/html");
                return;
            }
        }
    }

    let reason = HttpResponse::status_text(code);
    let body = format!(
        "<html><head><title>{code} {reason}</title></head>\
         <body><h1>{code} {reason}</h1></body></html>"
    );
    res.set_body(body.into_bytes(), "text/html");
}
