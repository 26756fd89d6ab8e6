use std::process::{Child, ChildStdout, Command, Stdio};

use crate::prelude::*;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// A launched CGI child. Ownership moves from the response builder to the
/// connection exactly once; from then on the per-tick sweep drains its
/// stdout and watches the deadline.
#[derive(Debug)]
pub struct CgiProcess {
    child: Child,
    stdout: Option<ChildStdout>,
    pub output: Vec<u8>,
    pub started: Instant,
}

pub enum CgiPoll {
    Running,
    Finished(HttpResponse),
    Failed(u16),
}

/// Starts the script and feeds it the request body, without waiting for it
/// to exit. Returns the status code to answer with when the launch fails.
pub fn launch(script: &Path, request: &HttpRequest, peer: Option<SocketAddr>) -> std::result::Result<CgiProcess, u16> {
    let metadata = fs::metadata(script).map_err(|_| HTTP_NOT_FOUND)?;
    if !metadata.is_file() {
        return Err(HTTP_NOT_FOUND);
    }
    #[cfg(unix)]
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(HTTP_FORBIDDEN);
    }

    let mut cmd = match script.extension().and_then(|e| e.to_str()) {
        Some("py") => {
            let mut c = Command::new("python3");
            c.arg(script);
            c
        }
        Some("sh") => {
            let mut c = Command::new("bash");
            c.arg(script);
            c
        }
        _ => Command::new(script),
    };

    if let Some(dir) = script.parent() {
        cmd.current_dir(dir);
    }
    cmd.envs(build_cgi_env(script, request, peer))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|e| {
        warn!("CGI spawn failed for {}: {}", script.display(), e);
        HTTP_INTERNAL_SERVER_ERROR
    })?;

    // The body goes to the child's stdin in full, then the pipe closes so
    // the script sees EOF. A child that exits without reading is not an
    // error on our side.
    if let Some(mut stdin) = child.stdin.take() {
        let wrote = match &request.body {
            Body::Bytes(bytes) => stdin.write_all(bytes),
            Body::Spilled(tmp) => tmp
                .reopen()
                .and_then(|mut f| io::copy(&mut f, &mut stdin).map(|_| ())),
            Body::Empty | Body::Parts(_) => Ok(()),
        };
        if let Err(e) = wrote {
            if e.kind() != ErrorKind::BrokenPipe {
                warn!("writing CGI stdin: {}", e);
            }
        }
    }

    let stdout = child.stdout.take();
    if let Some(out) = &stdout {
        #[cfg(unix)]
        if let Err(e) = set_nonblocking(out) {
            warn!("cannot set CGI stdout non-blocking: {}", e);
        }
    }

    Ok(CgiProcess {
        child,
        stdout,
        output: Vec::new(),
        started: Instant::now(),
    })
}

impl CgiProcess {
    /// Non-blocking drain of available stdout bytes into the accumulator.
    fn drain_stdout(&mut self) -> io::Result<()> {
        let mut eof = false;
        if let Some(out) = self.stdout.as_mut() {
            let mut buf = [0u8; 4096];
            loop {
                match out.read(&mut buf) {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => {
                        self.output.extend_from_slice(&buf[..n]);
                        if self.output.len() > CGI_OUTPUT_CAP {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        if eof {
            self.stdout = None;
        }
        Ok(())
    }

    /// Kills the child if needed and tries to reap it. A child that could
    /// not be reaped yet is handed back for the server's purgatory list.
    pub fn shutdown(mut self) -> Option<Child> {
        let _ = self.child.kill();
        match self.child.try_wait() {
            Ok(Some(_)) => None,
            _ => Some(self.child),
        }
    }
}

/// One sweep tick: drain, enforce the output cap and the wall-clock
/// deadline, and on exit parse the CGI document into a response.
pub fn poll_cgi(cgi: &mut CgiProcess) -> CgiPoll {
    if let Err(e) = cgi.drain_stdout() {
        warn!("reading CGI stdout: {}", e);
        return CgiPoll::Failed(HTTP_INTERNAL_SERVER_ERROR);
    }
    if cgi.output.len() > CGI_OUTPUT_CAP {
        return CgiPoll::Failed(HTTP_PAYLOAD_TOO_LARGE);
    }
    if cgi.started.elapsed() >= CGI_TIMEOUT {
        return CgiPoll::Failed(HTTP_REQUEST_TIMEOUT);
    }

    match cgi.child.try_wait() {
        Ok(Some(status)) => {
            if let Err(e) = cgi.drain_stdout() {
                warn!("reading CGI stdout: {}", e);
                return CgiPoll::Failed(HTTP_INTERNAL_SERVER_ERROR);
            }
            if cgi.output.len() > CGI_OUTPUT_CAP {
                return CgiPoll::Failed(HTTP_PAYLOAD_TOO_LARGE);
            }
            if cgi.output.is_empty() && !status.success() {
                return CgiPoll::Failed(HTTP_INTERNAL_SERVER_ERROR);
            }
            CgiPoll::Finished(response_from_cgi_output(&cgi.output))
        }
        Ok(None) => CgiPoll::Running,
        Err(e) => {
            warn!("waiting on CGI child: {}", e);
            CgiPoll::Failed(HTTP_INTERNAL_SERVER_ERROR)
        }
    }
}

pub fn build_cgi_env(
    script: &Path,
    request: &HttpRequest,
    peer: Option<SocketAddr>,
) -> HashMap<String, String> {
    let mut envs = HashMap::new();
    let script_path = script.to_string_lossy().into_owned();

    envs.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    envs.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    envs.insert("REQUEST_METHOD".to_string(), request.method().to_string());
    envs.insert("REQUEST_URI".to_string(), request.target());
    envs.insert("SCRIPT_NAME".to_string(), request.path.clone());
    envs.insert("PATH_INFO".to_string(), script_path);
    envs.insert(
        "QUERY_STRING".to_string(),
        request.query.clone().unwrap_or_default(),
    );

    if let Some(ct) = request.headers.first("content-type") {
        envs.insert("CONTENT_TYPE".to_string(), ct.to_string());
    }
    envs.insert(
        "CONTENT_LENGTH".to_string(),
        request.body_len().to_string(),
    );

    if let Some(addr) = peer {
        envs.insert("REMOTE_ADDR".to_string(), addr.ip().to_string());
        envs.insert("REMOTE_PORT".to_string(), addr.port().to_string());
    }
    if let Some(host) = request.headers.first("host") {
        envs.insert("SERVER_NAME".to_string(), host.to_string());
    }

    for (name, value) in request.headers.iter() {
        let env_key = format!("HTTP_{}", name.to_uppercase().replace('-', "_"));
        envs.insert(env_key, value.to_string());
    }

    envs
}

/// Parses a CGI document: an optional header block terminated by a blank
/// line, then the body. A `Status: NNN` pseudo-header sets the status; all
/// other header lines are copied. Without a header block the entire output
/// is the body with status 200.
pub fn response_from_cgi_output(raw: &[u8]) -> HttpResponse {
    let mut response = HttpResponse::new(HTTP_OK);

    match split_cgi_document(raw) {
        Some((head, body)) => {
            let (status, headers) = parse_cgi_headers(&head);
            response.set_status_code(status);
            for (name, value) in headers {
                response.set_header(&name, &value);
            }
            response.body = ResponseBody::Bytes(body);
        }
        None => {
            response.body = ResponseBody::Bytes(raw.to_vec());
        }
    }
    response
}

pub fn parse_cgi_headers(head: &str) -> (u16, Vec<(String, String)>) {
    let mut status = HTTP_OK;
    let mut headers = Vec::new();

    for line in head.lines() {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_lowercase();
            let value = value.trim().to_string();
            if name == "status" {
                // "Status: 404 Not Found" -- only the digits matter.
                status = value
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(HTTP_OK);
            } else {
                headers.push((name, value));
            }
        }
    }
    (status, headers)
}

fn split_cgi_document(raw: &[u8]) -> Option<(String, Vec<u8>)> {
    let (pos, sep_len) = match find_subsequence(raw, b"\r\n\r\n", 0) {
        Some(p) => (p, 4),
        None => (find_subsequence(raw, b"\n\n", 0)?, 2),
    };
    let head = std::str::from_utf8(&raw[..pos]).ok()?;
    // Only treat the prefix as a header block if every line looks like one;
    // otherwise the whole output is the body.
    if head.lines().any(|l| !l.is_empty() && !l.contains(':')) {
        return None;
    }
    Some((head.to_string(), raw[pos + sep_len..].to_vec()))
}

#[cfg(unix)]
fn set_nonblocking(out: &ChildStdout) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = out.as_raw_fd();
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
