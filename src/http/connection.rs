use std::process::Child;

use crate::cgi::{self, CgiPoll, CgiProcess};
use crate::handlers::*;
use crate::prelude::*;
use crate::router::{Handler, route_request};
use crate::utils::session::SessionStore;

#[derive(Debug)]
pub struct FileStream {
    pub file: File,
    pub size: u64,
    pub offset: u64,
}

/// Per-connection orchestrator. The event loop calls `on_readable`,
/// `on_writable` and `sweep_cgi`; everything else is internal plumbing
/// between the parser, the router, the handlers and the write queue.
#[derive(Debug)]
pub struct HttpConnection {
    pub stream: TcpStream,
    pub parser: RequestParser,
    pub write_queue: VecDeque<Vec<u8>>,
    pub file_stream: Option<FileStream>,
    pub pending_cgi: Option<CgiProcess>,
    pub config_list: Vec<Arc<ServerConfig>>,
    pub server_token: Arc<String>,
    pub peer: Option<SocketAddr>,
    pub keep_alive: bool,
    pub closing: bool,
    pub registered: bool,
    pub last_activity: Instant,
}

impl HttpConnection {
    pub fn new(
        stream: TcpStream,
        config_list: Vec<Arc<ServerConfig>>,
        server_token: Arc<String>,
    ) -> Self {
        // The vhost is only known once the Host header is in, so the parser
        // takes the most permissive limit on this socket; the exact per-vhost
        // limit is re-checked after routing.
        let limit = config_list
            .iter()
            .map(|c| c.max_body_size)
            .max()
            .unwrap_or(usize::MAX);
        let peer = stream.peer_addr().ok();
        HttpConnection {
            stream,
            parser: RequestParser::new(limit),
            write_queue: VecDeque::new(),
            file_stream: None,
            pending_cgi: None,
            config_list,
            server_token,
            peer,
            keep_alive: true,
            closing: false,
            registered: true,
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Nothing queued, nothing streaming: the connection is waiting for the
    /// next request.
    fn idle_state(&self) -> bool {
        self.write_queue.is_empty()
            && self.file_stream.is_none()
            && self.pending_cgi.is_none()
            && !self.closing
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Virtual-host selection: Host header against server_name, then the
    /// default server, then the first config on the socket.
    pub fn resolve_config(&self, request: &HttpRequest) -> Arc<ServerConfig> {
        if let Some(host_header) = request.headers.first("host") {
            let hostname = host_header.split(':').next().unwrap_or("");
            for config in &self.config_list {
                if config.server_name == hostname {
                    return Arc::clone(config);
                }
            }
        }
        for config in &self.config_list {
            if config.default_server {
                return Arc::clone(config);
            }
        }
        Arc::clone(&self.config_list[0])
    }

    fn default_config(&self) -> Option<Arc<ServerConfig>> {
        self.config_list
            .iter()
            .find(|c| c.default_server)
            .or_else(|| self.config_list.first())
            .cloned()
    }

    fn set_interest(&mut self, poll: &Poll, token: Token, interest: Interest) -> io::Result<()> {
        if self.registered {
            poll.registry()
                .reregister(&mut self.stream, token, interest)
        } else {
            poll.registry().register(&mut self.stream, token, interest)?;
            self.registered = true;
            Ok(())
        }
    }

    /// Returns true when the connection should be closed.
    pub fn on_readable(
        &mut self,
        poll: &Poll,
        token: Token,
        sessions: &mut SessionStore,
    ) -> io::Result<bool> {
        self.touch();

        // One bounded read per tick keeps connections fair.
        let mut buf = [0u8; READ_BUF_SIZE];
        match self.stream.read(&mut buf) {
            Ok(0) => Ok(true),
            Ok(n) => {
                trace!("read {} bytes from {:?}", n, self.peer);
                self.drive(poll, token, sessions, &buf[..n])?;
                // The selector is edge-triggered: re-arm so bytes still
                // queued in the kernel produce another readable tick.
                if self.idle_state() {
                    self.set_interest(poll, token, Interest::READABLE)?;
                }
                Ok(false)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
            Err(e) => {
                debug!("read error from {:?}: {}", self.peer, e);
                Ok(true)
            }
        }
    }

    /// Feeds the parser and drains every request it can complete, in order.
    /// The loop stops early when a response streams (file or CGI): its bytes
    /// must hit the wire before any pipelined successor is even parsed.
    fn drive(
        &mut self,
        poll: &Poll,
        token: Token,
        sessions: &mut SessionStore,
        input: &[u8],
    ) -> io::Result<()> {
        let mut input = input;
        loop {
            match self.parser.parse(input) {
                ParseResult::NeedMore => break,
                ParseResult::Error(err) => {
                    let status = err.status();
                    warn!("parse error from {:?}: {} -> {}", self.peer, err, status);
                    let mut response = HttpResponse::new(status);
                    let cfg = self.default_config();
                    handle_error(&mut response, status, cfg.as_ref());
                    self.keep_alive = false;
                    self.closing = true;
                    let bytes = response.to_bytes(false, &self.server_token);
                    self.write_queue.push_back(bytes);
                    self.set_interest(poll, token, Interest::WRITABLE)?;
                    return Ok(());
                }
                ParseResult::Complete(request) => {
                    debug!(
                        "{} {} {} from {:?}",
                        request.method(),
                        request.path,
                        request.version,
                        self.peer
                    );
                    let response = self.handle_request(request, sessions);
                    self.parser.advance();
                    let streaming = self.finalize_response(poll, token, response)?;
                    if streaming {
                        return Ok(());
                    }
                }
            }
            input = &[];
        }
        Ok(())
    }

    fn handle_request(
        &mut self,
        mut request: HttpRequest,
        sessions: &mut SessionStore,
    ) -> HttpResponse {
        let s_cfg = self.resolve_config(&request);
        self.keep_alive = keep_alive_for(&request);

        let mut response = HttpResponse::new(HTTP_OK);

        // The parser enforced the socket-wide limit; this is the resolved
        // vhost's exact one.
        if request.body_len() > s_cfg.max_body_size as u64 {
            handle_error(&mut response, HTTP_PAYLOAD_TOO_LARGE, Some(&s_cfg));
            self.keep_alive = false;
            self.closing = true;
            return response;
        }

        let outcome: std::result::Result<(), u16> = match route_request(&request, &s_cfg) {
            Handler::StaticFile(path) => handle_static_file(&mut response, &path),
            Handler::Directory(path) => handle_directory(&mut response, &path, &request.path),
            Handler::Upload { target, route } => {
                handle_upload(&mut request, &mut response, &route, &target)
            }
            Handler::Delete(path) => handle_delete(&mut response, &path),
            Handler::Redirect { code, location } => {
                response = HttpResponse::redirect(code, &location);
                Ok(())
            }
            Handler::Error(code) => Err(code),
            Handler::Session => {
                sessions.handle(&request, &mut response);
                Ok(())
            }
            Handler::Cgi { script } => match cgi::launch(&script, &request, self.peer) {
                Ok(process) => {
                    response.set_pending_process(process);
                    Ok(())
                }
                Err(code) => Err(code),
            },
        };

        if let Err(code) = outcome {
            handle_error(&mut response, code, Some(&s_cfg));
            if code == HTTP_INTERNAL_SERVER_ERROR {
                self.keep_alive = false;
                self.closing = true;
            }
        }

        response
    }

    /// Queues the response for delivery. Returns true when the response is
    /// not yet complete (file stream or pending CGI) and the drain loop must
    /// pause until it is.
    fn finalize_response(
        &mut self,
        poll: &Poll,
        token: Token,
        mut response: HttpResponse,
    ) -> io::Result<bool> {
        if let Some(process) = response.take_pending_process() {
            // Ownership of the child moves here; the sweep completes the
            // request. No readiness interest until then.
            self.pending_cgi = Some(process);
            if self.registered {
                poll.registry().deregister(&mut self.stream)?;
                self.registered = false;
            }
            return Ok(true);
        }

        let file_body = match &response.body {
            ResponseBody::File { path, size } => Some((path.clone(), *size)),
            _ => None,
        };
        if let Some((path, size)) = file_body {
            match File::open(&path) {
                Ok(file) => {
                    let head = response.to_bytes_headers_only(self.keep_alive, &self.server_token);
                    self.write_queue.push_back(head);
                    self.file_stream = Some(FileStream {
                        file,
                        size,
                        offset: 0,
                    });
                    self.set_interest(poll, token, Interest::WRITABLE)?;
                    return Ok(true);
                }
                Err(e) => {
                    warn!("cannot open {} for streaming: {}", path.display(), e);
                    let cfg = self.default_config();
                    handle_error(&mut response, HTTP_INTERNAL_SERVER_ERROR, cfg.as_ref());
                    self.keep_alive = false;
                    self.closing = true;
                }
            }
        }

        let bytes = response.to_bytes(self.keep_alive, &self.server_token);
        self.write_queue.push_back(bytes);
        self.set_interest(poll, token, Interest::WRITABLE)?;
        Ok(false)
    }

    /// Returns true when the connection should be closed.
    pub fn on_writable(
        &mut self,
        poll: &Poll,
        token: Token,
        sessions: &mut SessionStore,
    ) -> io::Result<bool> {
        self.touch();

        // Buffered bytes first, one chunk per tick. The edge-triggered
        // selector needs the interest re-armed while work remains.
        if let Some(front) = self.write_queue.front_mut() {
            match self.stream.write(front) {
                Ok(n) => {
                    front.drain(..n);
                    if front.is_empty() {
                        self.write_queue.pop_front();
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!("write error to {:?}: {}", self.peer, e);
                    return Ok(true);
                }
            }
            self.set_interest(poll, token, Interest::WRITABLE)?;
            return Ok(false);
        }

        // Then at most one file slice.
        if self.file_stream.is_some() {
            let finished = {
                let Some(fstream) = self.file_stream.as_mut() else {
                    return Ok(false);
                };
                match transfer_slice(&mut self.stream, fstream) {
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => {
                        debug!("file stream error to {:?}: {}", self.peer, e);
                        return Ok(true);
                    }
                }
                fstream.offset >= fstream.size
            };
            if finished {
                self.file_stream = None;
            }
            self.set_interest(poll, token, Interest::WRITABLE)?;
            return Ok(false);
        }

        // Queue empty, no file left: the response is fully on the wire.
        if self.closing || !self.keep_alive {
            return Ok(true);
        }
        self.set_interest(poll, token, Interest::READABLE)?;
        // Pipelined bytes that arrived with an earlier request are waiting in
        // the parser's accumulation buffer.
        self.drive(poll, token, sessions, &[])?;
        Ok(false)
    }

    /// Per-tick CGI progress check: drain stdout, enforce the output cap and
    /// the deadline, finalize the response once the child exits.
    pub fn sweep_cgi(
        &mut self,
        poll: &Poll,
        token: Token,
        purgatory: &mut Vec<Child>,
    ) -> io::Result<bool> {
        let outcome = match self.pending_cgi.as_mut() {
            None => return Ok(false),
            Some(cgi) => cgi::poll_cgi(cgi),
        };

        match outcome {
            CgiPoll::Running => Ok(false),
            CgiPoll::Finished(response) => {
                self.reap_pending(purgatory);
                self.touch();
                let bytes = response.to_bytes(self.keep_alive, &self.server_token);
                self.write_queue.push_back(bytes);
                self.set_interest(poll, token, Interest::WRITABLE)?;
                Ok(false)
            }
            CgiPoll::Failed(code) => {
                info!("CGI failed with {} for {:?}", code, self.peer);
                self.reap_pending(purgatory);
                self.touch();
                let mut response = HttpResponse::new(code);
                let cfg = self.default_config();
                handle_error(&mut response, code, cfg.as_ref());
                self.keep_alive = false;
                self.closing = true;
                self.write_queue.push_back(response.to_bytes(false, &self.server_token));
                self.set_interest(poll, token, Interest::WRITABLE)?;
                Ok(false)
            }
        }
    }

    pub fn reap_pending(&mut self, purgatory: &mut Vec<Child>) {
        if let Some(cgi) = self.pending_cgi.take() {
            if let Some(zombie) = cgi.shutdown() {
                purgatory.push(zombie);
            }
        }
    }
}

fn keep_alive_for(request: &HttpRequest) -> bool {
    let connection = request
        .headers
        .first("connection")
        .map(|v| v.trim().to_ascii_lowercase());
    match request.version.as_str() {
        // HTTP/1.0 keeps the connection only on an explicit opt-in.
        "HTTP/1.0" => connection.as_deref() == Some("keep-alive"),
        _ => connection.as_deref() != Some("close"),
    }
}

/// Pushes up to FILE_SLICE bytes of the file at the current offset. On Linux
/// this is sendfile(2); elsewhere a read/write fallback.
#[cfg(target_os = "linux")]
fn transfer_slice(stream: &mut TcpStream, fstream: &mut FileStream) -> io::Result<usize> {
    use std::os::fd::AsRawFd;

    let count = FILE_SLICE.min((fstream.size - fstream.offset) as usize);
    let mut offset = fstream.offset as libc::off_t;
    let sent = unsafe {
        libc::sendfile(
            stream.as_raw_fd(),
            fstream.file.as_raw_fd(),
            &mut offset,
            count,
        )
    };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    fstream.offset = offset as u64;
    Ok(sent as usize)
}

#[cfg(not(target_os = "linux"))]
fn transfer_slice(stream: &mut TcpStream, fstream: &mut FileStream) -> io::Result<usize> {
    use std::io::{Seek, SeekFrom};

    let count = FILE_SLICE.min((fstream.size - fstream.offset) as usize);
    let mut buf = vec![0u8; count];
    fstream.file.seek(SeekFrom::Start(fstream.offset))?;
    let read = fstream.file.read(&mut buf)?;
    if read == 0 {
        // File shrank underneath us; report what we have as the end.
        fstream.offset = fstream.size;
        return Ok(0);
    }
    let written = stream.write(&buf[..read])?;
    fstream.offset += written as u64;
    Ok(written)
}
