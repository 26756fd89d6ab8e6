use std::collections::HashMap;
use std::str::FromStr;

use quick_error::quick_error;

use crate::http::body::{Body, TempFile};
use crate::http::headers::{HeaderError, HeaderStore};
use crate::http::multipart::{MultipartParser, param_value};
use crate::prelude::{
    HTTP_BAD_REQUEST, HTTP_FORBIDDEN, HTTP_INTERNAL_SERVER_ERROR, HTTP_NOT_IMPLEMENTED,
    HTTP_PAYLOAD_TOO_LARGE, HTTP_URI_TOO_LONG, MAX_HEADER_BLOCK, MAX_LEADING_CRLF, MAX_REQUEST_LINE,
    MAX_URI, SPILL_THRESHOLD,
};
use crate::utils::cookie::Cookies;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    DELETE,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

quick_error! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ParseError {
        TooManyEmptyLines {
            display("too many empty lines before request")
        }
        RequestLineTooLarge {
            display("request line too large")
        }
        UriTooLong {
            display("request target too long")
        }
        MalformedRequestLine {
            display("malformed request line")
        }
        InvalidMethod {
            display("unrecognized method")
        }
        InvalidVersion {
            display("unsupported HTTP version")
        }
        PathTraversal {
            display("path traversal")
        }
        HeaderBlockTooLarge {
            display("header block too large")
        }
        MalformedHeader {
            display("malformed header line")
        }
        Header(err: HeaderError) {
            display("{}", err)
            from()
        }
        PayloadTooLarge {
            display("body too large")
        }
        InvalidChunkSize {
            display("invalid chunk size line")
        }
        InvalidChunkFraming {
            display("missing CRLF after chunk data")
        }
        InvalidMultipart {
            display("malformed multipart body")
        }
        FieldTooLarge {
            display("multipart field exceeds in-memory cap")
        }
        Io(msg: String) {
            display("I/O error while buffering body: {}", msg)
        }
    }
}

impl ParseError {
    /// Status code this error maps to at the connection boundary.
    pub fn status(&self) -> u16 {
        match self {
            ParseError::PayloadTooLarge | ParseError::FieldTooLarge => HTTP_PAYLOAD_TOO_LARGE,
            ParseError::PathTraversal => HTTP_FORBIDDEN,
            ParseError::UriTooLong => HTTP_URI_TOO_LONG,
            ParseError::Header(HeaderError::UnsupportedTransferEncoding) => HTTP_NOT_IMPLEMENTED,
            ParseError::Io(_) => HTTP_INTERNAL_SERVER_ERROR,
            _ => HTTP_BAD_REQUEST,
        }
    }
}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> Self {
        ParseError::Io(err.to_string())
    }
}

/// A fully parsed request, ready for routing.
#[derive(Debug, Default)]
pub struct HttpRequest {
    pub method: Option<Method>,
    pub path: String,
    pub query: Option<String>,
    pub version: String,
    pub headers: HeaderStore,
    pub cookies: HashMap<String, String>,
    pub body: Body,
}

impl HttpRequest {
    pub fn method(&self) -> Method {
        self.method.unwrap_or(Method::GET)
    }

    /// Original request target, percent-decoded path plus raw query.
    pub fn target(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    pub fn body_len(&self) -> u64 {
        self.body.len()
    }
}

#[derive(Debug, PartialEq)]
pub enum ParsingState {
    RequestLine,
    Headers,
    BodyFixed,
    ChunkSize,
    ChunkData(usize),
    ChunkTrailer,
    Multipart,
    Complete,
    Error,
}

#[derive(Debug)]
pub enum ParseResult {
    NeedMore,
    Complete(HttpRequest),
    Error(ParseError),
}

/// Incremental HTTP/1.1 request parser.
///
/// Bytes are appended to a single accumulation buffer and the state machine
/// advances as far as the input permits. On completion, unconsumed trailing
/// bytes stay in the buffer so the next pipelined request on the same
/// connection picks up where this one ended: `advance()` resets the
/// per-request state and keeps the buffer, `reset()` clears both.
#[derive(Debug)]
pub struct RequestParser {
    buffer: Vec<u8>,
    state: ParsingState,
    error: Option<ParseError>,
    max_body_size: usize,
    crlf_skipped: usize,

    method: Option<Method>,
    path: String,
    query: Option<String>,
    version: String,
    headers: HeaderStore,
    cookies: HashMap<String, String>,

    body_expected: usize,
    body_read: usize,
    body_buf: Vec<u8>,
    spill: Option<TempFile>,
    multipart: Option<MultipartParser>,
}

impl RequestParser {
    pub fn new(max_body_size: usize) -> Self {
        RequestParser {
            buffer: Vec::with_capacity(4096),
            state: ParsingState::RequestLine,
            error: None,
            max_body_size,
            crlf_skipped: 0,
            method: None,
            path: String::new(),
            query: None,
            version: String::new(),
            headers: HeaderStore::new(),
            cookies: HashMap::new(),
            body_expected: 0,
            body_read: 0,
            body_buf: Vec::new(),
            spill: None,
            multipart: None,
        }
    }

    pub fn state(&self) -> &ParsingState {
        &self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Resets the per-request state but keeps buffered bytes for the next
    /// pipelined request.
    pub fn advance(&mut self) {
        self.state = ParsingState::RequestLine;
        self.error = None;
        self.crlf_skipped = 0;
        self.method = None;
        self.path.clear();
        self.query = None;
        self.version.clear();
        self.headers = HeaderStore::new();
        self.cookies.clear();
        self.body_expected = 0;
        self.body_read = 0;
        self.body_buf = Vec::new();
        self.spill = None;
        self.multipart = None;
    }

    /// Full reset: per-request state and the accumulation buffer.
    pub fn reset(&mut self) {
        self.advance();
        self.buffer.clear();
    }

    pub fn parse(&mut self, input: &[u8]) -> ParseResult {
        if !input.is_empty() {
            self.buffer.extend_from_slice(input);
        }
        if let Some(err) = &self.error {
            return ParseResult::Error(err.clone());
        }
        if self.state == ParsingState::Complete {
            return ParseResult::NeedMore;
        }

        loop {
            let step = match self.state {
                ParsingState::RequestLine => self.step_request_line(),
                ParsingState::Headers => self.step_headers(),
                ParsingState::BodyFixed => self.step_body_fixed(),
                ParsingState::ChunkSize => self.step_chunk_size(),
                ParsingState::ChunkData(remaining) => self.step_chunk_data(remaining),
                ParsingState::ChunkTrailer => self.step_chunk_trailer(),
                ParsingState::Multipart => self.step_multipart(),
                ParsingState::Complete => break,
                ParsingState::Error => {
                    let err = self
                        .error
                        .clone()
                        .unwrap_or(ParseError::MalformedRequestLine);
                    return ParseResult::Error(err);
                }
            };
            match step {
                Ok(true) => continue,
                Ok(false) => return ParseResult::NeedMore,
                Err(err) => {
                    self.state = ParsingState::Error;
                    self.error = Some(err.clone());
                    return ParseResult::Error(err);
                }
            }
        }

        ParseResult::Complete(self.take_request())
    }

    fn take_request(&mut self) -> HttpRequest {
        let body = if let Some(mp) = self.multipart.take() {
            Body::Parts(mp.into_parts())
        } else if let Some(tmp) = self.spill.take() {
            Body::Spilled(tmp)
        } else if self.body_buf.is_empty() {
            Body::Empty
        } else {
            Body::Bytes(std::mem::take(&mut self.body_buf))
        };

        HttpRequest {
            method: self.method.take(),
            path: std::mem::take(&mut self.path),
            query: self.query.take(),
            version: std::mem::take(&mut self.version),
            headers: std::mem::take(&mut self.headers),
            cookies: std::mem::take(&mut self.cookies),
            body,
        }
    }

    // Progressed -> Ok(true); starved for input -> Ok(false).

    fn step_request_line(&mut self) -> Result<bool, ParseError> {
        // Keep-alive noise tolerance: a handful of stray CRLF pairs between
        // requests is accepted, a flood is not.
        while self.buffer.starts_with(b"\r\n") {
            if self.crlf_skipped == MAX_LEADING_CRLF {
                return Err(ParseError::TooManyEmptyLines);
            }
            self.buffer.drain(..2);
            self.crlf_skipped += 1;
        }

        let Some(line_end) = find_crlf(&self.buffer, 0) else {
            if self.buffer.len() >= MAX_REQUEST_LINE {
                return Err(ParseError::RequestLineTooLarge);
            }
            return Ok(false);
        };
        if line_end > MAX_REQUEST_LINE {
            return Err(ParseError::RequestLineTooLarge);
        }

        let line = std::str::from_utf8(&self.buffer[..line_end])
            .map_err(|_| ParseError::MalformedRequestLine)?;
        let mut tokens = line.split(' ');
        let (Some(method), Some(target), Some(version), None) = (
            tokens.next(),
            tokens.next(),
            tokens.next(),
            tokens.next(),
        ) else {
            return Err(ParseError::MalformedRequestLine);
        };
        if method.is_empty() || target.is_empty() || version.is_empty() {
            return Err(ParseError::MalformedRequestLine);
        }

        self.method = Some(method.parse()?);

        if target.len() > MAX_URI {
            return Err(ParseError::UriTooLong);
        }
        let target = target.split('#').next().unwrap_or(target);
        let (raw_path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (target, None),
        };
        if has_dotdot_segment(raw_path) {
            return Err(ParseError::PathTraversal);
        }
        let decoded = percent_decode(raw_path)?;
        if has_dotdot_segment(&decoded) {
            return Err(ParseError::PathTraversal);
        }

        if version != "HTTP/1.0" && version != "HTTP/1.1" {
            return Err(ParseError::InvalidVersion);
        }

        self.path = decoded;
        self.query = query;
        self.version = version.to_string();
        self.buffer.drain(..line_end + 2);
        self.state = ParsingState::Headers;
        Ok(true)
    }

    fn step_headers(&mut self) -> Result<bool, ParseError> {
        let block_len = if self.buffer.starts_with(b"\r\n") {
            0
        } else {
            match find_subsequence(&self.buffer, b"\r\n\r\n", 0) {
                Some(pos) => pos + 2,
                None => {
                    if self.buffer.len() > MAX_HEADER_BLOCK {
                        return Err(ParseError::HeaderBlockTooLarge);
                    }
                    return Ok(false);
                }
            }
        };
        if block_len > MAX_HEADER_BLOCK {
            return Err(ParseError::HeaderBlockTooLarge);
        }

        let block = std::str::from_utf8(&self.buffer[..block_len])
            .map_err(|_| ParseError::MalformedHeader)?
            .to_string();
        self.buffer.drain(..block_len + 2);

        let mut last_name: Option<String> = None;
        for line in block.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                // Obsolete line folding: the fragment belongs to the header
                // on the previous line.
                let Some(name) = &last_name else {
                    return Err(ParseError::MalformedHeader);
                };
                let prev = match self.headers.all(name).last() {
                    Some(v) => v.to_string(),
                    None => return Err(ParseError::MalformedHeader),
                };
                let merged = format!("{} {}", prev, line.trim());
                self.replace_last(name, &merged);
                continue;
            }
            let Some(colon) = line.find(':') else {
                return Err(ParseError::MalformedHeader);
            };
            let name = line[..colon].trim().to_ascii_lowercase();
            if name.is_empty() {
                return Err(ParseError::MalformedHeader);
            }
            let value = line[colon + 1..].trim().to_string();
            if name == "cookie" {
                for (k, v) in Cookies::parse(&value).into_iter() {
                    self.cookies.insert(k, v);
                }
            }
            self.headers.add(&name, &value);
            last_name = Some(name);
        }

        let require_host = self.version == "HTTP/1.1";
        self.headers.validate(require_host)?;

        self.dispatch_body()
    }

    fn replace_last(&mut self, name: &str, merged: &str) {
        // HeaderStore is append-only from the parser's point of view; folding
        // rewrites the most recent value for `name`.
        let all: Vec<String> = self.headers.all(name).iter().map(|v| v.to_string()).collect();
        self.headers.remove(name);
        for (i, v) in all.iter().enumerate() {
            if i + 1 == all.len() {
                self.headers.add(name, merged);
            } else {
                self.headers.add(name, v);
            }
        }
    }

    fn dispatch_body(&mut self) -> Result<bool, ParseError> {
        if self.headers.is_chunked() {
            self.state = ParsingState::ChunkSize;
            return Ok(true);
        }

        let content_length = self.headers.content_length().unwrap_or(0) as usize;
        if content_length > self.max_body_size {
            return Err(ParseError::PayloadTooLarge);
        }
        if content_length == 0 {
            self.state = ParsingState::Complete;
            return Ok(true);
        }

        let content_type = self.headers.first("content-type").unwrap_or("");
        if content_type
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("multipart/form-data")
        {
            let Some(boundary) = param_value(content_type, "boundary") else {
                return Err(ParseError::InvalidMultipart);
            };
            self.multipart = Some(MultipartParser::new(&boundary));
            self.body_expected = content_length;
            self.state = ParsingState::Multipart;
            return Ok(true);
        }

        self.body_expected = content_length;
        if content_length > SPILL_THRESHOLD {
            self.spill = Some(TempFile::create()?);
        } else {
            self.body_buf.reserve(content_length);
        }
        self.state = ParsingState::BodyFixed;
        Ok(true)
    }

    fn append_body(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if self.spill.is_none() && self.body_buf.len() + data.len() > SPILL_THRESHOLD {
            let mut tmp = TempFile::create()?;
            tmp.write(&self.body_buf)?;
            self.body_buf = Vec::new();
            self.spill = Some(tmp);
        }
        match &mut self.spill {
            Some(tmp) => tmp.write(data)?,
            None => self.body_buf.extend_from_slice(data),
        }
        Ok(())
    }

    fn step_body_fixed(&mut self) -> Result<bool, ParseError> {
        if self.buffer.is_empty() {
            return Ok(false);
        }
        let wanted = self.body_expected - self.body_read;
        let take = wanted.min(self.buffer.len());
        let data: Vec<u8> = self.buffer.drain(..take).collect();
        self.append_body(&data)?;
        self.body_read += take;

        if self.body_read == self.body_expected {
            self.state = ParsingState::Complete;
            return Ok(true);
        }
        Ok(false)
    }

    fn step_chunk_size(&mut self) -> Result<bool, ParseError> {
        let Some(line_end) = find_crlf(&self.buffer, 0) else {
            if self.buffer.len() > 1024 {
                return Err(ParseError::InvalidChunkSize);
            }
            return Ok(false);
        };
        let line = std::str::from_utf8(&self.buffer[..line_end])
            .map_err(|_| ParseError::InvalidChunkSize)?;
        // Chunk extensions after ';' are tolerated and ignored.
        let size_str = line.split(';').next().unwrap_or(line).trim();
        let size =
            usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunkSize)?;
        if self.body_read + size > self.max_body_size {
            return Err(ParseError::PayloadTooLarge);
        }
        self.buffer.drain(..line_end + 2);
        self.state = if size == 0 {
            ParsingState::ChunkTrailer
        } else {
            ParsingState::ChunkData(size)
        };
        Ok(true)
    }

    fn step_chunk_data(&mut self, remaining: usize) -> Result<bool, ParseError> {
        let mut remaining = remaining;
        if remaining > 0 {
            if self.buffer.is_empty() {
                return Ok(false);
            }
            let take = remaining.min(self.buffer.len());
            let data: Vec<u8> = self.buffer.drain(..take).collect();
            self.append_body(&data)?;
            self.body_read += take;
            remaining -= take;
            self.state = ParsingState::ChunkData(remaining);
            if remaining > 0 {
                return Ok(false);
            }
        }
        // Chunk payload is followed by its own CRLF.
        if self.buffer.len() < 2 {
            return Ok(false);
        }
        if &self.buffer[..2] != b"\r\n" {
            return Err(ParseError::InvalidChunkFraming);
        }
        self.buffer.drain(..2);
        self.state = ParsingState::ChunkSize;
        Ok(true)
    }

    fn step_chunk_trailer(&mut self) -> Result<bool, ParseError> {
        loop {
            if self.buffer.starts_with(b"\r\n") {
                self.buffer.drain(..2);
                self.state = ParsingState::Complete;
                return Ok(true);
            }
            let Some(line_end) = find_crlf(&self.buffer, 0) else {
                if self.buffer.len() > MAX_HEADER_BLOCK {
                    return Err(ParseError::HeaderBlockTooLarge);
                }
                return Ok(false);
            };
            // Trailer fields are consumed and discarded.
            self.buffer.drain(..line_end + 2);
        }
    }

    fn step_multipart(&mut self) -> Result<bool, ParseError> {
        let limit = self.body_expected - self.body_read;
        let finished = match self.multipart.as_mut() {
            Some(mp) if !mp.is_finished() => {
                let consumed = mp.feed(&mut self.buffer, limit)?;
                self.body_read += consumed;
                mp.is_finished()
            }
            Some(_) => true,
            None => return Err(ParseError::InvalidMultipart),
        };

        if finished {
            // Epilogue bytes up to the advertised content-length are ignored;
            // anything beyond belongs to the next pipelined request.
            let tail = (self.body_expected - self.body_read).min(self.buffer.len());
            self.buffer.drain(..tail);
            self.body_read += tail;
            if self.body_read == self.body_expected {
                self.state = ParsingState::Complete;
                return Ok(true);
            }
            return Ok(false);
        }

        // Every declared body byte is already buffered and the scanner still
        // cannot finish: the body is missing its terminating boundary.
        if self.buffer.len() >= self.body_expected - self.body_read {
            return Err(ParseError::InvalidMultipart);
        }
        Ok(false)
    }
}

pub fn find_crlf(buffer: &[u8], from: usize) -> Option<usize> {
    find_subsequence(buffer, b"\r\n", from)
}

pub fn find_subsequence(buffer: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > buffer.len() {
        return None;
    }
    buffer[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

fn has_dotdot_segment(path: &str) -> bool {
    path.split('/').any(|segment| segment == "..")
}

fn percent_decode(input: &str) -> Result<String, ParseError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 3 > bytes.len() {
                return Err(ParseError::MalformedRequestLine);
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .map_err(|_| ParseError::MalformedRequestLine)?;
            let byte =
                u8::from_str_radix(hex, 16).map_err(|_| ParseError::MalformedRequestLine)?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| ParseError::MalformedRequestLine)
}
