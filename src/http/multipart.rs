use crate::http::body::{Part, PartData, TempFile};
use crate::http::request::{ParseError, find_subsequence};
use crate::prelude::{MAX_FIELD_PART, MAX_HEADER_BLOCK};

#[derive(Debug, PartialEq)]
enum MultipartState {
    Preamble,
    PartHeaders,
    PartData,
}

#[derive(Debug)]
enum PartSink {
    Memory(Vec<u8>),
    File(TempFile),
}

#[derive(Debug)]
struct PartBuilder {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    sink: PartSink,
}

/// Incremental multipart/form-data scanner.
///
/// Consumes bytes from the front of the parser's accumulation buffer, never
/// past `limit` (the remaining declared body length). File parts stream to a
/// temp file as their bytes arrive; field parts accumulate in memory up to
/// the per-field cap.
#[derive(Debug)]
pub struct MultipartParser {
    boundary: Vec<u8>,
    state: MultipartState,
    parts: Vec<Part>,
    current: Option<PartBuilder>,
    finished: bool,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        MultipartParser {
            boundary: format!("--{}", boundary).into_bytes(),
            state: MultipartState::Preamble,
            parts: Vec::new(),
            current: None,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    /// Consumes as much of `buf` as the state machine permits and returns
    /// the number of bytes taken.
    pub fn feed(&mut self, buf: &mut Vec<u8>, limit: usize) -> Result<usize, ParseError> {
        let mut consumed = 0usize;

        loop {
            if self.finished {
                break;
            }
            let avail = buf.len().min(limit - consumed);
            match self.state {
                MultipartState::Preamble => {
                    match find_subsequence(&buf[..avail], &self.boundary, 0) {
                        Some(idx) => {
                            let marker = idx + self.boundary.len();
                            if avail < marker + 2 {
                                // Boundary seen but its 2-byte marker has not
                                // arrived; drop the junk before it and wait.
                                if idx > 0 {
                                    buf.drain(..idx);
                                    consumed += idx;
                                }
                                break;
                            }
                            if &buf[marker..marker + 2] == b"--" {
                                buf.drain(..marker + 2);
                                consumed += marker + 2;
                                self.finished = true;
                                break;
                            }
                            if &buf[marker..marker + 2] != b"\r\n" {
                                return Err(ParseError::InvalidMultipart);
                            }
                            buf.drain(..marker + 2);
                            consumed += marker + 2;
                            self.state = MultipartState::PartHeaders;
                        }
                        None => {
                            // Keep a tail large enough to hold a split boundary.
                            let keep = self.boundary.len() + 4;
                            if avail > keep {
                                buf.drain(..avail - keep);
                                consumed += avail - keep;
                            }
                            break;
                        }
                    }
                }
                MultipartState::PartHeaders => {
                    if avail >= 2 && buf.starts_with(b"\r\n") {
                        buf.drain(..2);
                        consumed += 2;
                        self.begin_part("")?;
                        self.state = MultipartState::PartData;
                        continue;
                    }
                    match find_subsequence(&buf[..avail], b"\r\n\r\n", 0) {
                        Some(pos) => {
                            let head: Vec<u8> = buf[..pos].to_vec();
                            buf.drain(..pos + 4);
                            consumed += pos + 4;
                            let head = String::from_utf8(head)
                                .map_err(|_| ParseError::InvalidMultipart)?;
                            self.begin_part(&head)?;
                            self.state = MultipartState::PartData;
                        }
                        None => {
                            if avail > MAX_HEADER_BLOCK {
                                return Err(ParseError::InvalidMultipart);
                            }
                            break;
                        }
                    }
                }
                MultipartState::PartData => {
                    match find_subsequence(&buf[..avail], &self.boundary, 0) {
                        Some(idx) => {
                            // Content ends before the CRLF that precedes the
                            // boundary line.
                            let data_end = if idx >= 2 && &buf[idx - 2..idx] == b"\r\n" {
                                idx - 2
                            } else {
                                idx
                            };
                            let data: Vec<u8> = buf[..data_end].to_vec();
                            self.write_part(&data)?;
                            buf.drain(..idx);
                            consumed += idx;
                            self.end_part();
                            self.state = MultipartState::Preamble;
                        }
                        None => {
                            let keep = self.boundary.len() + 4;
                            if avail > keep {
                                let data: Vec<u8> = buf[..avail - keep].to_vec();
                                self.write_part(&data)?;
                                buf.drain(..avail - keep);
                                consumed += avail - keep;
                            }
                            break;
                        }
                    }
                }
            }
        }

        Ok(consumed)
    }

    fn begin_part(&mut self, head: &str) -> Result<(), ParseError> {
        let mut name = String::new();
        let mut filename = None;
        let mut content_type = None;

        for line in head.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "content-disposition" => {
                    if let Some(n) = param_value(value, "name") {
                        name = n;
                    }
                    filename = param_value(value, "filename");
                }
                "content-type" => content_type = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let sink = if filename.is_some() {
            PartSink::File(TempFile::create()?)
        } else {
            PartSink::Memory(Vec::new())
        };
        self.current = Some(PartBuilder {
            name,
            filename,
            content_type,
            sink,
        });
        Ok(())
    }

    fn write_part(&mut self, data: &[u8]) -> Result<(), ParseError> {
        let Some(part) = self.current.as_mut() else {
            return Err(ParseError::InvalidMultipart);
        };
        match &mut part.sink {
            PartSink::File(tmp) => tmp.write(data)?,
            PartSink::Memory(buf) => {
                if buf.len() + data.len() > MAX_FIELD_PART {
                    return Err(ParseError::FieldTooLarge);
                }
                buf.extend_from_slice(data);
            }
        }
        Ok(())
    }

    fn end_part(&mut self) {
        if let Some(part) = self.current.take() {
            let data = match part.sink {
                PartSink::Memory(buf) => PartData::Bytes(buf),
                PartSink::File(tmp) => PartData::File(tmp),
            };
            self.parts.push(Part {
                name: part.name,
                filename: part.filename,
                content_type: part.content_type,
                data,
            });
        }
    }
}

/// Extracts a `key=value` parameter from a header value such as
/// `multipart/form-data; boundary="xyz"` or
/// `form-data; name=field; filename="a.txt"`. Quoted and bare forms are both
/// accepted.
pub fn param_value(header: &str, key: &str) -> Option<String> {
    for piece in header.split(';') {
        let piece = piece.trim();
        let Some((k, v)) = piece.split_once('=') else {
            continue;
        };
        if !k.trim().eq_ignore_ascii_case(key) {
            continue;
        }
        let v = v.trim();
        let v = v.strip_prefix('"').unwrap_or(v);
        let v = v.strip_suffix('"').unwrap_or(v);
        return Some(v.to_string());
    }
    None
}
