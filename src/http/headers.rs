use quick_error::quick_error;

quick_error! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum HeaderError {
        MissingHost {
            display("missing host")
        }
        DuplicateHost {
            display("duplicate host")
        }
        ConflictingContentLength {
            display("conflicting content-length")
        }
        UnsupportedTransferEncoding {
            display("unsupported transfer-encoding")
        }
        InvalidContentLength {
            display("invalid content-length")
        }
    }
}

/// Case-insensitive multimap of header names to values, in insertion order.
/// Names are stored lower-cased; values are kept verbatim.
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    entries: Vec<(String, String)>,
}

impl HeaderStore {
    pub fn new() -> Self {
        HeaderStore {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, name: &str, value: &str) {
        self.entries
            .push((name.to_ascii_lowercase(), value.to_string()));
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn all(&self, name: &str) -> Vec<&str> {
        let lower = name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(n, _)| *n == lower)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.first(name).is_some()
    }

    pub fn remove(&mut self, name: &str) {
        let lower = name.to_ascii_lowercase();
        self.entries.retain(|(n, _)| *n != lower);
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.remove(name);
        self.add(name, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_chunked(&self) -> bool {
        self.all("transfer-encoding")
            .iter()
            .any(|v| v.trim().eq_ignore_ascii_case("chunked"))
    }

    pub fn content_length(&self) -> Option<u64> {
        self.first("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Applies the request-header invariants, mutating the store where the
    /// rules call for it (chunked wins over content-length).
    ///
    /// `require_host` is set for HTTP/1.1 requests; HTTP/1.0 clients are not
    /// obliged to send a Host header.
    pub fn validate(&mut self, require_host: bool) -> Result<(), HeaderError> {
        if require_host {
            let hosts = self.all("host");
            match hosts.len() {
                0 => return Err(HeaderError::MissingHost),
                1 => {
                    if hosts[0].trim().is_empty() {
                        return Err(HeaderError::MissingHost);
                    }
                }
                _ => return Err(HeaderError::DuplicateHost),
            }
        }

        let lengths = self.all("content-length");
        if lengths.len() > 1 {
            let first = lengths[0].trim();
            if lengths.iter().any(|v| v.trim() != first) {
                return Err(HeaderError::ConflictingContentLength);
            }
        }

        if self.has("transfer-encoding") {
            if self.is_chunked() {
                // Chunked framing wins; a content-length alongside it is dropped.
                self.remove("content-length");
            }
            if self
                .all("transfer-encoding")
                .iter()
                .any(|v| !v.trim().eq_ignore_ascii_case("chunked"))
            {
                return Err(HeaderError::UnsupportedTransferEncoding);
            }
        }

        if let Some(value) = self.first("content-length") {
            if value.trim().parse::<u64>().is_err() {
                return Err(HeaderError::InvalidContentLength);
            }
        }

        Ok(())
    }
}
