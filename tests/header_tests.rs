use webserv::http::{HeaderError, HeaderStore};

#[test]
fn names_are_case_insensitive() {
    let mut h = HeaderStore::new();
    h.add("Content-Type", "text/html");

    assert_eq!(h.first("content-type"), Some("text/html"));
    assert_eq!(h.first("CONTENT-TYPE"), Some("text/html"));
    assert!(h.has("Content-type"));
}

#[test]
fn multiple_values_keep_insertion_order() {
    let mut h = HeaderStore::new();
    h.add("Accept", "text/html");
    h.add("accept", "application/json");

    assert_eq!(h.all("accept"), vec!["text/html", "application/json"]);
    assert_eq!(h.first("accept"), Some("text/html"));
}

#[test]
fn remove_drops_every_value() {
    let mut h = HeaderStore::new();
    h.add("X-Test", "1");
    h.add("X-Test", "2");
    h.remove("x-test");
    assert!(!h.has("x-test"));
}

#[test]
fn missing_host_is_rejected_when_required() {
    let mut h = HeaderStore::new();
    assert_eq!(h.validate(true), Err(HeaderError::MissingHost));

    let mut h = HeaderStore::new();
    h.add("Host", "  ");
    assert_eq!(h.validate(true), Err(HeaderError::MissingHost));
}

#[test]
fn missing_host_is_fine_when_not_required() {
    let mut h = HeaderStore::new();
    assert_eq!(h.validate(false), Ok(()));
}

#[test]
fn duplicate_host_is_rejected() {
    let mut h = HeaderStore::new();
    h.add("Host", "a");
    h.add("Host", "b");
    assert_eq!(h.validate(true), Err(HeaderError::DuplicateHost));
}

#[test]
fn conflicting_content_lengths_are_rejected() {
    let mut h = HeaderStore::new();
    h.add("Host", "x");
    h.add("Content-Length", "5");
    h.add("Content-Length", "6");
    assert_eq!(
        h.validate(true),
        Err(HeaderError::ConflictingContentLength)
    );
}

#[test]
fn identical_content_lengths_after_trim_are_accepted() {
    let mut h = HeaderStore::new();
    h.add("Host", "x");
    h.add("Content-Length", "5");
    h.add("Content-Length", " 5 ");
    assert_eq!(h.validate(true), Ok(()));
    assert_eq!(h.content_length(), Some(5));
}

#[test]
fn chunked_drops_content_length() {
    let mut h = HeaderStore::new();
    h.add("Host", "x");
    h.add("Content-Length", "10");
    h.add("Transfer-Encoding", "chunked");

    assert_eq!(h.validate(true), Ok(()));
    assert!(!h.has("content-length"));
    assert!(h.is_chunked());
}

#[test]
fn non_chunked_transfer_encoding_is_rejected() {
    let mut h = HeaderStore::new();
    h.add("Host", "x");
    h.add("Transfer-Encoding", "gzip");
    assert_eq!(
        h.validate(true),
        Err(HeaderError::UnsupportedTransferEncoding)
    );
}

#[test]
fn chunked_match_ignores_case_and_whitespace() {
    let mut h = HeaderStore::new();
    h.add("Host", "x");
    h.add("Transfer-Encoding", "  Chunked ");
    assert_eq!(h.validate(true), Ok(()));
    assert!(h.is_chunked());
}

#[test]
fn unparseable_content_length_is_rejected() {
    let mut h = HeaderStore::new();
    h.add("Host", "x");
    h.add("Content-Length", "five");
    assert_eq!(h.validate(true), Err(HeaderError::InvalidContentLength));

    let mut h = HeaderStore::new();
    h.add("Host", "x");
    h.add("Content-Length", "-1");
    assert_eq!(h.validate(true), Err(HeaderError::InvalidContentLength));
}
