use std::path::Path;

use webserv::cgi::{build_cgi_env, parse_cgi_headers, response_from_cgi_output};
use webserv::http::{HttpRequest, Method, ResponseBody};

#[test]
fn document_with_headers_and_status() {
    let raw = b"Content-Type: text/html\r\nStatus: 404 Not Found\r\nX-Extra: yes\r\n\r\n<h1>nope</h1>";
    let res = response_from_cgi_output(raw);

    assert_eq!(res.status_code, 404);
    assert_eq!(res.headers.first("content-type"), Some("text/html"));
    assert_eq!(res.headers.first("x-extra"), Some("yes"));
    match &res.body {
        ResponseBody::Bytes(body) => assert_eq!(body, b"<h1>nope</h1>"),
        other => panic!("expected inline body, got {:?}", other),
    }
}

#[test]
fn document_with_lf_separators() {
    let raw = b"Content-Type: text/plain\n\nhello";
    let res = response_from_cgi_output(raw);
    assert_eq!(res.status_code, 200);
    assert_eq!(res.headers.first("content-type"), Some("text/plain"));
    match &res.body {
        ResponseBody::Bytes(body) => assert_eq!(body, b"hello"),
        other => panic!("expected inline body, got {:?}", other),
    }
}

#[test]
fn document_without_header_block_is_all_body() {
    let raw = b"just raw output, no headers";
    let res = response_from_cgi_output(raw);
    assert_eq!(res.status_code, 200);
    match &res.body {
        ResponseBody::Bytes(body) => assert_eq!(body.as_slice(), raw),
        other => panic!("expected inline body, got {:?}", other),
    }
}

#[test]
fn blank_line_in_plain_output_does_not_fake_headers() {
    let raw = b"first paragraph\n\nsecond paragraph";
    let res = response_from_cgi_output(raw);
    assert_eq!(res.status_code, 200);
    match &res.body {
        ResponseBody::Bytes(body) => assert_eq!(body.as_slice(), raw),
        other => panic!("expected the whole output as body, got {:?}", other),
    }
}

#[test]
fn status_line_parsing_keeps_only_the_code() {
    let (status, headers) = parse_cgi_headers("Status: 418 I'm a teapot\r\nX-A: 1");
    assert_eq!(status, 418);
    assert_eq!(headers, vec![("x-a".to_string(), "1".to_string())]);
}

#[test]
fn environment_covers_the_cgi_11_set() {
    let mut request = HttpRequest {
        method: Some(Method::POST),
        path: "/scripts/app.py".to_string(),
        query: Some("a=1&b=2".to_string()),
        version: "HTTP/1.1".to_string(),
        ..Default::default()
    };
    request.headers.add("Host", "localhost");
    request.headers.add("Content-Type", "application/json");
    request.headers.add("X-Token", "t0k3n");
    request.body = webserv::http::Body::Bytes(b"{}".to_vec());

    let peer = "127.0.0.1:54321".parse().ok();
    let env = build_cgi_env(Path::new("/srv/scripts/app.py"), &request, peer);

    assert_eq!(env.get("SERVER_PROTOCOL").unwrap(), "HTTP/1.1");
    assert_eq!(env.get("GATEWAY_INTERFACE").unwrap(), "CGI/1.1");
    assert_eq!(env.get("REQUEST_METHOD").unwrap(), "POST");
    assert_eq!(env.get("REQUEST_URI").unwrap(), "/scripts/app.py?a=1&b=2");
    assert_eq!(env.get("SCRIPT_NAME").unwrap(), "/scripts/app.py");
    assert_eq!(env.get("PATH_INFO").unwrap(), "/srv/scripts/app.py");
    assert_eq!(env.get("QUERY_STRING").unwrap(), "a=1&b=2");
    assert_eq!(env.get("CONTENT_TYPE").unwrap(), "application/json");
    assert_eq!(env.get("CONTENT_LENGTH").unwrap(), "2");
    assert_eq!(env.get("REMOTE_ADDR").unwrap(), "127.0.0.1");
    assert_eq!(env.get("REMOTE_PORT").unwrap(), "54321");
    assert_eq!(env.get("HTTP_X_TOKEN").unwrap(), "t0k3n");
}
