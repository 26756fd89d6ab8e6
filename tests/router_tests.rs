use std::fs;
use std::sync::Arc;

use webserv::config::{RouteConfig, ServerConfig};
use webserv::http::{HttpRequest, Method};
use webserv::router::{Handler, match_route, route_request};

fn route(path: &str, root: &str, methods: &[&str]) -> RouteConfig {
    RouteConfig {
        path: path.to_string(),
        root: Some(root.to_string()),
        methods: Some(methods.iter().map(|m| m.to_string()).collect()),
        ..Default::default()
    }
}

fn server(routes: Vec<RouteConfig>) -> Arc<ServerConfig> {
    Arc::new(ServerConfig {
        server_name: "localhost".to_string(),
        host: "127.0.0.1".to_string(),
        ports: vec![8080],
        max_body_size: 1024 * 1024,
        default_server: true,
        error_pages: Default::default(),
        routes,
    })
}

fn request(method: Method, path: &str) -> HttpRequest {
    HttpRequest {
        method: Some(method),
        path: path.to_string(),
        version: "HTTP/1.1".to_string(),
        ..Default::default()
    }
}

struct TestRoot {
    path: String,
}

impl TestRoot {
    fn new(name: &str) -> Self {
        let path = format!("./www_router_{}", name);
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        TestRoot { path }
    }
}

impl Drop for TestRoot {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[test]
fn longest_prefix_wins() {
    let root = TestRoot::new("longest");
    fs::create_dir_all(format!("{}/files", root.path)).unwrap();
    fs::write(format!("{}/files/x.txt", root.path), "x").unwrap();

    let cfg = server(vec![
        route("/", &root.path, &["GET"]),
        route("/files", &format!("{}/files", root.path), &["GET"]),
    ]);

    let req = request(Method::GET, "/files/x.txt");
    match route_request(&req, &cfg) {
        Handler::StaticFile(path) => assert!(path.ends_with("x.txt")),
        other => panic!("expected a static file, got {:?}", other),
    }

    let matched = match_route(&cfg, "/files/x.txt").unwrap();
    assert_eq!(matched.path, "/files");
}

#[test]
fn prefix_match_requires_a_segment_boundary() {
    let cfg = server(vec![route("/upl", "./www_nowhere", &["GET"])]);
    // "/upload" shares the prefix "/upl" but not at a '/' boundary.
    assert!(match_route(&cfg, "/upload").is_none());
    assert!(match_route(&cfg, "/upl").is_some());
    assert!(match_route(&cfg, "/upl/x").is_some());
}

#[test]
fn unmatched_path_is_404() {
    let cfg = server(vec![route("/only", "./www_nowhere", &["GET"])]);
    let req = request(Method::GET, "/other");
    match route_request(&req, &cfg) {
        Handler::Error(404) => {}
        other => panic!("expected 404, got {:?}", other),
    }
}

#[test]
fn method_outside_route_set_is_405() {
    let root = TestRoot::new("methods");
    let cfg = server(vec![route("/", &root.path, &["GET"])]);
    let req = request(Method::POST, "/x");
    match route_request(&req, &cfg) {
        Handler::Error(405) => {}
        other => panic!("expected 405, got {:?}", other),
    }
}

#[test]
fn redirect_short_circuits_before_method_check() {
    let cfg = server(vec![RouteConfig {
        path: "/old".to_string(),
        redirect_to: Some("/new".to_string()),
        ..Default::default()
    }]);
    let req = request(Method::DELETE, "/old");
    match route_request(&req, &cfg) {
        Handler::Redirect { code, location } => {
            assert_eq!(code, 301);
            assert_eq!(location, "/new");
        }
        other => panic!("expected a redirect, got {:?}", other),
    }
}

#[test]
fn redirect_honors_configured_302() {
    let cfg = server(vec![RouteConfig {
        path: "/old".to_string(),
        redirect_to: Some("/new".to_string()),
        redirect_status_code: Some(302),
        ..Default::default()
    }]);
    match route_request(&request(Method::GET, "/old"), &cfg) {
        Handler::Redirect { code, .. } => assert_eq!(code, 302),
        other => panic!("expected a redirect, got {:?}", other),
    }
}

#[test]
fn session_path_is_fixed() {
    let cfg = server(vec![route("/", "./www_nowhere", &["GET"])]);
    match route_request(&request(Method::GET, "/session"), &cfg) {
        Handler::Session => {}
        other => panic!("expected the session handler, got {:?}", other),
    }
}

#[test]
fn directory_resolution_prefers_listing_then_index() {
    let root = TestRoot::new("dirs");
    fs::write(format!("{}/index.html", root.path), "idx").unwrap();

    // directoryListing on -> Directory handler.
    let mut listed = route("/", &root.path, &["GET"]);
    listed.directory_listing = Some(true);
    match route_request(&request(Method::GET, "/"), &server(vec![listed])) {
        Handler::Directory(_) => {}
        other => panic!("expected a directory listing, got {:?}", other),
    }

    // Listing off, index present -> StaticFile on the index.
    let plain = route("/", &root.path, &["GET"]);
    match route_request(&request(Method::GET, "/"), &server(vec![plain])) {
        Handler::StaticFile(path) => assert!(path.ends_with("index.html")),
        other => panic!("expected the index file, got {:?}", other),
    }
}

#[test]
fn directory_without_listing_or_index_is_403() {
    let root = TestRoot::new("bare");
    let cfg = server(vec![route("/", &root.path, &["GET"])]);
    match route_request(&request(Method::GET, "/"), &cfg) {
        Handler::Error(403) => {}
        other => panic!("expected 403, got {:?}", other),
    }
}

#[test]
fn missing_file_is_404() {
    let root = TestRoot::new("missing");
    let cfg = server(vec![route("/", &root.path, &["GET"])]);
    match route_request(&request(Method::GET, "/nope.html"), &cfg) {
        Handler::Error(404) => {}
        other => panic!("expected 404, got {:?}", other),
    }
}

#[test]
fn post_routes_to_upload_and_delete_to_delete() {
    let root = TestRoot::new("verbs");
    fs::write(format!("{}/victim.txt", root.path), "x").unwrap();
    let cfg = server(vec![route("/", &root.path, &["GET", "POST", "DELETE"])]);

    match route_request(&request(Method::POST, "/new.txt"), &cfg) {
        Handler::Upload { target, .. } => assert!(target.ends_with("new.txt")),
        other => panic!("expected the upload handler, got {:?}", other),
    }
    match route_request(&request(Method::DELETE, "/victim.txt"), &cfg) {
        Handler::Delete(path) => assert!(path.ends_with("victim.txt")),
        other => panic!("expected the delete handler, got {:?}", other),
    }
}

#[test]
fn cgi_extension_routes_to_cgi() {
    let root = TestRoot::new("cgi");
    fs::write(format!("{}/app.py", root.path), "print('hi')").unwrap();

    let mut cgi_route = route("/", &root.path, &["GET", "POST"]);
    cgi_route.cgi_extension = Some("py".to_string());
    let cfg = server(vec![cgi_route]);

    match route_request(&request(Method::GET, "/app.py"), &cfg) {
        Handler::Cgi { script } => assert!(script.ends_with("app.py")),
        other => panic!("expected the CGI handler, got {:?}", other),
    }
}
