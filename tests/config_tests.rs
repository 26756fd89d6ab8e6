use webserv::config::{AppConfig, ConfigError};

fn base_config(servers: &str) -> String {
    format!(
        r#"{{
            "name": "webserv",
            "version": "0.1.0",
            "servers": [{}]
        }}"#,
        servers
    )
}

fn simple_server(name: &str, port: u16) -> String {
    format!(
        r#"{{
            "serverName": "{}",
            "host": "127.0.0.1",
            "ports": [{}],
            "maxBodySize": 1048576,
            "routes": [
                {{ "path": "/", "root": "./www", "methods": ["GET", "POST"] }}
            ]
        }}"#,
        name, port
    )
}

fn expect_invalid(json: &str) -> String {
    match AppConfig::from_json(json) {
        Err(ConfigError::Invalid(msg)) => msg,
        Err(other) => panic!("expected a validation error, got {}", other),
        Ok(_) => panic!("expected a validation error, config was accepted"),
    }
}

#[test]
fn minimal_config_parses() {
    let cfg = AppConfig::from_json(&base_config(&simple_server("one", 8080))).unwrap();
    assert_eq!(cfg.name, "webserv");
    assert_eq!(cfg.servers.len(), 1);
    let server = &cfg.servers[0];
    assert_eq!(server.server_name, "one");
    assert_eq!(server.ports, vec![8080]);
    assert!(!server.default_server);
    assert_eq!(server.routes[0].path, "/");
    assert!(server.routes[0].allows("GET"));
    assert!(!server.routes[0].allows("DELETE"));
}

#[test]
fn full_route_options_parse() {
    let json = base_config(
        r#"{
            "serverName": "full",
            "host": "0.0.0.0",
            "ports": [8080, 9090],
            "maxBodySize": 2048,
            "defaultServer": true,
            "errorPages": { "404": "./www/404.html" },
            "routes": [
                { "path": "/", "root": "./www", "methods": ["GET"], "index": "home.html",
                  "directoryListing": true },
                { "path": "/cgi", "root": "./scripts", "methods": ["GET", "POST"],
                  "cgiExtension": ".py" },
                { "path": "/old", "redirectTo": "/new", "redirectStatusCode": 302 }
            ]
        }"#,
    );
    let cfg = AppConfig::from_json(&json).unwrap();
    let server = &cfg.servers[0];
    assert!(server.default_server);
    assert_eq!(server.error_page(404).map(String::as_str), Some("./www/404.html"));
    assert_eq!(server.routes[0].index_file(), "home.html");
    assert_eq!(server.routes[1].cgi_ext(), Some("py"));
    assert!(server.routes[2].is_redirect());
}

#[test]
fn zero_servers_rejected() {
    let msg = expect_invalid(&base_config(""));
    assert!(msg.contains("between 1 and 10"), "{}", msg);
}

#[test]
fn eleven_servers_rejected() {
    let servers: Vec<String> = (0..11)
        .map(|i| simple_server(&format!("s{}", i), 9000 + i as u16))
        .collect();
    let msg = expect_invalid(&base_config(&servers.join(",")));
    assert!(msg.contains("between 1 and 10"), "{}", msg);
}

#[test]
fn privileged_port_rejected() {
    let msg = expect_invalid(&base_config(&simple_server("low", 80)));
    assert!(msg.contains("1024"), "{}", msg);
}

#[test]
fn duplicate_port_within_server_rejected() {
    let json = base_config(
        r#"{
            "serverName": "dup",
            "host": "127.0.0.1",
            "ports": [8080, 8080],
            "maxBodySize": 1024,
            "routes": [{ "path": "/", "root": "./www", "methods": ["GET"] }]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("duplicate port"), "{}", msg);
}

#[test]
fn duplicate_host_port_name_triple_rejected() {
    let servers = format!("{},{}", simple_server("same", 8080), simple_server("same", 8080));
    let msg = expect_invalid(&base_config(&servers));
    assert!(msg.contains("multiple servers"), "{}", msg);
}

#[test]
fn same_port_different_names_is_allowed() {
    let servers = format!("{},{}", simple_server("a", 8080), simple_server("b", 8080));
    let cfg = AppConfig::from_json(&base_config(&servers)).unwrap();
    assert_eq!(cfg.servers.len(), 2);
}

#[test]
fn non_ipv4_host_rejected() {
    let json = base_config(
        r#"{
            "serverName": "bad",
            "host": "localhost",
            "ports": [8080],
            "maxBodySize": 1024,
            "routes": [{ "path": "/", "root": "./www", "methods": ["GET"] }]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("dotted-quad"), "{}", msg);
}

#[test]
fn zero_max_body_size_rejected() {
    let json = base_config(
        r#"{
            "serverName": "zero",
            "host": "127.0.0.1",
            "ports": [8080],
            "maxBodySize": 0,
            "routes": [{ "path": "/", "root": "./www", "methods": ["GET"] }]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("maxBodySize"), "{}", msg);
}

#[test]
fn redirect_status_outside_301_302_rejected() {
    let json = base_config(
        r#"{
            "serverName": "redir",
            "host": "127.0.0.1",
            "ports": [8080],
            "maxBodySize": 1024,
            "routes": [{ "path": "/old", "redirectTo": "/new", "redirectStatusCode": 303 }]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("303"), "{}", msg);
}

#[test]
fn route_without_root_or_redirect_rejected() {
    let json = base_config(
        r#"{
            "serverName": "noroot",
            "host": "127.0.0.1",
            "ports": [8080],
            "maxBodySize": 1024,
            "routes": [{ "path": "/", "methods": ["GET"] }]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("neither root nor redirectTo"), "{}", msg);
}

#[test]
fn static_root_must_live_under_www() {
    let json = base_config(
        r#"{
            "serverName": "stray",
            "host": "127.0.0.1",
            "ports": [8080],
            "maxBodySize": 1024,
            "routes": [{ "path": "/", "root": "./data", "methods": ["GET"] }]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("./www"), "{}", msg);
}

#[test]
fn cgi_root_must_live_under_scripts() {
    let json = base_config(
        r#"{
            "serverName": "cgi",
            "host": "127.0.0.1",
            "ports": [8080],
            "maxBodySize": 1024,
            "routes": [{ "path": "/cgi", "root": "./www", "methods": ["GET"],
                         "cgiExtension": "py" }]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("./scripts"), "{}", msg);
}

#[test]
fn unsupported_method_rejected() {
    let json = base_config(
        r#"{
            "serverName": "put",
            "host": "127.0.0.1",
            "ports": [8080],
            "maxBodySize": 1024,
            "routes": [{ "path": "/", "root": "./www", "methods": ["GET", "PUT"] }]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("PUT"), "{}", msg);
}

#[test]
fn duplicate_route_paths_rejected() {
    let json = base_config(
        r#"{
            "serverName": "dup",
            "host": "127.0.0.1",
            "ports": [8080],
            "maxBodySize": 1024,
            "routes": [
                { "path": "/", "root": "./www", "methods": ["GET"] },
                { "path": "/", "root": "./www", "methods": ["POST"] }
            ]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("duplicate route"), "{}", msg);
}

#[test]
fn out_of_range_error_page_code_rejected() {
    let json = base_config(
        r#"{
            "serverName": "pages",
            "host": "127.0.0.1",
            "ports": [8080],
            "maxBodySize": 1024,
            "errorPages": { "999": "./www/oops.html" },
            "routes": [{ "path": "/", "root": "./www", "methods": ["GET"] }]
        }"#,
    );
    let msg = expect_invalid(&json);
    assert!(msg.contains("999"), "{}", msg);
}
