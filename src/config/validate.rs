use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use quick_error::quick_error;

use crate::config::{AppConfig, ServerConfig};

const ALLOWED_METHODS: [&str; 3] = ["GET", "POST", "DELETE"];

quick_error! {
    #[derive(Debug)]
    pub enum ConfigError {
        Io(err: std::io::Error) {
            display("cannot read configuration: {}", err)
            from()
        }
        Json(err: serde_json::Error) {
            display("malformed configuration: {}", err)
            from()
        }
        Invalid(msg: String) {
            display("invalid configuration: {}", msg)
        }
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}

pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.servers.is_empty() || config.servers.len() > 10 {
        return Err(invalid(format!(
            "expected between 1 and 10 servers, found {}",
            config.servers.len()
        )));
    }

    for server in &config.servers {
        validate_server(server)?;
    }

    // A (host, port, serverName) triple must be claimed by at most one server.
    let mut usage_map: HashMap<(String, u16, String), usize> = HashMap::new();
    for server in &config.servers {
        for port in &server.ports {
            let key = (server.host.clone(), *port, server.server_name.clone());
            *usage_map.entry(key).or_default() += 1;
        }
    }
    for ((host, port, server_name), count) in usage_map {
        if count > 1 {
            return Err(invalid(format!(
                "multiple servers defined for {}:{} with name '{}'",
                host, port, server_name
            )));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    let name = &server.server_name;

    if server.host.parse::<Ipv4Addr>().is_err() {
        return Err(invalid(format!(
            "server '{}': host '{}' is not a dotted-quad IPv4 address",
            name, server.host
        )));
    }

    if server.ports.is_empty() {
        return Err(invalid(format!("server '{}': no ports declared", name)));
    }
    let mut seen_ports = HashSet::new();
    for port in &server.ports {
        if *port < 1024 {
            return Err(invalid(format!(
                "server '{}': port {} is outside 1024-65535",
                name, port
            )));
        }
        if !seen_ports.insert(*port) {
            return Err(invalid(format!(
                "server '{}': duplicate port {}",
                name, port
            )));
        }
    }

    if server.max_body_size == 0 {
        return Err(invalid(format!(
            "server '{}': maxBodySize must be positive",
            name
        )));
    }

    for (code, page) in &server.error_pages {
        match code.parse::<u16>() {
            Ok(c) if (100..=599).contains(&c) => {}
            _ => {
                return Err(invalid(format!(
                    "server '{}': error page code '{}' is not a valid status code",
                    name, code
                )));
            }
        }
        if page.is_empty() {
            return Err(invalid(format!(
                "server '{}': empty error page path for code {}",
                name, code
            )));
        }
    }

    if server.routes.is_empty() {
        return Err(invalid(format!("server '{}': no routes declared", name)));
    }

    let mut seen_paths = HashSet::new();
    for route in &server.routes {
        if !route.path.starts_with('/') {
            return Err(invalid(format!(
                "server '{}': route path '{}' must start with '/'",
                name, route.path
            )));
        }
        if !seen_paths.insert(route.path.clone()) {
            return Err(invalid(format!(
                "server '{}': duplicate route path '{}'",
                name, route.path
            )));
        }

        if route.is_redirect() {
            if route.root.is_some() || route.cgi_extension.is_some() {
                return Err(invalid(format!(
                    "server '{}': route '{}' mixes redirect and static forms",
                    name, route.path
                )));
            }
            match route.redirect_status_code {
                None | Some(301) | Some(302) => {}
                Some(code) => {
                    return Err(invalid(format!(
                        "server '{}': route '{}' redirect status {} not in {{301, 302}}",
                        name, route.path, code
                    )));
                }
            }
            continue;
        }

        let Some(root) = route.root.as_deref() else {
            return Err(invalid(format!(
                "server '{}': route '{}' declares neither root nor redirectTo",
                name, route.path
            )));
        };
        if route.cgi_extension.is_some() {
            if !root.starts_with("./scripts") {
                return Err(invalid(format!(
                    "server '{}': CGI route '{}' root must start with ./scripts",
                    name, route.path
                )));
            }
        } else if !root.starts_with("./www") {
            return Err(invalid(format!(
                "server '{}': route '{}' root must start with ./www",
                name, route.path
            )));
        }

        let Some(methods) = &route.methods else {
            return Err(invalid(format!(
                "server '{}': route '{}' declares no methods",
                name, route.path
            )));
        };
        if methods.is_empty() {
            return Err(invalid(format!(
                "server '{}': route '{}' declares no methods",
                name, route.path
            )));
        }
        for method in methods {
            if !ALLOWED_METHODS.contains(&method.as_str()) {
                return Err(invalid(format!(
                    "server '{}': route '{}' allows unsupported method '{}'",
                    name, route.path, method
                )));
            }
        }
    }

    Ok(())
}
