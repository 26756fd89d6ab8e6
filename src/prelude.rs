pub use crate::config::{AppConfig, RouteConfig, ServerConfig};
pub use crate::error::{Result, ServerError};
pub use crate::http::*;

pub use log::{debug, error, info, trace, warn};
pub use mio::{
    Events, Interest, Poll, Token,
    event::Event,
    net::{TcpListener, TcpStream},
};
pub use std::collections::{HashMap, VecDeque};
pub use std::fs::{self, File, OpenOptions};
pub use std::io::{self, ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant, SystemTime};

pub const READ_BUF_SIZE: usize = 8 * 1024;
pub const MAX_REQUEST_LINE: usize = 8 * 1024;
pub const MAX_URI: usize = 4 * 1024;
pub const MAX_HEADER_BLOCK: usize = 16 * 1024;
pub const MAX_LEADING_CRLF: usize = 10;
pub const SPILL_THRESHOLD: usize = 5 * 1024 * 1024;
pub const MAX_FIELD_PART: usize = 64 * 1024;
pub const FILE_SLICE: usize = 32 * 1024;
pub const CGI_OUTPUT_CAP: usize = 10 * 1024 * 1024;

pub const CGI_TIMEOUT: Duration = Duration::from_secs(5);
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_TIMEOUT: Duration = Duration::from_millis(50);

pub const HTTP_OK: u16 = 200;
pub const HTTP_CREATED: u16 = 201;
pub const HTTP_NO_CONTENT: u16 = 204;
pub const HTTP_MOVED_PERMANENTLY: u16 = 301;
pub const HTTP_FOUND: u16 = 302;

// 4xx Client Errors
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_REQUEST_TIMEOUT: u16 = 408;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_URI_TOO_LONG: u16 = 414;

// 5xx Server Errors
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
