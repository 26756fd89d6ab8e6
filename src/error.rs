use quick_error::quick_error;

use crate::config::ConfigError;

quick_error! {
    #[derive(Debug)]
    pub enum ServerError {
        Io(err: std::io::Error) {
            display("I/O error: {}", err)
            from()
        }
        Config(err: ConfigError) {
            display("configuration error: {}", err)
            from()
        }
        Addr(err: std::net::AddrParseError) {
            display("invalid listen address: {}", err)
            from()
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
