pub mod body;
pub mod connection;
pub mod headers;
pub mod multipart;
pub mod request;
pub mod response;

pub use body::*;
pub use connection::*;
pub use headers::*;
pub use multipart::{MultipartParser, param_value};
pub use request::*;
pub use response::*;
