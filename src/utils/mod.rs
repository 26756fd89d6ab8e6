pub mod cookie;
pub mod session;
pub mod set_cookie;

pub use cookie::*;
pub use session::*;
pub use set_cookie::*;
