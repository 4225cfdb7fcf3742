mod notification;
mod reply;
mod request;

pub use notification::*;
pub use reply::*;
pub use request::*;
