mod request_meta;
mod start_time;

pub use self::request_meta::*;
pub use self::start_time::*;
