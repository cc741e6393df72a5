mod api;
mod decoder;

pub use self::api::*;
pub use self::decoder::*;
