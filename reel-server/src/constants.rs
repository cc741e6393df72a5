/// Name and version of this server, sent in the `Server` header.
pub const SERVER: &str = concat!("reel/", env!("CARGO_PKG_VERSION"));

/// Header carrying the time spent processing a request in milliseconds.
pub const ELAPSED_HEADER: &str = "x-reel-elapsed-ms";

/// Header carrying the size of the request body in bytes.
pub const BODY_SIZE_HEADER: &str = "x-reel-body-size";

/// Platform tag of browser sessions.
pub const PLATFORM_WEB: &str = "web";

/// Platform tag of mobile sessions.
pub const PLATFORM_MOBILE: &str = "mobile";

/// Country reported when the client address cannot be located.
pub const UNKNOWN_COUNTRY: &str = "UN";
