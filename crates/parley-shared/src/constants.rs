/// Protocol version advertised by `/info`
pub const PROTOCOL_VERSION: &str = "parley/1";

/// Application name
pub const APP_NAME: &str = "Parley";

/// Maximum length of a message text in bytes (16 KiB)
pub const MAX_TEXT_LEN: usize = 16 * 1024;

/// Maximum length of an image or video reference
pub const MAX_URL_LEN: usize = 2048;

/// Maximum size of one inbound WebSocket frame (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// WebSocket close code sent when the credential is rejected
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
