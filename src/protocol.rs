//! Shared protocol constants for the chunkwire line/chunk transport

// Default endpoint
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 65432;

// Field separator inside a header line. Multi-character so it cannot collide
// with ordinary filenames or messages.
pub const SEP: &str = "<|>";

// Chunk size used for streaming file payloads (1MB). Both ends must agree.
pub const CHUNK_SIZE: u32 = 1024 * 1024;

// Socket read size when filling the carry-over buffer
pub const READ_BUFFER_SIZE: usize = 4096;

// Maximum header line length - prevents unbounded buffering on a peer that
// never sends a newline
pub const MAX_LINE_LEN: usize = 64 * 1024;

// Client -> server verbs
pub mod cmd {
    pub const LIST: &str = "LIST";
    pub const DOWNLOAD: &str = "DOWNLOAD";
    pub const QUIT: &str = "QUIT";
}

// Server -> client status tokens
pub mod resp {
    pub const OK: &str = "OK";
    pub const ERROR: &str = "ERROR";
    pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
    pub const FILE_INFO: &str = "FILE_INFO";
}

// Fixed response texts
pub mod text {
    pub const NO_FILES: &str = "No files available.";
    pub const GOODBYE: &str = "Goodbye!";
    pub const UNKNOWN_COMMAND: &str = "Unknown command";
    pub const FILENAME_MISSING: &str = "Filename not provided";
}

// Centralized timeout constants
pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // Default per-read deadline on the client (ms)
    pub const CLIENT_READ_MS: u64 = 30_000;

    // How long a server session may sit idle awaiting a command (ms)
    pub const SESSION_IDLE_MS: u64 = 300_000;

    // Deadline when waiting for the goodbye after QUIT (ms)
    pub const QUIT_ACK_MS: u64 = 2_000;
}
