//! Headers of the `/bfile/<hash>` HTTP API.
//!
//! A `HEAD` carrying [`SHA1_REQUEST_HEADER`] asks the server to re-hash what
//! it stores and answer in [`CONTENT_SHA1_HEADER`]. Every answer on the
//! `/bfile` routes carries [`STORE_HEADER`] with the server's capabilities,
//! so clients can tell the API apart from an unrelated server that merely
//! answers `404`.

/// Request header asking the server to re-hash stored content.
pub const SHA1_REQUEST_HEADER: &str = "SHA1-Request";

/// Response header carrying the server's hash of stored content.
pub const CONTENT_SHA1_HEADER: &str = "Content-SHA1";

/// Response header advertising store capabilities.
pub const STORE_HEADER: &str = "bfile-store";
