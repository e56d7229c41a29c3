//! The five pipeline stages. Each is a function over capability handles;
//! the binaries wire in the AWS-backed implementations, the tests wire in
//! fakes.

pub mod enrich;
pub mod ingest;
pub mod merge;
pub mod segment;
pub mod trips;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const JSONL_CONTENT_TYPE: &str = "application/jsonl";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
