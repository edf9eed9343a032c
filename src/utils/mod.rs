//! Small helpers shared across subsystems.

pub mod json_extraction;

pub use json_extraction::{
    extract_fenced_block, extract_json_object, find_matching_brace, parse_json_reply,
    JsonExtractionError,
};
