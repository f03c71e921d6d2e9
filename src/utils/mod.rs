//! Shared utility functions for flowforge.

pub mod json_extraction;

pub use json_extraction::{
    extract_from_generic_code_block, extract_from_json_code_block, find_matching_brace,
    try_extract_json_object, JsonExtractionError, JsonExtractionResult,
};
