#[macro_use]
mod macros;
pub mod ast;
mod parse;
pub use parse::{parse_task, Error as ParseError};
pub mod script;
pub use script::parse_script;

/// 1-based line number of `token` within `text`.
/// `token` must be a subslice of `text` (parsers return borrowed slices).
pub fn line_of(text: &str, token: &str) -> usize {
    let base = text.as_ptr() as usize;
    let tok = token.as_ptr() as usize;
    let offset = tok.saturating_sub(base).min(text.len());
    1 + text[..offset].bytes().filter(|&b| b == b'\n').count()
}
