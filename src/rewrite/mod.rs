//! Text rewriters: exact-token swaps and include-prefix toggles.

pub mod literal;
pub mod pattern;

pub use literal::{replace_literal, rewrite_literal};
pub use pattern::{list_file_names, list_files, IncludeRewriter};
