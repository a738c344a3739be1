//! Text helpers shared by the parser, the change detector and the CLI.
//!
//! - **Truncation**: char-boundary safe cuts for stored change values
//! - **Display**: ellipsized columns for terminal output
//! - **Whitespace**: collapsing free text scraped out of HTML fields

mod text;

pub use text::{collapse_whitespace, ellipsize, truncate_chars};
