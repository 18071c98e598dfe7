//! Output Formatting
//!
//! Format-hint parsing, the draft answer contract, and the formatter that
//! turns a finished run into its output record.

pub mod format_hint;
pub mod formatter;
pub mod validation;

pub use format_hint::FormatHint;
pub use formatter::format_record;
pub use validation::{validate_draft, CitationScope};
