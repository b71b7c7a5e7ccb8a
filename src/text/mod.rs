//! Pure text helpers: scope classification, word tokenizing and the
//! positional word differ. Nothing here touches the DOM or does I/O.
pub mod classifier;
pub mod differ;
pub mod tokenizer;

pub use classifier::is_in_scope;
pub use differ::{diff_line, DiffEntry};
