pub mod annotator;
pub mod page;
pub mod scanner;

pub use annotator::{apply, remove_highlights, AnnotationReport, HIGHLIGHT_CLASS, WRAPPER_CLASS};
pub use page::{MutationRecord, NodeRef, Page};
pub use scanner::{scan, Batch, TEXT_SEPARATOR};
