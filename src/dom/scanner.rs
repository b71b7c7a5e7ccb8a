use markup5ever_rcdom::{Handle, NodeData};

use crate::text::is_in_scope;

use super::annotator::{HIGHLIGHT_CLASS, WRAPPER_CLASS};
use super::page::{has_class, tag_name, walk_preorder, NodeRef};

/// Separates segments in a batch. Assumed never to occur in page text.
pub const TEXT_SEPARATOR: char = '\u{0001}';

/// Elements whose text is never rendered as prose.
const SKIP_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// In-scope text of one scan, joined with [`TEXT_SEPARATOR`], plus one
/// owner handle per segment in the same order.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub text: String,
    pub owners: Vec<NodeRef>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    fn push(&mut self, content: &str, node: &Handle) {
        self.text.push_str(content);
        self.text.push(TEXT_SEPARATOR);
        self.owners.push(NodeRef::new(node));
    }
}

/// Collect every in-scope text node under `root` in document order.
/// Read-only: the tree is not touched.
pub fn scan(root: &Handle) -> Batch {
    let mut batch = Batch::default();
    walk_preorder(root, |node| match node.data {
        NodeData::Text { ref contents } => {
            let contents = contents.borrow();
            if is_in_scope(&contents) {
                batch.push(&contents, node);
            }
            false
        }
        NodeData::Element { .. } => !should_skip_element(node),
        NodeData::Document => true,
        _ => false,
    });
    batch
}

fn should_skip_element(node: &Handle) -> bool {
    if has_class(node, HIGHLIGHT_CLASS) || has_class(node, WRAPPER_CLASS) {
        return true;
    }
    tag_name(node)
        .map(|tag| SKIP_ELEMENTS.contains(&tag.as_str()))
        .unwrap_or(false)
}
