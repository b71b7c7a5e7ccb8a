use std::cell::RefCell;
use std::rc::{Rc, Weak};

use anyhow::{Context, Result};
use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{parse_document, Attribute, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use tokio::sync::mpsc;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Structural change reported to a connected observer.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    /// Parent whose child list changed.
    pub target: NodeRef,
    pub added: usize,
    pub removed: usize,
}

impl MutationRecord {
    pub fn has_added_nodes(&self) -> bool {
        self.added > 0
    }
}

/// Non-owning handle to a node. The tree owns the node; holders must
/// upgrade and re-check attachment before mutating through it.
#[derive(Debug, Clone)]
pub struct NodeRef(Weak<Node>);

impl NodeRef {
    pub fn new(node: &Handle) -> Self {
        Self(Rc::downgrade(node))
    }

    pub fn upgrade(&self) -> Option<Handle> {
        self.0.upgrade()
    }

    /// The node, if it is still alive and still a child of its parent.
    pub fn attached(&self) -> Option<Handle> {
        let node = self.upgrade()?;
        let parent = parent_of(&node)?;
        let is_child = parent
            .children
            .borrow()
            .iter()
            .any(|child| Rc::ptr_eq(child, &node));
        is_child.then_some(node)
    }

    pub fn points_to(&self, node: &Handle) -> bool {
        self.upgrade().is_some_and(|own| Rc::ptr_eq(&own, node))
    }
}

/// A parsed document plus the single mutation path into it.
///
/// Mutations made through `Page` are reported to the observer connected with
/// [`Page::observe`]; there is at most one observer at a time.
pub struct Page {
    dom: RcDom,
    observer: RefCell<Option<mpsc::UnboundedSender<MutationRecord>>>,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(html);
        Self {
            dom,
            observer: RefCell::new(None),
        }
    }

    pub fn document(&self) -> Handle {
        self.dom.document.clone()
    }

    /// `<body>` if the document has one, else the document node.
    pub fn root(&self) -> Handle {
        find_element(&self.dom.document, "body").unwrap_or_else(|| self.document())
    }

    /// Connect a fresh observer, replacing any previous one.
    pub fn observe(&self) -> mpsc::UnboundedReceiver<MutationRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.observer.borrow_mut() = Some(tx);
        rx
    }

    pub fn disconnect(&self) {
        self.observer.borrow_mut().take();
    }

    pub fn is_observed(&self) -> bool {
        self.observer.borrow().is_some()
    }

    fn notify(&self, parent: &Handle, added: usize, removed: usize) {
        let mut guard = self.observer.borrow_mut();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        let record = MutationRecord {
            target: NodeRef::new(parent),
            added,
            removed,
        };
        if tx.send(record).is_err() {
            // receiver gone; behave as disconnected
            guard.take();
        }
    }

    pub fn append_child(&self, parent: &Handle, child: Handle) {
        detach(&child);
        child.parent.set(Some(Rc::downgrade(parent)));
        parent.children.borrow_mut().push(child);
        self.notify(parent, 1, 0);
    }

    /// Swap `old` for `new` in place. Returns false when `old` is detached.
    pub fn replace_node(&self, old: &Handle, new: Handle) -> bool {
        let Some(parent) = parent_of(old) else {
            return false;
        };
        detach(&new);
        let replaced = {
            let mut children = parent.children.borrow_mut();
            match children.iter().position(|child| Rc::ptr_eq(child, old)) {
                Some(idx) => {
                    new.parent.set(Some(Rc::downgrade(&parent)));
                    children[idx] = new;
                    true
                }
                None => false,
            }
        };
        if replaced {
            old.parent.set(None);
            self.notify(&parent, 1, 1);
        }
        replaced
    }

    pub fn remove_node(&self, node: &Handle) -> bool {
        let Some(parent) = parent_of(node) else {
            return false;
        };
        let removed = {
            let mut children = parent.children.borrow_mut();
            let before = children.len();
            children.retain(|child| !Rc::ptr_eq(child, node));
            before != children.len()
        };
        if removed {
            node.parent.set(None);
            self.notify(&parent, 0, 1);
        }
        removed
    }

    /// Elements whose `class` attribute lists `class_name`, in document order.
    pub fn elements_with_class(&self, class_name: &str) -> Vec<Handle> {
        let mut out = Vec::new();
        collect_with_class(&self.dom.document, class_name, &mut out);
        out
    }

    pub fn to_html(&self) -> Result<String> {
        let mut bytes = Vec::new();
        let handle: SerializableHandle = self.dom.document.clone().into();
        serialize(&mut bytes, &handle, SerializeOpts::default())
            .context("failed to serialize document")?;
        String::from_utf8(bytes).context("serialized document is not valid UTF-8")
    }
}

pub fn parent_of(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(Weak::upgrade);
    node.parent.set(weak);
    parent
}

fn detach(node: &Handle) {
    let Some(parent) = parent_of(node) else {
        return;
    };
    parent
        .children
        .borrow_mut()
        .retain(|child| !Rc::ptr_eq(child, node));
    node.parent.set(None);
}

pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

pub fn create_element(tag: &str, attrs: &[(&str, &str)]) -> Handle {
    let attrs = attrs
        .iter()
        .map(|(name, value)| Attribute {
            name: QualName::new(None, Namespace::from(""), LocalName::from(*name)),
            value: StrTendril::from(*value),
        })
        .collect();
    Node::new(NodeData::Element {
        name: QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from(tag)),
        attrs: RefCell::new(attrs),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

/// Build a detached element with the given children.
pub fn element_with_children(tag: &str, attrs: &[(&str, &str)], children: Vec<Handle>) -> Handle {
    let element = create_element(tag, attrs);
    for child in children {
        child.parent.set(Some(Rc::downgrade(&element)));
        element.children.borrow_mut().push(child);
    }
    element
}

pub fn tag_name(node: &Handle) -> Option<String> {
    match node.data {
        NodeData::Element { ref name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

pub fn attr(node: &Handle, attr_name: &str) -> Option<String> {
    match node.data {
        NodeData::Element { ref attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| attr.name.local.as_ref() == attr_name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

pub fn has_class(node: &Handle, class_name: &str) -> bool {
    attr(node, "class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

/// Text of a text node, `None` for anything else.
pub fn text_value(node: &Handle) -> Option<String> {
    match node.data {
        NodeData::Text { ref contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

/// Concatenated text of every descendant text node.
pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    walk_preorder(node, |current| {
        if let NodeData::Text { ref contents } = current.data {
            out.push_str(&contents.borrow());
        }
        true
    });
    out
}

/// Visit `node` and its descendants in document order. Returning `false`
/// from `visit` skips that node's children.
///
/// Uses an explicit stack: pages nest deeper than the thread stack allows.
pub fn walk_preorder(node: &Handle, mut visit: impl FnMut(&Handle) -> bool) {
    let mut stack = vec![node.clone()];
    while let Some(current) = stack.pop() {
        if !visit(&current) {
            continue;
        }
        stack.extend(current.children.borrow().iter().rev().cloned());
    }
}

fn find_element(node: &Handle, tag: &str) -> Option<Handle> {
    let mut found = None;
    walk_preorder(node, |current| {
        if found.is_none() && tag_name(current).as_deref() == Some(tag) {
            found = Some(current.clone());
        }
        found.is_none()
    });
    found
}

fn collect_with_class(node: &Handle, class_name: &str, out: &mut Vec<Handle>) {
    walk_preorder(node, |current| {
        if has_class(current, class_name) {
            out.push(current.clone());
        }
        true
    });
}
