//! Page DOM seam and an arena-backed in-memory implementation.
//!
//! Only the slice of the DOM the trimmer and the keepalive monitor touch is
//! modelled: element tree, turn markers, inline `display`, text, clickable
//! controls, focus, visibility and scroll position. Child-list changes are
//! queued as [`MutationRecord`]s that the event loop drains and dispatches
//! to observers.

use std::collections::BTreeMap;

/// Attribute prefix identifying a conversation turn element.
pub const TURN_MARKER_ATTR: &str = "data-testid";
pub const TURN_MARKER_PREFIX: &str = "conversation-turn-";

/// Handle to an element. Handles stay valid after detachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// The focused element, as far as input protection cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveElement {
    pub tag: String,
    pub input_type: Option<String>,
}

impl ActiveElement {
    /// Whether the user may be typing into this element.
    pub fn is_text_entry(&self) -> bool {
        if self.tag.eq_ignore_ascii_case("textarea") {
            return true;
        }
        if !self.tag.eq_ignore_ascii_case("input") {
            return false;
        }
        let ty = self.input_type.as_deref().unwrap_or("").to_ascii_lowercase();
        ["text", "search", "url", "email", "password"]
            .iter()
            .any(|t| ty.contains(t))
    }
}

/// One child-list change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

pub trait PageDom {
    fn body(&self) -> NodeId;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    /// Element children in order.
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    fn is_turn_marker(&self, node: NodeId) -> bool;
    /// Turn markers strictly below `root`, in document order.
    fn turn_markers_under(&self, root: NodeId) -> Vec<NodeId>;
    /// First turn marker in the whole document.
    fn first_turn_marker(&self) -> Option<NodeId>;
    /// Whether the node is still attached to the document.
    fn is_connected(&self, node: NodeId) -> bool;
    /// Inline `display` value; `None` when unset.
    fn display(&self, node: NodeId) -> Option<String>;
    fn set_display(&mut self, node: NodeId, display: Option<String>);
    /// Replace all children of `parent` with `children`, in one change.
    fn replace_children(&mut self, parent: NodeId, children: &[NodeId]);
    /// Detach `node` from its parent.
    fn remove(&mut self, node: NodeId);
    fn text_content(&self, node: NodeId) -> String;
    /// Buttons and `a[role=button]` elements in document order.
    fn clickables(&self) -> Vec<NodeId>;
    fn click(&mut self, node: NodeId);
    fn scroll_top(&self) -> f64;
    fn is_visible(&self) -> bool;
    fn active_element(&self) -> Option<ActiveElement>;
    /// Full page reload.
    fn reload(&mut self);
    /// Drain queued child-list changes.
    fn take_mutations(&mut self) -> Vec<MutationRecord>;
}

// ─── MemoryDom ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    display: Option<String>,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            display: None,
        }
    }
}

/// In-memory document: `html > body`, plus whatever gets appended.
#[derive(Debug, Clone)]
pub struct MemoryDom {
    nodes: Vec<Node>,
    mutations: Vec<MutationRecord>,
    focused: Option<NodeId>,
    visible: bool,
    scroll_top: f64,
    clicks: Vec<NodeId>,
    reloads: u32,
    next_turn: usize,
}

const ROOT: NodeId = NodeId(0);
const BODY: NodeId = NodeId(1);

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    pub fn new() -> Self {
        let mut body = Node::new("body");
        body.parent = Some(ROOT);
        let mut root = Node::new("html");
        root.children.push(BODY);
        Self {
            nodes: vec![root, body],
            mutations: Vec::new(),
            focused: None,
            visible: true,
            scroll_top: 0.0,
            clicks: Vec::new(),
            reloads: 0,
            next_turn: 0,
        }
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.nodes.push(Node::new(tag));
        NodeId(self.nodes.len() - 1)
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.attrs.insert(name.to_owned(), value.to_owned());
        }
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes.get(node.0)?.attrs.get(name).map(String::as_str)
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.text = text.to_owned();
        }
    }

    /// Move `child` under `parent` (appended last) and queue the change.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if parent.0 >= self.nodes.len() || child.0 >= self.nodes.len() || parent == child {
            return;
        }
        self.detach(child, true);
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        self.mutations.push(MutationRecord {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
    }

    /// Create an element with text and append it to `parent`.
    pub fn append_element(&mut self, parent: NodeId, tag: &str, text: &str) -> NodeId {
        let node = self.create_element(tag);
        self.set_text(node, text);
        self.append_child(parent, node);
        node
    }

    /// Append a new conversation turn to `container`.
    pub fn append_turn(&mut self, container: NodeId, text: &str) -> NodeId {
        let node = self.create_element("article");
        let marker = format!("{TURN_MARKER_PREFIX}{}", self.next_turn);
        self.next_turn += 1;
        self.set_attr(node, TURN_MARKER_ATTR, &marker);
        self.set_text(node, text);
        self.append_child(container, node);
        node
    }

    pub fn focus(&mut self, node: Option<NodeId>) {
        self.focused = node;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_scroll_top(&mut self, top: f64) {
        self.scroll_top = top;
    }

    /// Elements clicked so far.
    pub fn clicks(&self) -> &[NodeId] {
        &self.clicks
    }

    /// Number of full reloads performed.
    pub fn reloads(&self) -> u32 {
        self.reloads
    }

    fn detach(&mut self, node: NodeId, record: bool) {
        let Some(parent) = self.nodes[node.0].parent.take() else {
            return;
        };
        self.nodes[parent.0].children.retain(|c| *c != node);
        if record {
            self.mutations.push(MutationRecord {
                target: parent,
                added: Vec::new(),
                removed: vec![node],
            });
        }
    }

    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.nodes[node.0].children.iter().rev().copied());
        }
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let n = &self.nodes[node.0];
        out.push_str(&n.text);
        for child in &n.children {
            self.collect_text(*child, out);
        }
    }
}

impl PageDom for MemoryDom {
    fn body(&self) -> NodeId {
        BODY
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(node.0)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn is_turn_marker(&self, node: NodeId) -> bool {
        self.attr(node, TURN_MARKER_ATTR)
            .is_some_and(|v| v.starts_with(TURN_MARKER_PREFIX))
    }

    fn turn_markers_under(&self, root: NodeId) -> Vec<NodeId> {
        if root.0 >= self.nodes.len() {
            return Vec::new();
        }
        self.descendants(root)
            .into_iter()
            .filter(|n| self.is_turn_marker(*n))
            .collect()
    }

    fn first_turn_marker(&self) -> Option<NodeId> {
        self.descendants(ROOT)
            .into_iter()
            .find(|n| self.is_turn_marker(*n))
    }

    fn is_connected(&self, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(n) = cur {
            if n == ROOT {
                return true;
            }
            cur = self.nodes.get(n.0).and_then(|x| x.parent);
        }
        false
    }

    fn display(&self, node: NodeId) -> Option<String> {
        self.nodes.get(node.0)?.display.clone()
    }

    fn set_display(&mut self, node: NodeId, display: Option<String>) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.display = display;
        }
    }

    fn replace_children(&mut self, parent: NodeId, children: &[NodeId]) {
        if parent.0 >= self.nodes.len() {
            return;
        }
        let old = std::mem::take(&mut self.nodes[parent.0].children);
        for node in &old {
            self.nodes[node.0].parent = None;
        }
        let mut added = Vec::new();
        for child in children {
            if child.0 >= self.nodes.len() || *child == parent {
                continue;
            }
            self.detach(*child, false);
            self.nodes[child.0].parent = Some(parent);
            self.nodes[parent.0].children.push(*child);
            if !old.contains(child) {
                added.push(*child);
            }
        }
        let removed = old.into_iter().filter(|n| !children.contains(n)).collect();
        self.mutations.push(MutationRecord {
            target: parent,
            added,
            removed,
        });
    }

    fn remove(&mut self, node: NodeId) {
        if node.0 < self.nodes.len() {
            self.detach(node, true);
        }
    }

    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        if node.0 < self.nodes.len() {
            self.collect_text(node, &mut out);
        }
        out
    }

    fn clickables(&self) -> Vec<NodeId> {
        self.descendants(ROOT)
            .into_iter()
            .filter(|n| {
                let node = &self.nodes[n.0];
                node.tag == "button"
                    || (node.tag == "a" && node.attrs.get("role").is_some_and(|r| r == "button"))
            })
            .collect()
    }

    fn click(&mut self, node: NodeId) {
        self.clicks.push(node);
    }

    fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn active_element(&self) -> Option<ActiveElement> {
        let node = self.focused.filter(|n| self.is_connected(*n))?;
        let n = &self.nodes[node.0];
        Some(ActiveElement {
            tag: n.tag.clone(),
            input_type: n.attrs.get("type").cloned(),
        })
    }

    fn reload(&mut self) {
        self.reloads += 1;
    }

    fn take_mutations(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.mutations)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
