//! Categories: named, ordered collections of thread and monitor nodes.
//!
//! A [`TreeNode`] belongs to at most one category at a time. Adding a node to
//! a category first detaches it from whichever category held it before, so
//! the previous owner's count drops by one. Code that wants the same record in
//! two categories must create two nodes over the shared record
//! ([`Category::add_record`] does exactly that); moving an existing node moves
//! it, it never duplicates it.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::Serialize;

use crate::thread::{MonitorInfo, ThreadInfo};

/// Payload carried by a node.
#[derive(Debug, Clone)]
pub enum Record {
    Thread(Rc<ThreadInfo>),
    Monitor(Rc<MonitorInfo>),
}

impl Record {
    pub fn label(&self) -> String {
        match self {
            Record::Thread(thread) => thread.title.clone(),
            Record::Monitor(monitor) => monitor.label(),
        }
    }
}

impl From<ThreadInfo> for Record {
    fn from(thread: ThreadInfo) -> Self {
        Record::Thread(Rc::new(thread))
    }
}

impl From<MonitorInfo> for Record {
    fn from(monitor: MonitorInfo) -> Self {
        Record::Monitor(Rc::new(monitor))
    }
}

#[derive(Debug, Default)]
struct NodeList {
    nodes: RefCell<Vec<NodeRef>>,
}

impl NodeList {
    fn detach(&self, node: &NodeRef) -> bool {
        let mut nodes = self.nodes.borrow_mut();
        let before = nodes.len();
        nodes.retain(|n| !Rc::ptr_eq(n, node));
        nodes.len() != before
    }
}

/// A record plus a back-pointer to the category that currently holds it.
#[derive(Debug)]
pub struct TreeNode {
    record: Record,
    owner: RefCell<Weak<NodeList>>,
}

pub type NodeRef = Rc<TreeNode>;

impl TreeNode {
    /// A detached node.
    pub fn new(record: Record) -> NodeRef {
        Rc::new(TreeNode {
            record,
            owner: RefCell::new(Weak::new()),
        })
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn thread(&self) -> Option<&Rc<ThreadInfo>> {
        match &self.record {
            Record::Thread(thread) => Some(thread),
            Record::Monitor(_) => None,
        }
    }

    pub fn monitor(&self) -> Option<&Rc<MonitorInfo>> {
        match &self.record {
            Record::Monitor(monitor) => Some(monitor),
            Record::Thread(_) => None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.owner.borrow().strong_count() > 0
    }

    pub fn belongs_to(&self, category: &Category) -> bool {
        self.owner
            .borrow()
            .upgrade()
            .map(|owner| Rc::ptr_eq(&owner, &category.store))
            .unwrap_or(false)
    }
}

/// Named, ordered collection of nodes.
#[derive(Debug)]
pub struct Category {
    name: String,
    store: Rc<NodeList>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: Rc::new(NodeList::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn len(&self) -> usize {
        self.store.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_at(&self, index: usize) -> Option<NodeRef> {
        self.store.nodes.borrow().get(index).cloned()
    }

    /// Append `node`, detaching it from its previous category first.
    /// Re-adding a node to the category that already holds it moves it to the end.
    pub fn add(&self, node: &NodeRef) {
        let previous = node.owner.borrow().upgrade();
        if let Some(previous) = previous {
            previous.detach(node);
        }
        self.store.nodes.borrow_mut().push(Rc::clone(node));
        *node.owner.borrow_mut() = Rc::downgrade(&self.store);
    }

    /// Wrap `record` in a fresh node and append it.
    pub fn add_record(&self, record: impl Into<Record>) -> NodeRef {
        let node = TreeNode::new(record.into());
        self.add(&node);
        node
    }

    /// Remove `node` if this category holds it.
    pub fn remove(&self, node: &NodeRef) -> bool {
        if !node.belongs_to(self) {
            return false;
        }
        let removed = self.store.detach(node);
        *node.owner.borrow_mut() = Weak::new();
        removed
    }

    /// Snapshot of the nodes in order.
    pub fn nodes(&self) -> Vec<NodeRef> {
        self.store.nodes.borrow().clone()
    }

    pub fn threads(&self) -> Vec<Rc<ThreadInfo>> {
        self.store
            .nodes
            .borrow()
            .iter()
            .filter_map(|node| node.thread().cloned())
            .collect()
    }

    pub fn monitors(&self) -> Vec<Rc<MonitorInfo>> {
        self.store
            .nodes
            .borrow()
            .iter()
            .filter_map(|node| node.monitor().cloned())
            .collect()
    }
}

/// Synthetic result tree built by analyses. Never shares nodes with a dump's
/// own categories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultNode {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResultNode>,
}

impl ResultNode {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn push(&mut self, child: ResultNode) -> &mut ResultNode {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::ThreadTokens;

    fn thread(name: &str) -> ThreadInfo {
        let tokens = ThreadTokens {
            name: name.to_string(),
            state: Some("runnable".to_string()),
            ..Default::default()
        };
        ThreadInfo::new(format!("\"{name}\" runnable"), format!("\"{name}\" runnable\n"), 1, tokens)
    }

    #[test]
    fn test_add_and_index() {
        let category = Category::new("Threads");
        category.add_record(thread("main"));
        category.add_record(thread("worker"));

        assert_eq!(category.len(), 2);
        let second = category.node_at(1).unwrap();
        assert_eq!(second.thread().unwrap().name(), "worker");
        assert!(category.node_at(2).is_none());
    }

    #[test]
    fn test_attach_detaches_from_previous_owner() {
        let a = Category::new("A");
        let b = Category::new("B");
        let node = a.add_record(thread("main"));
        a.add_record(thread("other"));

        b.add(&node);

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert!(node.belongs_to(&b));
        assert!(!node.belongs_to(&a));
        assert_eq!(a.node_at(0).unwrap().thread().unwrap().name(), "other");
    }

    #[test]
    fn test_monitor_nodes_have_single_owner() {
        let a = Category::new("Monitors");
        let b = Category::new("Monitors without locking thread");
        let node = a.add_record(MonitorInfo::new("<0x1> (a Foo)"));

        b.add(&node);

        assert_eq!(a.len(), 0);
        assert_eq!(b.len(), 1);
        assert_eq!(b.monitors().len(), 1);
    }

    #[test]
    fn test_shared_record_needs_two_nodes() {
        let threads = Category::new("Threads");
        let sleeping = Category::new("Sleeping");
        let record = Record::from(thread("pool-1"));

        threads.add_record(record.clone());
        sleeping.add_record(record);

        assert_eq!(threads.len(), 1);
        assert_eq!(sleeping.len(), 1);
        assert!(Rc::ptr_eq(&threads.threads()[0], &sleeping.threads()[0]));
    }

    #[test]
    fn test_readd_moves_to_end() {
        let category = Category::new("Threads");
        let first = category.add_record(thread("a"));
        category.add_record(thread("b"));

        category.add(&first);

        assert_eq!(category.len(), 2);
        assert_eq!(category.node_at(1).unwrap().thread().unwrap().name(), "a");
    }

    #[test]
    fn test_remove() {
        let a = Category::new("A");
        let b = Category::new("B");
        let node = a.add_record(thread("main"));

        assert!(!b.remove(&node));
        assert!(a.remove(&node));
        assert!(a.is_empty());
        assert!(!node.is_attached());
    }

    #[test]
    fn test_dropping_category_releases_nodes() {
        let node = {
            let temp = Category::new("temp");
            temp.add_record(thread("main"))
        };
        assert!(!node.is_attached());

        let other = Category::new("other");
        other.add(&node);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_result_tree() {
        let mut root = ResultNode::new("Analysis");
        let child = root.push(ResultNode::new("Long running threads"));
        child.push(ResultNode::new("main").with_content("\"main\" runnable"));

        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].children[0].content.as_deref(), Some("\"main\" runnable"));
    }
}
