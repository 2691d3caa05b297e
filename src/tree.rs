//! Build a render-ready forest from a flat set of events.
//!
//! The forest is rebuilt from scratch on every change. Construction is a pure
//! function of the event set: same events in, same shape, levels and sibling
//! order out, regardless of arrival order.

use crate::event::ThreadEvent;
use crate::resolve::{KnownEvents, ParentIndex};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Visual indentation stops growing past this level
pub const MAX_INDENT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNode {
    event: Arc<ThreadEvent>,
    children: Vec<ThreadNode>,
    level: usize,
}

impl ThreadNode {
    pub fn event(&self) -> &ThreadEvent {
        &self.event
    }

    pub fn id(&self) -> &str {
        &self.event.id
    }

    pub fn children(&self) -> &[ThreadNode] {
        &self.children
    }

    /// Depth from the root of this node's tree, roots are 0
    pub fn level(&self) -> usize {
        self.level
    }

    /// Indentation to draw this node with. The logical level is unchanged.
    pub fn indent(&self, max: usize) -> usize {
        self.level.min(max)
    }

    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&ThreadNode> = self.children.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

/// A parent/child/level triple for consumers that don't want the nesting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatNode {
    pub id: String,
    pub parent: Option<String>,
    pub level: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Thread {
    roots: Vec<ThreadNode>,
    len: usize,
}

impl Thread {
    pub fn roots(&self) -> &[ThreadNode] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pre-order walk, i.e. display order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            stack: self.roots.iter().rev().collect(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&ThreadNode> {
        self.iter().find(|node| node.id() == id)
    }

    pub fn flatten(&self) -> Vec<FlatNode> {
        let mut flat = Vec::with_capacity(self.len);
        let mut stack: Vec<(&ThreadNode, Option<&str>)> =
            self.roots.iter().rev().map(|n| (n, None)).collect();

        while let Some((node, parent)) = stack.pop() {
            flat.push(FlatNode {
                id: node.id().to_owned(),
                parent: parent.map(str::to_owned),
                level: node.level,
            });
            stack.extend(node.children.iter().rev().map(|c| (c, Some(node.id()))));
        }

        flat
    }
}

pub struct Iter<'a> {
    stack: Vec<&'a ThreadNode>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ThreadNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Newest first, ties broken by id so the order never depends on arrival
fn display_order(a: &ThreadEvent, b: &ThreadEvent) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Resolve every event's parent, then drop links that would make an event its
/// own ancestor. Cycles are broken at their oldest member.
fn resolve_links(known: &KnownEvents) -> HashMap<&str, &str> {
    let index = ParentIndex::new(known);
    let mut parents: HashMap<&str, &str> = known
        .values()
        .filter_map(|ev| index.parent_of(ev).map(|p| (ev.id.as_str(), p)))
        .collect();

    let mut order: Vec<&ThreadEvent> = known.values().map(|e| e.as_ref()).collect();
    order.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    for ev in order {
        let start = ev.id.as_str();
        let mut seen = HashSet::new();
        let mut cur = start;
        while let Some(&parent) = parents.get(cur) {
            if parent == start {
                debug!("breaking reply cycle at {}", start);
                parents.remove(start);
                break;
            }
            if !seen.insert(parent) {
                // a cycle further up, it gets broken when its own member comes around
                break;
            }
            cur = parent;
        }
    }

    parents
}

pub fn build_thread(known: &KnownEvents) -> Thread {
    let parents = resolve_links(known);

    let mut children: HashMap<&str, Vec<&Arc<ThreadEvent>>> = HashMap::new();
    let mut roots: Vec<&Arc<ThreadEvent>> = Vec::new();
    for ev in known.values() {
        match parents.get(ev.id.as_str()) {
            Some(&parent) => children.entry(parent).or_default().push(ev),
            None => roots.push(ev),
        }
    }
    for list in children.values_mut() {
        list.sort_by(|a, b| display_order(a, b));
    }
    roots.sort_by(|a, b| display_order(a, b));

    // top-down pass for levels, giving a parent-before-child order
    let mut visit: Vec<(&Arc<ThreadEvent>, usize)> = Vec::with_capacity(known.len());
    let mut stack: Vec<(&Arc<ThreadEvent>, usize)> = roots.iter().map(|r| (*r, 0)).collect();
    while let Some((ev, level)) = stack.pop() {
        visit.push((ev, level));
        if let Some(kids) = children.get(ev.id.as_str()) {
            stack.extend(kids.iter().map(|k| (*k, level + 1)));
        }
    }

    // bottom-up pass to assemble owned nodes
    let mut built: HashMap<&str, ThreadNode> = HashMap::with_capacity(visit.len());
    for (ev, level) in visit.iter().rev() {
        let kids = children
            .get(ev.id.as_str())
            .map(|kids| {
                kids.iter()
                    .filter_map(|k| built.remove(k.id.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        built.insert(
            ev.id.as_str(),
            ThreadNode {
                event: Arc::clone(*ev),
                children: kids,
                level: *level,
            },
        );
    }

    let roots: Vec<ThreadNode> = roots
        .iter()
        .filter_map(|r| built.remove(r.id.as_str()))
        .collect();

    metrics::gauge!("threadcrumbs_thread_size", visit.len() as f64);

    Thread {
        roots,
        len: visit.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{COMMENT, LONG_FORM, TEXT_NOTE};

    fn ev(id: &str, kind: u16, created_at: u64, tags: Vec<Vec<&str>>) -> ThreadEvent {
        ThreadEvent::from_raw(id, "author", kind, created_at, "", tags)
    }

    fn known(events: Vec<ThreadEvent>) -> KnownEvents {
        events
            .into_iter()
            .map(|e| (e.id.clone(), Arc::new(e)))
            .collect()
    }

    fn assert_sorted(nodes: &[ThreadNode]) {
        for pair in nodes.windows(2) {
            assert!(pair[0].event().created_at >= pair[1].event().created_at);
        }
        for node in nodes {
            assert_sorted(node.children());
        }
    }

    #[test]
    fn test_flat_thread_scenario() {
        // T is the viewed target and is not part of the known set
        let thread = build_thread(&known(vec![
            ev("A", TEXT_NOTE, 1, vec![vec!["e", "T"]]),
            ev("B", TEXT_NOTE, 2, vec![vec!["e", "T"], vec!["e", "A"]]),
        ]));

        assert_eq!(thread.len(), 2);
        assert_eq!(thread.roots().len(), 1);
        let a = &thread.roots()[0];
        assert_eq!(a.id(), "A");
        assert_eq!(a.level(), 0);
        assert_eq!(a.children().len(), 1);
        assert_eq!(a.children()[0].id(), "B");
        assert_eq!(a.children()[0].level(), 1);
    }

    #[test]
    fn test_scoped_reply_fallback_scenario() {
        let thread = build_thread(&known(vec![
            ev("A", TEXT_NOTE, 1, vec![]),
            ev(
                "C",
                COMMENT,
                2,
                vec![vec!["a", "30023:ghost:nothing"], vec!["e", "A"]],
            ),
        ]));

        let c = thread.find("C").unwrap();
        assert_eq!(c.level(), 1);
        assert_eq!(thread.roots()[0].children()[0].id(), "C");
    }

    #[test]
    fn test_siblings_newest_first() {
        let thread = build_thread(&known(vec![
            ev("root", TEXT_NOTE, 1, vec![]),
            ev("old", TEXT_NOTE, 2, vec![vec!["e", "root"]]),
            ev("new", TEXT_NOTE, 9, vec![vec!["e", "root"]]),
            ev("mid", TEXT_NOTE, 5, vec![vec!["e", "root"]]),
            ev("late-root", TEXT_NOTE, 7, vec![]),
            ev("deep", TEXT_NOTE, 10, vec![vec!["e", "mid"]]),
        ]));

        let root_ids: Vec<&str> = thread.roots().iter().map(|n| n.id()).collect();
        assert_eq!(root_ids, vec!["late-root", "root"]);

        let order: Vec<&str> = thread.iter().map(|n| n.id()).collect();
        assert_eq!(order, vec!["late-root", "root", "new", "mid", "deep", "old"]);
        assert_sorted(thread.roots());
        assert_eq!(thread.find("root").unwrap().descendant_count(), 4);
    }

    #[test]
    fn test_ties_are_stable() {
        let events = vec![
            ev("b", TEXT_NOTE, 5, vec![]),
            ev("a", TEXT_NOTE, 5, vec![]),
            ev("c", TEXT_NOTE, 5, vec![]),
        ];
        let thread = build_thread(&known(events));
        let ids: Vec<&str> = thread.roots().iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let events = known(vec![
            ev("A", TEXT_NOTE, 1, vec![]),
            ev("B", TEXT_NOTE, 3, vec![vec!["e", "A"]]),
            ev("C", TEXT_NOTE, 3, vec![vec!["e", "A"]]),
            ev("D", COMMENT, 4, vec![vec!["e", "B"]]),
            ev("E", TEXT_NOTE, 2, vec![vec!["e", "nowhere"]]),
        ]);

        let first = build_thread(&events);
        let second = build_thread(&events);
        assert_eq!(first, second);
        assert_eq!(first.flatten(), second.flatten());
    }

    #[test]
    fn test_flatten_triples() {
        let thread = build_thread(&known(vec![
            ev("A", TEXT_NOTE, 1, vec![]),
            ev("B", TEXT_NOTE, 2, vec![vec!["e", "A"]]),
            ev("C", TEXT_NOTE, 3, vec![vec!["e", "B"]]),
        ]));

        assert_eq!(
            thread.flatten(),
            vec![
                FlatNode {
                    id: "A".to_string(),
                    parent: None,
                    level: 0
                },
                FlatNode {
                    id: "B".to_string(),
                    parent: Some("A".to_string()),
                    level: 1
                },
                FlatNode {
                    id: "C".to_string(),
                    parent: Some("B".to_string()),
                    level: 2
                },
            ]
        );
    }

    #[test]
    fn test_cycle_is_broken() {
        // malformed: each claims the other as parent
        let thread = build_thread(&known(vec![
            ev("x", TEXT_NOTE, 1, vec![vec!["e", "y"]]),
            ev("y", TEXT_NOTE, 2, vec![vec!["e", "x"]]),
        ]));

        assert_eq!(thread.len(), 2);
        assert_eq!(thread.iter().count(), 2);
        assert_eq!(thread.roots().len(), 1);
        assert_eq!(thread.roots()[0].id(), "x");
        assert_eq!(thread.roots()[0].children()[0].id(), "y");
    }

    #[test]
    fn test_three_cycle_is_broken() {
        let thread = build_thread(&known(vec![
            ev("x", TEXT_NOTE, 1, vec![vec!["e", "z"]]),
            ev("y", TEXT_NOTE, 2, vec![vec!["e", "x"]]),
            ev("z", TEXT_NOTE, 3, vec![vec!["e", "y"]]),
            ev("w", TEXT_NOTE, 4, vec![vec!["e", "z"]]),
        ]));

        assert_eq!(thread.iter().count(), 4);
        assert_eq!(thread.find("w").unwrap().level(), 3);
    }

    #[test]
    fn test_deep_chain_and_indent_clamp() {
        let mut events = vec![ev("n0", TEXT_NOTE, 0, vec![])];
        let ids: Vec<String> = (0..2000).map(|i| format!("n{i}")).collect();
        for i in 1..ids.len() {
            events.push(ev(&ids[i], TEXT_NOTE, i as u64, vec![vec!["e", ids[i - 1].as_str()]]));
        }
        let thread = build_thread(&known(events));

        let last = thread.find("n1999").unwrap();
        assert_eq!(last.level(), 1999);
        assert_eq!(last.indent(MAX_INDENT), MAX_INDENT);
        assert_eq!(thread.roots()[0].indent(MAX_INDENT), 0);
    }

    #[test]
    fn test_many_comments_on_one_article() {
        let coord = "30023:author:post";
        let mut events = vec![ev("article", LONG_FORM, 0, vec![vec!["d", "post"]])];
        let ids: Vec<String> = (0..2000).map(|i| format!("c{i}")).collect();
        for (i, id) in ids.iter().enumerate() {
            events.push(ev(
                id,
                COMMENT,
                i as u64 + 1,
                vec![vec!["A", coord], vec!["a", coord]],
            ));
        }
        let thread = build_thread(&known(events));

        assert_eq!(thread.roots().len(), 1);
        let article = &thread.roots()[0];
        assert_eq!(article.id(), "article");
        assert_eq!(article.children().len(), 2000);
        assert_eq!(article.children()[0].id(), "c1999");
        assert!(article.children().iter().all(|c| c.level() == 1));
    }

    #[test]
    fn test_empty() {
        let thread = build_thread(&KnownEvents::new());
        assert!(thread.is_empty());
        assert!(thread.flatten().is_empty());
    }
}
