//! Per-size-class subpage lists
//!
//! Subpages with free slots are kept in circular doubly linked lists, one per
//! size class, each headed by a sentinel node. Nodes live in a single arena
//! and link to each other by index, so insertion and removal stay O(1)
//! without reference cycles.

use tracing::trace;

use super::locator::Locator;
use super::subpage::Subpage;

/// Index of a node (head or subpage) in the arena
///
/// The generation changes whenever a slot is vacated, so an id kept past
/// `remove` never resolves to the node that reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubpageId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy)]
struct Links {
    prev: SubpageId,
    next: SubpageId,
}

enum NodeKind {
    Head,
    Page(Subpage),
    Vacant,
}

struct Node {
    /// `None` while the node is outside every list
    links: Option<Links>,
    kind: NodeKind,
    generation: u32,
}

/// Arena of subpages and their size-class list heads
pub(crate) struct SubpagePool {
    nodes: Vec<Node>,
    vacant: Vec<usize>,
    /// Keep a fully free subpage when it is the last one of its class
    retain_sole: bool,
}

impl SubpagePool {
    pub fn new(retain_sole: bool) -> Self {
        Self {
            nodes: Vec::new(),
            vacant: Vec::new(),
            retain_sole,
        }
    }

    /// Create an empty list and return its sentinel
    pub fn new_head(&mut self) -> SubpageId {
        let id = self.slot_for(NodeKind::Head);
        self.nodes[id.index].links = Some(Links { prev: id, next: id });
        id
    }

    /// Store a subpage in the arena without linking it anywhere
    pub fn insert(&mut self, subpage: Subpage) -> SubpageId {
        self.slot_for(NodeKind::Page(subpage))
    }

    /// Drop a retired subpage whose page has gone back to the chunk for good
    pub fn remove(&mut self, id: SubpageId) -> Subpage {
        assert!(
            self.nodes[id.index].links.is_none(),
            "removing subpage {} while it is still linked",
            id.index
        );
        let node = &mut self.nodes[id.index];
        let kind = std::mem::replace(&mut node.kind, NodeKind::Vacant);
        node.generation = node.generation.wrapping_add(1);
        self.vacant.push(id.index);
        match kind {
            NodeKind::Page(subpage) => subpage,
            _ => panic!("node {} is not a subpage", id.index),
        }
    }

    fn slot_for(&mut self, kind: NodeKind) -> SubpageId {
        match self.vacant.pop() {
            Some(index) => {
                let node = &mut self.nodes[index];
                node.links = None;
                node.kind = kind;
                SubpageId {
                    index,
                    generation: node.generation,
                }
            }
            None => {
                self.nodes.push(Node {
                    links: None,
                    kind,
                    generation: 0,
                });
                SubpageId {
                    index: self.nodes.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    pub fn get(&self, id: SubpageId) -> &Subpage {
        debug_assert_eq!(self.nodes[id.index].generation, id.generation, "stale subpage id");
        match &self.nodes[id.index].kind {
            NodeKind::Page(subpage) => subpage,
            _ => panic!("node {} is not a subpage", id.index),
        }
    }

    /// Subpage at `id`, or `None` once it has been removed
    pub fn try_get(&self, id: SubpageId) -> Option<&Subpage> {
        match self.nodes.get(id.index) {
            Some(Node {
                kind: NodeKind::Page(subpage),
                generation,
                ..
            }) if *generation == id.generation => Some(subpage),
            _ => None,
        }
    }

    fn get_mut(&mut self, id: SubpageId) -> &mut Subpage {
        debug_assert_eq!(self.nodes[id.index].generation, id.generation, "stale subpage id");
        match &mut self.nodes[id.index].kind {
            NodeKind::Page(subpage) => subpage,
            _ => panic!("node {} is not a subpage", id.index),
        }
    }

    /// (Re)initialize a subpage for `elem_size` and link it under `head`
    pub fn init(&mut self, head: SubpageId, id: SubpageId, elem_size: usize) {
        self.get_mut(id).reset(elem_size);
        self.link(head, id);
    }

    /// First subpage in the list, if the list is not empty
    pub fn first(&self, head: SubpageId) -> Option<SubpageId> {
        let next = self.links(head).next;
        (next != head).then_some(next)
    }

    /// Number of subpages linked under `head`
    pub fn len(&self, head: SubpageId) -> usize {
        let mut count = 0;
        let mut cur = self.links(head).next;
        while cur != head {
            count += 1;
            cur = self.links(cur).next;
        }
        count
    }

    #[cfg(test)]
    pub fn is_linked(&self, id: SubpageId) -> bool {
        self.nodes[id.index].links.is_some()
    }

    /// Lease one element, or `None` when this subpage has nothing to give
    pub fn allocate(&mut self, id: SubpageId) -> Option<Locator> {
        let subpage = self.get_mut(id);
        if subpage.elem_size() == 0 {
            return Some(subpage.locator(0));
        }
        if subpage.num_avail() == 0 || !subpage.do_not_destroy {
            return None;
        }

        let idx = subpage.claim();
        let locator = subpage.locator(idx);
        if subpage.num_avail() == 0 {
            self.unlink(id);
        }
        Some(locator)
    }

    /// Return element `idx` to the subpage
    ///
    /// Returns `true` while the subpage is still in use. `false` means it was
    /// retired and unlinked, and its page may go back to the chunk.
    pub fn free(&mut self, head: SubpageId, id: SubpageId, idx: usize) -> bool {
        let subpage = self.get_mut(id);
        if subpage.elem_size() == 0 {
            return true;
        }

        let was_full = subpage.num_avail() == 0;
        subpage.release(idx);

        if was_full {
            self.link(head, id);
            return true;
        }
        if !self.get(id).is_fully_free() {
            return true;
        }

        let links = self.links(id);
        if self.retain_sole && links.prev == links.next {
            // Last subpage of its class stays around to avoid page churn.
            return true;
        }

        let subpage = self.get_mut(id);
        subpage.do_not_destroy = false;
        trace!(
            page = subpage.run_id(),
            elem_size = subpage.elem_size(),
            "Retiring idle subpage"
        );
        self.unlink(id);
        false
    }

    fn links(&self, id: SubpageId) -> Links {
        match self.nodes[id.index].links {
            Some(links) => links,
            None => panic!("node {} is not linked", id.index),
        }
    }

    fn link(&mut self, head: SubpageId, id: SubpageId) {
        assert!(
            self.nodes[id.index].links.is_none(),
            "subpage {} is already linked",
            id.index
        );
        let next = self.links(head).next;
        self.nodes[id.index].links = Some(Links { prev: head, next });
        self.set_prev(next, id);
        self.set_next(head, id);
    }

    fn unlink(&mut self, id: SubpageId) {
        let Some(Links { prev, next }) = self.nodes[id.index].links.take() else {
            panic!("subpage {} is not linked", id.index);
        };
        self.set_next(prev, next);
        self.set_prev(next, prev);
    }

    fn set_prev(&mut self, id: SubpageId, prev: SubpageId) {
        if let Some(links) = self.nodes[id.index].links.as_mut() {
            links.prev = prev;
        }
    }

    fn set_next(&mut self, id: SubpageId, next: SubpageId) {
        if let Some(links) = self.nodes[id.index].links.as_mut() {
            links.next = next;
        }
    }
}
