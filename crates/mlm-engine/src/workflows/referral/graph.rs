//! Read-only traversal over participant parent links.
//!
//! The parent pointers are not structurally guaranteed to be acyclic, so every walk here
//! carries a visited set and a depth cap.

use std::collections::{HashMap, HashSet, VecDeque};

use super::domain::{Handle, Participant};
use super::repository::{ReferralStore, StoreError};

/// Traversal entry point bound to a store and a depth cap.
#[derive(Clone, Copy)]
pub struct ReferralGraph<'a> {
    store: &'a dyn ReferralStore,
    max_depth: usize,
}

impl<'a> ReferralGraph<'a> {
    pub fn new(store: &'a dyn ReferralStore, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    /// Lazy walk from `handle` (inclusive) toward the root of its tree.
    pub fn ancestor_chain(&self, handle: &Handle) -> AncestorChain<'a> {
        AncestorChain {
            store: self.store,
            next: Some(handle.clone()),
            visited: HashSet::new(),
            hops: 0,
            max_depth: self.max_depth,
            end: None,
        }
    }

    pub fn direct_children(&self, handle: &Handle) -> Result<Vec<Participant>, StoreError> {
        self.store.direct_children(handle)
    }

    /// Load the subtree under `handle` once so repeated line queries do not hit the store.
    pub fn downline(&self, handle: &Handle) -> Result<DownlineSnapshot, StoreError> {
        DownlineSnapshot::capture(self.store, handle, self.max_depth)
    }
}

/// Why an ancestor walk stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEnd {
    /// Reached a participant without a parent.
    Root,
    /// A handle on the chain has no participant record.
    Missing(Handle),
    /// The chain led back to an already visited handle.
    Cycle(Handle),
    DepthCap,
}

/// Iterator returned by [`ReferralGraph::ancestor_chain`].
pub struct AncestorChain<'a> {
    store: &'a dyn ReferralStore,
    next: Option<Handle>,
    visited: HashSet<Handle>,
    hops: usize,
    max_depth: usize,
    end: Option<ChainEnd>,
}

impl AncestorChain<'_> {
    /// Populated once the iterator is exhausted; `None` after a store error.
    pub fn end(&self) -> Option<&ChainEnd> {
        self.end.as_ref()
    }
}

impl Iterator for AncestorChain<'_> {
    type Item = Result<Participant, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.next.take()?;

        if !self.visited.insert(handle.clone()) {
            self.end = Some(ChainEnd::Cycle(handle));
            return None;
        }

        let participant = match self.store.participant_by_handle(&handle) {
            Ok(Some(participant)) => participant,
            Ok(None) => {
                self.end = Some(ChainEnd::Missing(handle));
                return None;
            }
            Err(err) => return Some(Err(err)),
        };

        match &participant.parent_handle {
            Some(parent) if self.hops < self.max_depth => {
                self.hops += 1;
                self.next = Some(parent.clone());
            }
            Some(_) => self.end = Some(ChainEnd::DepthCap),
            None => self.end = Some(ChainEnd::Root),
        }

        Some(Ok(participant))
    }
}

/// Subtree below a participant, loaded breadth-first up to the depth cap.
#[derive(Debug, Clone)]
pub struct DownlineSnapshot {
    root: Handle,
    children: HashMap<Handle, Vec<Participant>>,
}

impl DownlineSnapshot {
    pub fn capture(
        store: &dyn ReferralStore,
        root: &Handle,
        max_depth: usize,
    ) -> Result<Self, StoreError> {
        let mut children = HashMap::new();
        let mut visited = HashSet::from([root.clone()]);
        let mut queue = VecDeque::from([(root.clone(), 0usize)]);

        while let Some((handle, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }

            let fresh: Vec<Participant> = store
                .direct_children(&handle)?
                .into_iter()
                .filter(|child| visited.insert(child.handle.clone()))
                .collect();

            for child in &fresh {
                queue.push_back((child.handle.clone(), depth + 1));
            }
            children.insert(handle, fresh);
        }

        Ok(Self {
            root: root.clone(),
            children,
        })
    }

    pub fn root(&self) -> &Handle {
        &self.root
    }

    pub fn children_of(&self, handle: &Handle) -> &[Participant] {
        self.children
            .get(handle)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every participant in the subtree, excluding the root.
    pub fn members(&self) -> impl Iterator<Item = &Participant> {
        self.children.values().flatten()
    }

    /// Lazy root-to-leaf paths, starting at the root's children.
    pub fn lines(&self) -> Lines<'_> {
        let stack = self
            .children_of(&self.root)
            .iter()
            .rev()
            .map(|child| (0, child))
            .collect();

        Lines {
            snapshot: self,
            stack,
            path: Vec::new(),
        }
    }

    /// Count lines containing a member matching `predicate`, stopping once `limit` is reached.
    pub fn count_lines_matching<P>(&self, limit: usize, mut predicate: P) -> usize
    where
        P: FnMut(&Participant) -> bool,
    {
        self.lines()
            .filter(|line| line.iter().any(|&member| predicate(member)))
            .take(limit)
            .count()
    }
}

/// Depth-first line enumeration using an explicit stack.
pub struct Lines<'s> {
    snapshot: &'s DownlineSnapshot,
    stack: Vec<(usize, &'s Participant)>,
    path: Vec<&'s Participant>,
}

impl<'s> Iterator for Lines<'s> {
    type Item = Vec<&'s Participant>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((depth, node)) = self.stack.pop() {
            self.path.truncate(depth);
            self.path.push(node);

            let children = self.snapshot.children_of(&node.handle);
            if children.is_empty() {
                return Some(self.path.clone());
            }

            for child in children.iter().rev() {
                self.stack.push((depth + 1, child));
            }
        }
        None
    }
}
