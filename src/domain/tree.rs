//! Flat list -> nested forest assembly
//!
//! Nodes live in an arena (`Vec<T>`); parent/child relations are index lists,
//! so assembly never aliases or mutates the caller's input.

use super::common::StringUuid;
use super::organization::HierarchyNode;
use serde::Serialize;
use std::collections::HashMap;

/// Anything that can be placed in a forest by id / parent id.
pub trait TreeItem {
    fn item_id(&self) -> StringUuid;
    fn parent_item_id(&self) -> Option<StringUuid>;
}

impl TreeItem for HierarchyNode {
    fn item_id(&self) -> StringUuid {
        self.id
    }

    fn parent_item_id(&self) -> Option<StringUuid> {
        self.parent_id
    }
}

/// Arena-backed forest
#[derive(Debug, Clone)]
pub struct Forest<T> {
    items: Vec<T>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
}

/// Owned nested view of a forest, for serialization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode<T> {
    #[serde(flatten)]
    pub item: T,
    pub children: Vec<TreeNode<T>>,
}

impl<T: TreeItem + Clone> Forest<T> {
    /// Assemble `items` (expected ordered by level then name) into a forest.
    ///
    /// Children keep input order under each parent. An item whose parent id is
    /// not in `items` becomes a root of its own subtree. Items caught in a
    /// parent cycle are unreachable from any root; the first of them in input
    /// order is promoted to a root so nothing is dropped.
    pub fn assemble(items: &[T]) -> Self {
        let items: Vec<T> = items.to_vec();
        let index: HashMap<StringUuid, usize> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.item_id(), i))
            .collect();

        let mut parents = vec![None; items.len()];
        let mut children = vec![Vec::new(); items.len()];
        let mut roots = Vec::new();

        for (i, item) in items.iter().enumerate() {
            match item.parent_item_id().and_then(|pid| index.get(&pid).copied()) {
                Some(parent) if parent != i => {
                    parents[i] = Some(parent);
                    children[parent].push(i);
                }
                _ => roots.push(i),
            }
        }

        let mut forest = Self {
            items,
            parents,
            children,
            roots,
        };
        forest.promote_cycles();
        forest
    }

    fn promote_cycles(&mut self) {
        let mut reached = vec![false; self.items.len()];
        let mut stack: Vec<usize> = self.roots.clone();
        loop {
            while let Some(i) = stack.pop() {
                if reached[i] {
                    continue;
                }
                reached[i] = true;
                stack.extend(self.children[i].iter().copied());
            }
            let Some(stray) = reached.iter().position(|r| !r) else {
                break;
            };
            if let Some(parent) = self.parents[stray].take() {
                self.children[parent].retain(|&c| c != stray);
            }
            self.roots.push(stray);
            stack.push(stray);
        }
    }
}

impl<T> Forest<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn item(&self, index: usize) -> &T {
        &self.items[index]
    }

    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    /// Arena index of the parent the item was attached to, if any.
    pub fn parent(&self, index: usize) -> Option<usize> {
        self.parents[index]
    }

    /// Pre-order walk: each root, then its subtree, in child order.
    pub fn pre_order(&self) -> Vec<&T> {
        let mut out = Vec::with_capacity(self.items.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            out.push(&self.items[i]);
            stack.extend(self.children[i].iter().rev().copied());
        }
        out
    }

    /// Consume the arena into owned nested nodes.
    pub fn into_nested(self) -> Vec<TreeNode<T>> {
        let Forest {
            items,
            children,
            roots,
            ..
        } = self;
        let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();

        fn build<T>(i: usize, slots: &mut [Option<T>], children: &[Vec<usize>]) -> Option<TreeNode<T>> {
            let item = slots[i].take()?;
            let nested = children[i]
                .iter()
                .filter_map(|&c| build(c, slots, children))
                .collect();
            Some(TreeNode {
                item,
                children: nested,
            })
        }

        roots
            .iter()
            .filter_map(|&r| build(r, &mut slots, &children))
            .collect()
    }
}
