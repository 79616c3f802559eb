//! AVL tree with cached subtree folds.
//!
//! Every node stores
//!
//! ```text
//! fold = combine(combine(fold(left), accumulate(identity, value)), fold(right))
//! ```
//!
//! with missing children skipped. Folding in key order means the reducer only
//! has to be associative, not commutative. Insert and remove recurse down to
//! the affected node and refold on the way back up, together with any
//! rotations, so each change costs `O(height)` reducer calls.

use std::cmp::Ordering;
use std::fmt::Debug;

use super::Reducer;

type Link<K, V, A> = Option<Box<Node<K, V, A>>>;

struct Node<K, V, A> {
    key: K,
    value: V,
    fold: A,
    height: u32,
    left: Link<K, V, A>,
    right: Link<K, V, A>,
}

fn height<K, V, A>(link: &Link<K, V, A>) -> u32 {
    link.as_ref().map_or(0, |node| node.height)
}

impl<K, V, A: Clone> Node<K, V, A> {
    fn leaf<R: Reducer<V, A>>(key: K, value: V, reducer: &R) -> Box<Self> {
        let fold = reducer.accumulate(reducer.identity(), &value);
        Box::new(Self {
            key,
            value,
            fold,
            height: 1,
            left: None,
            right: None,
        })
    }

    /// Recompute height and fold from the children.
    fn refold<R: Reducer<V, A>>(&mut self, reducer: &R) {
        self.height = 1 + height(&self.left).max(height(&self.right));
        let own = reducer.accumulate(reducer.identity(), &self.value);
        let acc = match &self.left {
            Some(left) => reducer.combine(left.fold.clone(), own),
            None => own,
        };
        self.fold = match &self.right {
            Some(right) => reducer.combine(acc, right.fold.clone()),
            None => acc,
        };
    }

    fn balance(&self) -> i64 {
        i64::from(height(&self.left)) - i64::from(height(&self.right))
    }
}

fn rotate_right<K, V, A: Clone, R: Reducer<V, A>>(
    mut node: Box<Node<K, V, A>>,
    reducer: &R,
) -> Box<Node<K, V, A>> {
    let Some(mut pivot) = node.left.take() else {
        return node;
    };
    node.left = pivot.right.take();
    node.refold(reducer);
    pivot.right = Some(node);
    pivot.refold(reducer);
    pivot
}

fn rotate_left<K, V, A: Clone, R: Reducer<V, A>>(
    mut node: Box<Node<K, V, A>>,
    reducer: &R,
) -> Box<Node<K, V, A>> {
    let Some(mut pivot) = node.right.take() else {
        return node;
    };
    node.right = pivot.left.take();
    node.refold(reducer);
    pivot.left = Some(node);
    pivot.refold(reducer);
    pivot
}

fn rebalance<K, V, A: Clone, R: Reducer<V, A>>(
    mut node: Box<Node<K, V, A>>,
    reducer: &R,
) -> Box<Node<K, V, A>> {
    node.refold(reducer);
    let balance = node.balance();
    if balance > 1 {
        if node.left.as_ref().map_or(0, |left| left.balance()) < 0 {
            node.left = node.left.take().map(|left| rotate_left(left, reducer));
        }
        rotate_right(node, reducer)
    } else if balance < -1 {
        if node.right.as_ref().map_or(0, |right| right.balance()) > 0 {
            node.right = node.right.take().map(|right| rotate_right(right, reducer));
        }
        rotate_left(node, reducer)
    } else {
        node
    }
}

fn insert<K: Ord, V, A: Clone, R: Reducer<V, A>>(
    link: Link<K, V, A>,
    key: K,
    value: V,
    reducer: &R,
    replaced: &mut Option<V>,
) -> Box<Node<K, V, A>> {
    let Some(mut node) = link else {
        return Node::leaf(key, value, reducer);
    };
    match key.cmp(&node.key) {
        Ordering::Less => node.left = Some(insert(node.left.take(), key, value, reducer, replaced)),
        Ordering::Greater => {
            node.right = Some(insert(node.right.take(), key, value, reducer, replaced))
        }
        Ordering::Equal => *replaced = Some(std::mem::replace(&mut node.value, value)),
    }
    rebalance(node, reducer)
}

/// Detach the leftmost node of a subtree. Returns the rest and the node.
fn take_min<K, V, A: Clone, R: Reducer<V, A>>(
    mut node: Box<Node<K, V, A>>,
    reducer: &R,
) -> (Link<K, V, A>, Box<Node<K, V, A>>) {
    match node.left.take() {
        None => (node.right.take(), node),
        Some(left) => {
            let (rest, min) = take_min(left, reducer);
            node.left = rest;
            (Some(rebalance(node, reducer)), min)
        }
    }
}

fn remove<K: Ord, V, A: Clone, R: Reducer<V, A>>(
    link: Link<K, V, A>,
    key: &K,
    reducer: &R,
    removed: &mut Option<V>,
) -> Link<K, V, A> {
    let mut node = link?;
    match key.cmp(&node.key) {
        Ordering::Less => node.left = remove(node.left.take(), key, reducer, removed),
        Ordering::Greater => node.right = remove(node.right.take(), key, reducer, removed),
        Ordering::Equal => {
            let Node {
                value, left, right, ..
            } = *node;
            *removed = Some(value);
            return match (left, right) {
                (None, None) => None,
                (Some(child), None) | (None, Some(child)) => Some(child),
                (Some(left), Some(right)) => {
                    let (rest, mut successor) = take_min(right, reducer);
                    successor.left = Some(left);
                    successor.right = rest;
                    Some(rebalance(successor, reducer))
                }
            };
        }
    }
    Some(rebalance(node, reducer))
}

/// An ordered map that keeps the reduction of its values current.
pub struct ReduceTree<K, V, A, R> {
    root: Link<K, V, A>,
    len: usize,
    reducer: R,
}

impl<K, V, A, R> ReduceTree<K, V, A, R>
where
    K: Ord,
    A: Clone,
    R: Reducer<V, A>,
{
    pub fn new(reducer: R) -> Self {
        Self {
            root: None,
            len: 0,
            reducer,
        }
    }

    /// Insert or replace `key`, returning the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut replaced = None;
        self.root = Some(insert(
            self.root.take(),
            key,
            value,
            &self.reducer,
            &mut replaced,
        ));
        if replaced.is_none() {
            self.len += 1;
        }
        replaced
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let mut removed = None;
        self.root = remove(self.root.take(), key, &self.reducer, &mut removed);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let mut link = self.root.as_deref();
        while let Some(node) = link {
            link = match key.cmp(&node.key) {
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
                Ordering::Equal => return Some(&node.value),
            };
        }
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// The reduction of every value, in key order.
    pub fn fold(&self) -> A {
        match &self.root {
            Some(root) => root.fold.clone(),
            None => self.reducer.identity(),
        }
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }
}

impl<K, V, A, R> ReduceTree<K, V, A, R> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Height of the tree; 0 when empty.
    pub fn height(&self) -> u32 {
        height(&self.root)
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    /// Entries in key order.
    pub fn iter(&self) -> Iter<'_, K, V, A> {
        let mut iter = Iter {
            stack: Vec::new(),
            remaining: self.len,
        };
        iter.push_left(self.root.as_deref());
        iter
    }
}

impl<K: Debug, V: Debug, A, R> Debug for ReduceTree<K, V, A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// In-order iterator over a [`ReduceTree`].
pub struct Iter<'a, K, V, A> {
    stack: Vec<&'a Node<K, V, A>>,
    remaining: usize,
}

impl<'a, K, V, A> Iter<'a, K, V, A> {
    fn push_left(&mut self, mut link: Option<&'a Node<K, V, A>>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = node.left.as_deref();
        }
    }
}

impl<'a, K, V, A> Iterator for Iter<'a, K, V, A> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_deref());
        self.remaining = self.remaining.saturating_sub(1);
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
