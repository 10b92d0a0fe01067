//! Closure Engine: DFS over the reference graph.
//!
//! Produces both a closure set and a topologically-ordered sequence
//! (dependencies before dependents). Cycles are tolerated by marking a
//! path `visited` on entry rather than on completion, and the traversal is
//! implemented iteratively (an explicit stack) rather than recursively,
//! since store closures can easily exceed thousands of paths and overflow
//! a default stack (see DESIGN NOTES in the spec).

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::nix_store::StorePath;

/// Supplies the direct references of a store path. Implemented by the
/// Reference Cache, with a fallback to a server-side narinfo fetch when
/// `query_server` is enabled (see [`ClosureEngine::new`]).
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn references(&self, path: &StorePath) -> Result<Vec<StorePath>>;
}

pub struct ClosureEngine<'a> {
    source: &'a (dyn ReferenceSource + 'a),
}

impl<'a> ClosureEngine<'a> {
    pub fn new(source: &'a (dyn ReferenceSource + 'a)) -> Self {
        Self { source }
    }

    /// Returns the transitive-reference-closed set containing `roots`.
    pub async fn closure(&self, roots: &[StorePath]) -> Result<HashSet<StorePath>> {
        Ok(self.ordered_closure(roots).await?.into_iter().collect())
    }

    /// Same traversal as [`closure`](Self::closure), but returns the
    /// topologically-ordered sequence (index(x) < index(y) whenever x is a
    /// non-self reference of y). Ties are broken by discovery order.
    pub async fn ordered_closure(&self, roots: &[StorePath]) -> Result<Vec<StorePath>> {
        let mut visited: HashSet<StorePath> = HashSet::new();
        let mut order: Vec<StorePath> = Vec::new();

        // Each stack frame is (path, remaining children not yet pushed).
        // A frame is popped and appended to `order` only once all of its
        // children have been fully processed (post-order).
        enum Frame {
            Enter(StorePath),
            Exit(StorePath),
        }

        let mut stack: Vec<Frame> = Vec::new();
        for root in roots.iter().rev() {
            stack.push(Frame::Enter(root.clone()));
        }

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(path) => {
                    if visited.contains(&path) {
                        continue;
                    }
                    visited.insert(path.clone());

                    stack.push(Frame::Exit(path.clone()));

                    let refs = self.source.references(&path).await?;
                    for r in refs.into_iter().rev() {
                        if r != path && !visited.contains(&r) {
                            stack.push(Frame::Enter(r));
                        }
                    }
                }
                Frame::Exit(path) => {
                    order.push(path);
                }
            }
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    // A fixed hash prefix per test path, padded to 32 valid base32 chars.
    fn path(hash_seed: char, name: &str) -> StorePath {
        let prefix: String = std::iter::repeat(hash_seed).take(32).collect();
        StorePath::from_base_name(PathBuf::from(format!("{prefix}-{name}"))).unwrap()
    }

    struct FakeGraph {
        edges: Mutex<HashMap<StorePath, Vec<StorePath>>>,
    }

    #[async_trait]
    impl ReferenceSource for FakeGraph {
        async fn references(&self, path: &StorePath) -> Result<Vec<StorePath>> {
            Ok(self
                .edges
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn closure_includes_transitive_references() {
        let a = path('a', "a");
        let b = path('b', "b");
        let c = path('c', "c");

        let mut edges = HashMap::new();
        edges.insert(a.clone(), vec![b.clone()]);
        edges.insert(b.clone(), vec![c.clone()]);
        edges.insert(c.clone(), vec![]);

        let graph = FakeGraph {
            edges: Mutex::new(edges),
        };
        let engine = ClosureEngine::new(&graph);

        let set = engine.closure(&[a.clone()]).await.unwrap();
        assert!(set.contains(&a));
        assert!(set.contains(&b));
        assert!(set.contains(&c));
        assert_eq!(set.len(), 3);
    }

    #[tokio::test]
    async fn ordered_closure_puts_dependencies_first() {
        let a = path('a', "a");
        let b = path('b', "b");
        let c = path('c', "c");

        let mut edges = HashMap::new();
        edges.insert(a.clone(), vec![b.clone()]);
        edges.insert(b.clone(), vec![c.clone()]);
        edges.insert(c.clone(), vec![]);

        let graph = FakeGraph {
            edges: Mutex::new(edges),
        };
        let engine = ClosureEngine::new(&graph);

        let order = engine.ordered_closure(&[a.clone()]).await.unwrap();
        let idx = |p: &StorePath| order.iter().position(|x| x == p).unwrap();
        assert!(idx(&c) < idx(&b));
        assert!(idx(&b) < idx(&a));
    }

    #[tokio::test]
    async fn tolerates_cycles() {
        let a = path('a', "a");
        let b = path('b', "b");

        let mut edges = HashMap::new();
        edges.insert(a.clone(), vec![b.clone()]);
        edges.insert(b.clone(), vec![a.clone()]);

        let graph = FakeGraph {
            edges: Mutex::new(edges),
        };
        let engine = ClosureEngine::new(&graph);

        let order = engine.ordered_closure(&[a.clone()]).await.unwrap();
        assert_eq!(order.len(), 2);
    }

    #[tokio::test]
    async fn self_reference_appears_once() {
        let a = path('a', "a");
        let mut edges = HashMap::new();
        edges.insert(a.clone(), vec![a.clone()]);

        let graph = FakeGraph {
            edges: Mutex::new(edges),
        };
        let engine = ClosureEngine::new(&graph);

        let order = engine.ordered_closure(&[a.clone()]).await.unwrap();
        assert_eq!(order, vec![a]);
    }

    #[tokio::test]
    async fn closure_is_idempotent() {
        let a = path('a', "a");
        let b = path('b', "b");

        let mut edges = HashMap::new();
        edges.insert(a.clone(), vec![b.clone()]);
        edges.insert(b.clone(), vec![]);

        let graph = FakeGraph {
            edges: Mutex::new(edges),
        };
        let engine = ClosureEngine::new(&graph);

        let roots: Vec<_> = engine.closure(&[a.clone()]).await.unwrap().into_iter().collect();
        let twice = engine.closure(&roots).await.unwrap();
        let once = engine.closure(&[a]).await.unwrap();
        assert_eq!(once, twice);
    }
}
