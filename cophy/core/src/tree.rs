use core::fmt;

use thiserror::Error;

use cophy_core_bond::NonNegativeF64;

/// An opaque reference to a node of a [`LineageTree`].
///
/// A `Node` is only meaningful together with the tree that produced it; the
/// engine never mixes references between the host and the guest tree.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(usize);

impl Node {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for Node {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Node({})", self.0)
    }
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("a tree must have at least one node")]
    Empty,
    #[error("the parent and height tables differ in length")]
    LengthMismatch,
    #[error("a tree must have exactly one root, found {roots}")]
    RootCount { roots: usize },
    #[error("node {node} names a parent outside the tree")]
    InvalidParent { node: usize },
    #[error("node {node} has {count} children, internal nodes must have two")]
    NonBinaryNode { node: usize, count: usize },
    #[error("the height of node {node} is not a finite non-negative number")]
    InvalidHeight { node: usize },
    #[error("node {child} does not lie strictly below its parent {parent}")]
    ChildAboveParent { child: usize, parent: usize },
    #[error("node {node} is not reachable from the root")]
    Unreachable { node: usize },
}

/// An immutable rooted bifurcating tree with node heights, i.e. distances
/// above the present.
///
/// Built once from a parent table and never mutated afterwards; the engine
/// only reads it.
pub struct LineageTree {
    parents: Vec<Option<Node>>,
    children: Vec<Option<(Node, Node)>>,
    heights: Vec<NonNegativeF64>,
    taxa: Vec<Option<String>>,
    root: Node,
    external: Vec<Node>,
    internal: Vec<Node>,
}

impl LineageTree {
    /// Builds a tree from per-node parent indices (`None` for the root) and
    /// per-node heights.
    ///
    /// # Errors
    ///
    /// Returns a [`TreeError`] if the tables are inconsistent, a height is
    /// not a finite non-negative number, the tree is not singly rooted and
    /// bifurcating, or a child does not lie strictly below its parent.
    pub fn from_parents(parents: &[Option<usize>], heights: &[f64]) -> Result<Self, TreeError> {
        Self::from_parents_with_taxa(parents, heights, &vec![None; parents.len()])
    }

    /// As [`LineageTree::from_parents`], additionally attaching taxon labels
    /// to external nodes.
    ///
    /// # Errors
    ///
    /// See [`LineageTree::from_parents`].
    pub fn from_parents_with_taxa(
        parents: &[Option<usize>],
        heights: &[f64],
        taxa: &[Option<&str>],
    ) -> Result<Self, TreeError> {
        if parents.is_empty() {
            return Err(TreeError::Empty);
        }

        if parents.len() != heights.len() || parents.len() != taxa.len() {
            return Err(TreeError::LengthMismatch);
        }

        let heights: Vec<NonNegativeF64> = heights
            .iter()
            .enumerate()
            .map(|(node, height)| {
                NonNegativeF64::new(*height).map_err(|_| TreeError::InvalidHeight { node })
            })
            .collect::<Result<_, _>>()?;

        let mut children_table: Vec<Vec<Node>> = vec![Vec::new(); parents.len()];
        let mut roots: Vec<Node> = Vec::new();

        for (child, parent) in parents.iter().enumerate() {
            match parent {
                Some(parent) if *parent < parents.len() => {
                    children_table[*parent].push(Node(child));
                },
                Some(_) => return Err(TreeError::InvalidParent { node: child }),
                None => roots.push(Node(child)),
            }
        }

        let root = match roots[..] {
            [root] => root,
            _ => return Err(TreeError::RootCount { roots: roots.len() }),
        };

        let mut children: Vec<Option<(Node, Node)>> = Vec::with_capacity(parents.len());
        let mut external: Vec<Node> = Vec::new();
        let mut internal: Vec<Node> = Vec::new();

        for (node, node_children) in children_table.iter().enumerate() {
            match node_children[..] {
                [] => {
                    external.push(Node(node));
                    children.push(None);
                },
                [left, right] => {
                    internal.push(Node(node));
                    children.push(Some((left, right)));
                },
                _ => {
                    return Err(TreeError::NonBinaryNode {
                        node,
                        count: node_children.len(),
                    })
                },
            }
        }

        for (child, parent) in parents.iter().enumerate() {
            if let Some(parent) = parent {
                if heights[child] >= heights[*parent] {
                    return Err(TreeError::ChildAboveParent {
                        child,
                        parent: *parent,
                    });
                }
            }
        }

        // A parent table with one root and binary children can still hide a
        // cycle; everything must be reachable from the root.
        let mut reachable = vec![false; parents.len()];
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            reachable[node.index()] = true;
            if let Some((left, right)) = children[node.index()] {
                stack.push(left);
                stack.push(right);
            }
        }

        if let Some(node) = reachable.iter().position(|reached| !reached) {
            return Err(TreeError::Unreachable { node });
        }

        Ok(Self {
            parents: parents.iter().map(|parent| parent.map(Node)).collect(),
            children,
            heights,
            taxa: taxa
                .iter()
                .map(|taxon| taxon.map(str::to_owned))
                .collect(),
            root,
            external,
            internal,
        })
    }

    #[must_use]
    pub fn root(&self) -> Node {
        self.root
    }

    #[must_use]
    #[debug_requires(node.index() < self.node_count(), "node belongs to this tree")]
    pub fn parent(&self, node: Node) -> Option<Node> {
        self.parents[node.index()]
    }

    #[must_use]
    #[debug_requires(node.index() < self.node_count(), "node belongs to this tree")]
    pub fn children(&self, node: Node) -> Option<(Node, Node)> {
        self.children[node.index()]
    }

    #[must_use]
    #[debug_requires(node.index() < self.node_count(), "node belongs to this tree")]
    pub fn height(&self, node: Node) -> NonNegativeF64 {
        self.heights[node.index()]
    }

    #[must_use]
    #[debug_requires(node.index() < self.node_count(), "node belongs to this tree")]
    pub fn taxon(&self, node: Node) -> Option<&str> {
        self.taxa[node.index()].as_deref()
    }

    #[must_use]
    pub fn is_root(&self, node: Node) -> bool {
        node == self.root
    }

    #[must_use]
    #[debug_requires(node.index() < self.node_count(), "node belongs to this tree")]
    pub fn is_external(&self, node: Node) -> bool {
        self.children[node.index()].is_none()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.parents.len()
    }

    #[must_use]
    pub fn external_node_count(&self) -> usize {
        self.external.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        (0..self.node_count()).map(Node)
    }

    #[must_use]
    pub fn external_nodes(&self) -> &[Node] {
        &self.external
    }

    #[must_use]
    pub fn internal_nodes(&self) -> &[Node] {
        &self.internal
    }

    /// A lineage occupies the half-open interval from its own height up to
    /// its parent's height; the root lineage extends to any height above it.
    #[must_use]
    #[debug_requires(node.index() < self.node_count(), "node belongs to this tree")]
    pub fn lineage_existed_at_height(&self, node: Node, height: f64) -> bool {
        self.height(node).get() <= height
            && self
                .parent(node)
                .map_or(true, |parent| self.height(parent).get() > height)
    }

    #[must_use]
    pub fn lineages_at_height(&self, height: f64) -> Vec<Node> {
        self.nodes()
            .filter(|node| self.lineage_existed_at_height(*node, height))
            .collect()
    }

    #[must_use]
    pub fn lineage_count_at_height(&self, height: f64) -> usize {
        self.nodes()
            .filter(|node| self.lineage_existed_at_height(*node, height))
            .count()
    }

    #[must_use]
    #[debug_requires(
        a.index() < self.node_count() && b.index() < self.node_count(),
        "nodes belong to this tree"
    )]
    pub fn common_ancestor(&self, a: Node, b: Node) -> Node {
        let mut ancestors = vec![false; self.node_count()];

        let mut node = Some(a);
        while let Some(ancestor) = node {
            ancestors[ancestor.index()] = true;
            node = self.parent(ancestor);
        }

        let mut node = b;
        loop {
            if ancestors[node.index()] {
                return node;
            }

            // the root is an ancestor of every node, so the walk terminates
            node = self.parent(node).unwrap_or(self.root);
        }
    }

    /// The patristic distance between two nodes, i.e. the total branch
    /// length of the path connecting them through their common ancestor.
    #[must_use]
    pub fn distance(&self, a: Node, b: Node) -> NonNegativeF64 {
        let ancestor_height = self.height(self.common_ancestor(a, b)).get();

        NonNegativeF64::new(
            (ancestor_height - self.height(a).get()) + (ancestor_height - self.height(b).get()),
        )
        .unwrap_or_else(|_| NonNegativeF64::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::{LineageTree, Node, TreeError};

    // ((A:1,B:1):1,C:2) with the root at height 2
    fn three_taxon_tree() -> LineageTree {
        LineageTree::from_parents_with_taxa(
            &[Some(3), Some(3), Some(4), Some(4), None],
            &[0.0, 0.0, 0.0, 1.0, 2.0],
            &[Some("A"), Some("B"), Some("C"), None, None],
        )
        .unwrap()
    }

    #[test]
    fn structure_queries() {
        let tree = three_taxon_tree();

        assert_eq!(tree.root(), Node::from(4));
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.external_node_count(), 3);
        assert_eq!(tree.parent(Node::from(0)), Some(Node::from(3)));
        assert_eq!(
            tree.children(Node::from(4)),
            Some((Node::from(2), Node::from(3)))
        );
        assert!(tree.is_external(Node::from(2)));
        assert!(!tree.is_external(Node::from(3)));
        assert_eq!(tree.taxon(Node::from(1)), Some("B"));
        assert_eq!(tree.taxon(Node::from(3)), None);
    }

    #[test]
    fn lineage_queries() {
        let tree = three_taxon_tree();

        // strictly between the two divergences: (A,B)'s ancestor and C
        assert_eq!(tree.lineage_count_at_height(1.5), 2);
        // strictly below both divergences: all three leaves
        assert_eq!(tree.lineage_count_at_height(0.5), 3);
        // at the root height only the root lineage exists
        assert_eq!(tree.lineage_count_at_height(2.0), 1);
        // above the root the root lineage extends indefinitely
        assert_eq!(tree.lineages_at_height(7.5), vec![Node::from(4)]);

        assert!(tree.lineage_existed_at_height(Node::from(3), 1.0));
        assert!(!tree.lineage_existed_at_height(Node::from(3), 2.0));
        assert!(!tree.lineage_existed_at_height(Node::from(0), 1.0));
    }

    #[test]
    fn ancestors_and_distances() {
        let tree = three_taxon_tree();

        assert_eq!(
            tree.common_ancestor(Node::from(0), Node::from(1)),
            Node::from(3)
        );
        assert_eq!(
            tree.common_ancestor(Node::from(0), Node::from(2)),
            Node::from(4)
        );

        assert!((tree.distance(Node::from(0), Node::from(1)).get() - 2.0).abs() < 1e-12);
        assert!((tree.distance(Node::from(0), Node::from(2)).get() - 4.0).abs() < 1e-12);
        assert!((tree.distance(Node::from(4), Node::from(4)).get()).abs() < 1e-12);
    }

    #[test]
    fn rejects_malformed_trees() {
        assert!(matches!(
            LineageTree::from_parents(&[], &[]),
            Err(TreeError::Empty)
        ));

        assert!(matches!(
            LineageTree::from_parents(&[None, None], &[1.0, 1.0]),
            Err(TreeError::RootCount { roots: 2 })
        ));

        assert!(matches!(
            LineageTree::from_parents(
                &[Some(3), Some(3), Some(3), None],
                &[0.0, 0.0, 0.0, 1.0]
            ),
            Err(TreeError::NonBinaryNode { node: 3, count: 3 })
        ));

        assert!(matches!(
            LineageTree::from_parents(&[Some(2), Some(2), None], &[0.0, 1.5, 1.0]),
            Err(TreeError::ChildAboveParent { child: 1, parent: 2 })
        ));

        assert!(matches!(
            LineageTree::from_parents(&[Some(2), Some(2), None], &[0.0, f64::NAN, 1.0]),
            Err(TreeError::InvalidHeight { node: 1 })
        ));
    }
}
