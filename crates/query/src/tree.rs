//! The algebraic query tree.
//!
//! Trees are canonicalized at construction time so that semantically
//! equivalent queries compare equal and render to byte-identical canonical
//! strings (the cache-key input). The constructors enforce:
//!
//! - no `Paren` around another `Paren` or around a `Tag` leaf;
//! - `And`/`Or` children that are parenthesized same-operator nodes are
//!   spliced into the parent;
//! - every binary node has at least two children (singletons collapse);
//! - `And`/`Or` children are sorted by the total order below; `Minus`
//!   keeps its first child (the minuend) in place and sorts only the tail.
//!
//! Total order: any non-`Tag` sorts before any `Tag`, and among non-`Tag`s
//! a `Paren` sorts before any binary node. `Tag`s compare by code-point
//! order of their value, `Paren`s recursively on their children, and
//! binary nodes by descending precedence level, then operator
//! (`And` < `Minus` < `Or`), then descending child count. The sort is
//! stable, so equal-comparing operands keep their original order.

use std::cmp::Ordering;

/// A node in the parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTree {
    /// A single tag literal.
    Tag { value: String },
    /// Intersection of all children.
    And { children: Vec<QueryTree> },
    /// Union of all children.
    Or { children: Vec<QueryTree> },
    /// Left-folded set difference; the first child is the minuend.
    Minus { children: Vec<QueryTree> },
    /// Grouping marker, kept only for canonical reconstruction.
    Paren { child: Box<QueryTree> },
}

impl QueryTree {
    /// A tag leaf. The value is expected to be pre-normalized.
    pub fn tag(value: impl Into<String>) -> Self {
        QueryTree::Tag { value: value.into() }
    }

    /// Wraps a node in parentheses. Redundant parens (around a leaf or
    /// around an existing group) are elided.
    pub fn paren(child: QueryTree) -> Self {
        match child {
            leaf @ (QueryTree::Tag { .. } | QueryTree::Paren { .. }) => leaf,
            inner => QueryTree::Paren { child: Box::new(inner) },
        }
    }

    /// Intersection node. Callers pass at least one child.
    pub fn and(children: Vec<QueryTree>) -> Self {
        let mut flat = Self::splice(children, |node| matches!(node, QueryTree::And { .. }));
        if flat.len() == 1 {
            return flat.remove(0);
        }
        flat.sort_by(Self::total_order);
        QueryTree::And { children: flat }
    }

    /// Union node. Callers pass at least one child.
    pub fn or(children: Vec<QueryTree>) -> Self {
        let mut flat = Self::splice(children, |node| matches!(node, QueryTree::Or { .. }));
        if flat.len() == 1 {
            return flat.remove(0);
        }
        flat.sort_by(Self::total_order);
        QueryTree::Or { children: flat }
    }

    /// Difference node: `minus(a, b, c) = (a \ b) \ c`. The minuend keeps
    /// its position; the subtrahends are sorted.
    pub fn minus(mut children: Vec<QueryTree>) -> Self {
        if children.len() == 1 {
            return children.remove(0);
        }
        children[1..].sort_by(Self::total_order);
        QueryTree::Minus { children }
    }

    /// Splices children that are parens around the parent's own operator.
    fn splice(children: Vec<QueryTree>, same_op: impl Fn(&QueryTree) -> bool) -> Vec<QueryTree> {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                QueryTree::Paren { child: inner } if same_op(&inner) => match *inner {
                    QueryTree::And { children } | QueryTree::Or { children } => {
                        flat.extend(children);
                    }
                    _ => unreachable!("same_op only matches And/Or"),
                },
                other => flat.push(other),
            }
        }
        flat
    }

    /// Precedence level of a binary node; `None` for leaves and groups.
    pub(crate) fn binary_level(&self) -> Option<u8> {
        match self {
            QueryTree::And { .. } => Some(2),
            QueryTree::Or { .. } | QueryTree::Minus { .. } => Some(1),
            _ => None,
        }
    }

    fn operator_rank(&self) -> u8 {
        match self {
            QueryTree::And { .. } => 0,
            QueryTree::Minus { .. } => 1,
            QueryTree::Or { .. } => 2,
            _ => u8::MAX,
        }
    }

    fn child_count(&self) -> usize {
        match self {
            QueryTree::And { children }
            | QueryTree::Or { children }
            | QueryTree::Minus { children } => children.len(),
            _ => 0,
        }
    }

    /// The total order used for operand sorting; see the module docs.
    fn total_order(a: &QueryTree, b: &QueryTree) -> Ordering {
        match (a, b) {
            (QueryTree::Tag { value: va }, QueryTree::Tag { value: vb }) => va.cmp(vb),
            (QueryTree::Tag { .. }, _) => Ordering::Greater,
            (_, QueryTree::Tag { .. }) => Ordering::Less,
            (QueryTree::Paren { child: ca }, QueryTree::Paren { child: cb }) => {
                Self::total_order(ca, cb)
            }
            (QueryTree::Paren { .. }, _) => Ordering::Less,
            (_, QueryTree::Paren { .. }) => Ordering::Greater,
            _ => (b.binary_level().cmp(&a.binary_level()))
                .then_with(|| a.operator_rank().cmp(&b.operator_rank()))
                .then_with(|| b.child_count().cmp(&a.child_count())),
        }
    }

    /// Renders the canonical string form of this subtree.
    ///
    /// Tags are quoted with internal quotes doubled. A binary child of
    /// strictly lower precedence than its parent is parenthesized; parens
    /// around leaves are elided.
    pub fn canonical(&self) -> String {
        match self {
            QueryTree::Tag { value } => format!("\"{}\"", value.replace('"', "\"\"")),
            QueryTree::Paren { child } => match child.as_ref() {
                QueryTree::Tag { .. } => child.canonical(),
                inner => format!("({})", inner.canonical()),
            },
            QueryTree::And { children } => Self::join(children, " ", 2),
            QueryTree::Or { children } => Self::join(children, "OR", 1),
            QueryTree::Minus { children } => Self::join(children, "-", 1),
        }
    }

    fn join(children: &[QueryTree], op: &str, parent_level: u8) -> String {
        children
            .iter()
            .map(|child| match child.binary_level() {
                Some(level) if level < parent_level => format!("({})", child.canonical()),
                _ => child.canonical(),
            })
            .collect::<Vec<_>>()
            .join(op)
    }
}
