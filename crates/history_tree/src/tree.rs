use crate::node::{HistoryNode, NodeData, NodeId};

/// Arena-backed history tree with a movable cursor.
///
/// `add_node` is the only mutation path during normal operation: it appends
/// under the cursor and advances the cursor to the new node. Navigation
/// moves the cursor without deleting or reordering anything, and malformed
/// navigation requests are absorbed as no-ops so a stray key can never
/// corrupt or crash an interactive session.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTree {
    nodes: Vec<HistoryNode>,
    cursor: NodeId,
}

impl Default for HistoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryTree {
    /// Creates a tree containing only the root sentinel, cursor at the root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![HistoryNode::root()],
            cursor: NodeId::ROOT,
        }
    }

    /// Appends `data` as the next child of the cursor and advances the
    /// cursor to it. O(1).
    pub fn add_node(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        let depth = self.nodes[self.cursor.0].depth + 1;

        self.nodes.push(HistoryNode {
            data,
            parent: Some(self.cursor),
            children: Vec::new(),
            depth,
        });
        self.nodes[self.cursor.0].children.push(id);
        self.cursor = id;

        id
    }

    /// Returns the node behind `id`.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &HistoryNode {
        &self.nodes[id.0]
    }

    /// Returns the cursor handle.
    #[must_use]
    pub fn current_position(&self) -> NodeId {
        self.cursor
    }

    /// Moves the cursor to its parent. No-op at the root.
    pub fn move_up(&mut self) {
        if let Some(parent) = self.nodes[self.cursor.0].parent {
            self.cursor = parent;
        }
    }

    /// Moves the cursor to the cursor's `index`-th child. Out-of-range
    /// indices are ignored.
    pub fn move_to_child(&mut self, index: usize) {
        if let Some(child) = self.nodes[self.cursor.0].children.get(index) {
            self.cursor = *child;
        }
    }

    /// Jumps the cursor to an arbitrary node. Unknown handles are ignored.
    pub fn branch_from(&mut self, id: NodeId) {
        if id.0 < self.nodes.len() {
            self.cursor = id;
        }
    }

    /// Root-first ancestor chain of the cursor, root excluded.
    ///
    /// `max_nodes` keeps only the suffix nearest the cursor — the context
    /// window is always the most recent turns, never a subsample. O(depth).
    #[must_use]
    pub fn lineage(&self, max_nodes: Option<usize>) -> Vec<&HistoryNode> {
        let mut lineage = Vec::new();
        let mut current = Some(self.cursor);

        while let Some(id) = current {
            if max_nodes.is_some_and(|max| lineage.len() >= max) {
                break;
            }

            let node = &self.nodes[id.0];
            if node.data.is_root() {
                break;
            }

            lineage.push(node);
            current = node.parent;
        }

        lineage.reverse();
        lineage
    }

    /// Suffix of the full lineage starting at `index`; used for incremental
    /// replay ("what happened since last render").
    #[must_use]
    pub fn lineage_since(&self, index: usize) -> Vec<&HistoryNode> {
        let lineage = self.lineage(None);
        if index >= lineage.len() {
            return Vec::new();
        }

        lineage[index..].to_vec()
    }

    /// Total node count, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree holds only the root sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::HistoryTree;
    use crate::node::NodeData;

    fn user_code(code: &str) -> NodeData {
        NodeData::UserCode {
            code: code.to_string(),
            result: "ok\n".to_string(),
        }
    }

    #[test]
    fn add_node_advances_cursor_and_links_parent() {
        let mut tree = HistoryTree::new();

        let first = tree.add_node(user_code("a"));
        let second = tree.add_node(user_code("b"));

        assert_eq!(tree.current_position(), second);
        assert_eq!(tree.node(second).parent(), Some(first));
        assert_eq!(tree.node(first).children(), &[second]);
        assert_eq!(tree.node(first).depth(), 1);
        assert_eq!(tree.node(second).depth(), 2);
    }

    #[test]
    fn lineage_is_root_first_and_excludes_the_root() {
        let mut tree = HistoryTree::new();
        tree.add_node(user_code("a"));
        tree.add_node(user_code("b"));
        tree.add_node(user_code("c"));

        let lineage = tree.lineage(None);
        let codes: Vec<&str> = lineage
            .iter()
            .map(|node| match &node.data {
                NodeData::UserCode { code, .. } => code.as_str(),
                other => panic!("unexpected node in lineage: {other:?}"),
            })
            .collect();

        assert_eq!(codes, vec!["a", "b", "c"]);
    }

    #[test]
    fn capped_lineage_is_a_suffix_of_the_full_lineage() {
        let mut tree = HistoryTree::new();
        for label in ["a", "b", "c", "d", "e"] {
            tree.add_node(user_code(label));
        }

        let full = tree.lineage(None);
        for cap in 0..=full.len() + 2 {
            let capped = tree.lineage(Some(cap));
            let expected_len = cap.min(full.len());
            assert_eq!(capped.len(), expected_len);
            assert_eq!(&capped[..], &full[full.len() - expected_len..]);
        }
    }

    #[test]
    fn lineage_since_returns_the_requested_suffix() {
        let mut tree = HistoryTree::new();
        tree.add_node(user_code("a"));
        tree.add_node(user_code("b"));
        tree.add_node(user_code("c"));

        assert_eq!(tree.lineage_since(0).len(), 3);
        assert_eq!(tree.lineage_since(2).len(), 1);
        assert!(tree.lineage_since(3).is_empty());
        assert!(tree.lineage_since(99).is_empty());
    }

    #[test]
    fn navigation_rebases_additions_onto_the_cursor_branch() {
        let mut tree = HistoryTree::new();
        let first = tree.add_node(user_code("a"));
        tree.add_node(user_code("b"));

        tree.branch_from(first);
        tree.add_node(user_code("b2"));

        let lineage = tree.lineage(None);
        assert_eq!(lineage.len(), 2);
        assert!(matches!(
            &lineage[1].data,
            NodeData::UserCode { code, .. } if code == "b2"
        ));
        assert_eq!(tree.node(first).children().len(), 2);
    }

    #[test]
    fn malformed_navigation_is_absorbed_as_a_no_op() {
        let mut tree = HistoryTree::new();

        let origin = tree.current_position();
        tree.move_up();
        assert_eq!(tree.current_position(), origin);

        tree.move_to_child(0);
        assert_eq!(tree.current_position(), origin);
        assert!(tree.is_empty());

        let node = tree.add_node(NodeData::ModelMessage {
            prompt: "hi".to_string(),
            message: "hello".to_string(),
            raw: json!(null),
        });
        tree.move_to_child(7);
        assert_eq!(tree.current_position(), node);
    }

    #[test]
    fn empty_tree_lineage_is_empty() {
        let tree = HistoryTree::new();
        assert!(tree.lineage(None).is_empty());
        assert!(tree.lineage(Some(10)).is_empty());
    }
}
