use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arena handle for one history node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Index of the root sentinel in every tree.
    pub(crate) const ROOT: NodeId = NodeId(0);
}

/// Payload of one conversation/execution turn.
///
/// `raw` fields carry the backend's native response verbatim. The console
/// core never interprets them; each backend renders its own payloads back
/// into turns when building requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeData {
    /// Sentinel ancestor of every tree. Never shown to the model.
    Root,
    /// Human-submitted snippet and its captured output.
    UserCode { code: String, result: String },
    /// Model-proposed, human-approved (possibly edited) snippet and its output.
    ModelCode {
        prompt: String,
        message: Option<String>,
        code: String,
        result: String,
        raw: Value,
    },
    /// Non-code model reply.
    ModelMessage {
        prompt: String,
        message: String,
        raw: Value,
    },
    /// Backend-reported failure surfaced as conversation content.
    ModelError {
        prompt: String,
        error: String,
        raw: Value,
    },
}

impl NodeData {
    /// Returns true for the root sentinel.
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }
}

/// One attached turn: payload plus tree position.
///
/// Once attached, `parent` and `depth` never change; `children` grows only
/// when this node is the cursor at attach time.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryNode {
    pub data: NodeData,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) depth: usize,
}

impl HistoryNode {
    pub(crate) fn root() -> Self {
        Self {
            data: NodeData::Root,
            parent: None,
            children: Vec::new(),
            depth: 0,
        }
    }

    /// Parent handle, `None` only for the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child handles in creation order.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Path length from the root (root is 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::NodeData;

    #[test]
    fn root_is_the_only_root_variant() {
        assert!(NodeData::Root.is_root());
        assert!(!NodeData::UserCode {
            code: "x = 1".to_string(),
            result: String::new(),
        }
        .is_root());
    }

    #[test]
    fn node_data_round_trips_through_tagged_json() {
        let data = NodeData::ModelCode {
            prompt: "list files".to_string(),
            message: Some("This lists the files".to_string()),
            code: "print(1)".to_string(),
            result: "1\n".to_string(),
            raw: json!({"id": "resp-1"}),
        };

        let encoded = serde_json::to_value(&data).expect("node data should serialize");
        assert_eq!(encoded["kind"], "model_code");

        let decoded: NodeData =
            serde_json::from_value(encoded).expect("node data should deserialize");
        assert_eq!(decoded, data);
    }
}
