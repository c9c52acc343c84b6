use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Book,
    Volume,
    Chapter,
    Scene,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Volume => "volume",
            Self::Chapter => "chapter",
            Self::Scene => "scene",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "book" => Some(Self::Book),
            "volume" => Some(Self::Volume),
            "chapter" => Some(Self::Chapter),
            "scene" => Some(Self::Scene),
            _ => None,
        }
    }
}

/// Status is a label, not a guarded state machine: any transition is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Draft,
    Writing,
    Review,
    Finished,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Writing => "writing",
            Self::Review => "review",
            Self::Finished => "finished",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "writing" => Some(Self::Writing),
            "review" => Some(Self::Review),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
}

/// One row of the outline. `order` is a dense zero-based rank within the
/// sibling group (same project, same parent); gaps are tolerated on read and
/// closed by the next write-affecting operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub id: String,
    pub project_id: String,
    pub parent_id: Option<String>,
    pub kind: NodeKind,
    pub title: String,
    pub order: i64,
    pub status: NodeStatus,
    pub word_count_goal: i64,
    pub metadata: NodeMetadata,
    pub created_at: String,
    pub updated_at: String,
}

/// Materialized view of a node with its subtree attached. `level` is the
/// hierarchical distance from a root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: OutlineNode,
    pub level: usize,
    pub children: Vec<TreeNode>,
}

#[cfg(test)]
mod tests {
    use super::{NodeKind, NodeMetadata, NodeStatus};

    #[test]
    fn kind_round_trips_through_text() {
        for kind in [
            NodeKind::Book,
            NodeKind::Volume,
            NodeKind::Chapter,
            NodeKind::Scene,
        ] {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::parse("part"), None);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            NodeStatus::Draft,
            NodeStatus::Writing,
            NodeStatus::Review,
            NodeStatus::Finished,
        ] {
            assert_eq!(NodeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(NodeStatus::parse("done"), None);
    }

    #[test]
    fn empty_metadata_serializes_to_empty_object() {
        let json = serde_json::to_string(&NodeMetadata::default()).expect("serialize");
        assert_eq!(json, "{}");
    }

    #[test]
    fn metadata_tolerates_missing_fields() {
        let parsed: NodeMetadata =
            serde_json::from_str(r#"{"summary":"opening move"}"#).expect("parse");
        assert_eq!(parsed.summary.as_deref(), Some("opening move"));
        assert!(parsed.tags.is_empty());
    }
}
