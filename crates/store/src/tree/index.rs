use serde::{Deserialize, Serialize};

use crate::entry::NodeType;

use super::TreeError;

/// Current index snapshot schema version
pub const INDEX_VERSION: u32 = 1;

/// Payload of an index snapshot blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    #[serde(rename = "v")]
    pub version: u32,
    #[serde(rename = "r")]
    pub root: IndexNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexNode {
    #[serde(rename = "i")]
    pub id: String,
    #[serde(rename = "t")]
    pub kind: NodeType,
    /// Version blob names, oldest first
    #[serde(rename = "f", default)]
    pub files: Vec<String>,
    #[serde(rename = "c", default)]
    pub children: Vec<IndexNode>,
}

impl IndexSnapshot {
    pub fn new(root: IndexNode) -> Self {
        Self {
            version: INDEX_VERSION,
            root,
        }
    }

    pub fn encode(&self) -> Result<String, TreeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a snapshot, rejecting schema versions this build does not know
    pub fn decode(data: &str) -> Result<Self, TreeError> {
        let snapshot: Self = serde_json::from_str(data)?;
        if snapshot.version != INDEX_VERSION {
            return Err(TreeError::UnsupportedIndexVersion(snapshot.version));
        }
        if snapshot.root.kind != NodeType::Root {
            return Err(TreeError::Default(anyhow::anyhow!(
                "index root has type {:?}",
                snapshot.root.kind
            )));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_compact_keys() {
        let snapshot = IndexSnapshot::new(IndexNode {
            id: "Root".into(),
            kind: NodeType::Root,
            files: vec![],
            children: vec![IndexNode {
                id: "Ab3x".into(),
                kind: NodeType::Dir,
                files: vec!["1abc".into()],
                children: vec![],
            }],
        });
        let json = snapshot.encode().unwrap();
        assert_eq!(
            json,
            r#"{"v":1,"r":{"i":"Root","t":0,"f":[],"c":[{"i":"Ab3x","t":1,"f":["1abc"],"c":[]}]}}"#
        );
        assert_eq!(IndexSnapshot::decode(&json).unwrap(), snapshot);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let json = r#"{"v":2,"r":{"i":"Root","t":0}}"#;
        assert!(matches!(
            IndexSnapshot::decode(json),
            Err(TreeError::UnsupportedIndexVersion(2))
        ));
    }

    #[test]
    fn test_rejects_non_root() {
        let json = r#"{"v":1,"r":{"i":"Ab3x","t":1}}"#;
        assert!(IndexSnapshot::decode(json).is_err());
        assert!(IndexSnapshot::decode("not json").is_err());
    }
}
