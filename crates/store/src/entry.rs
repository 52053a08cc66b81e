//! Entry: the parameter/result envelope passed between the tree and the
//! orchestrator.
//!
//! An [`Entry`] carries plaintext and/or encrypted node data. It has a fixed
//! set of fields ([`EntryField`]); anything else handed to [`Entry::set`] is
//! ignored. Entries never own disk resources.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::Timestamp;

/// The kind of a node, also the first character of its blobs' names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NodeType {
    Root,
    Dir,
    File,
    Text,
    Binary,
}

impl NodeType {
    pub fn digit(&self) -> char {
        match self {
            NodeType::Root => '0',
            NodeType::Dir => '1',
            NodeType::File => '2',
            NodeType::Text => '3',
            NodeType::Binary => '4',
        }
    }

    pub fn from_digit(c: char) -> Option<Self> {
        c.to_digit(10)
            .and_then(|d| NodeType::try_from(d as u8).ok())
    }

    /// Roots and directories hold children; everything else holds content
    pub fn is_container(&self) -> bool {
        matches!(self, NodeType::Root | NodeType::Dir)
    }

    pub fn is_file(&self) -> bool {
        !self.is_container()
    }
}

impl From<NodeType> for u8 {
    fn from(kind: NodeType) -> Self {
        match kind {
            NodeType::Root => 0,
            NodeType::Dir => 1,
            NodeType::File => 2,
            NodeType::Text => 3,
            NodeType::Binary => 4,
        }
    }
}

impl TryFrom<u8> for NodeType {
    type Error = EntryError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeType::Root),
            1 => Ok(NodeType::Dir),
            2 => Ok(NodeType::File),
            3 => Ok(NodeType::Text),
            4 => Ok(NodeType::Binary),
            other => Err(EntryError::UnknownType(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("unknown node type: {0}")]
    UnknownType(u8),
    #[error("invalid value for entry field '{0}': {1}")]
    InvalidValue(&'static str, serde_json::Error),
}

/// The whitelisted entry fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryField {
    Type,
    Id,
    Parent,
    Ts,
    ScrambledTs,
    Name,
    Content,
    EncryptedName,
    EncryptedContent,
    ExtraName,
    PreserveContent,
}

impl EntryField {
    pub const ALL: [EntryField; 11] = [
        EntryField::Type,
        EntryField::Id,
        EntryField::Parent,
        EntryField::Ts,
        EntryField::ScrambledTs,
        EntryField::Name,
        EntryField::Content,
        EntryField::EncryptedName,
        EntryField::EncryptedContent,
        EntryField::ExtraName,
        EntryField::PreserveContent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryField::Type => "type",
            EntryField::Id => "id",
            EntryField::Parent => "parent",
            EntryField::Ts => "ts",
            EntryField::ScrambledTs => "scrambledTs",
            EntryField::Name => "name",
            EntryField::Content => "content",
            EntryField::EncryptedName => "encryptedName",
            EntryField::EncryptedContent => "encryptedContent",
            EntryField::ExtraName => "extraName",
            EntryField::PreserveContent => "preserveContent",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<NodeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ts: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scrambled_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encrypted_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encrypted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preserve_content: Option<bool>,
}

impl Entry {
    pub fn new(kind: NodeType) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /* Loose map contract */

    /// The currently set fields, restricted to `fields` when given
    pub fn get(&self, fields: Option<&[EntryField]>) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if let Some(fields) = fields {
            map.retain(|key, _| fields.iter().any(|field| field.as_str() == key));
        }
        map
    }

    /// Merge whitelisted, non-null values; unknown keys are ignored
    pub fn set(&mut self, values: &Map<String, Value>) -> Result<(), EntryError> {
        for (key, value) in values {
            let Some(field) = EntryField::parse(key) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            self.set_value(field, value.clone())?;
        }
        Ok(())
    }

    /// Clear the given fields
    pub fn unset(&mut self, fields: &[EntryField]) {
        for field in fields {
            match field {
                EntryField::Type => self.kind = None,
                EntryField::Id => self.id = None,
                EntryField::Parent => self.parent = None,
                EntryField::Ts => self.ts = None,
                EntryField::ScrambledTs => self.scrambled_ts = None,
                EntryField::Name => self.name = None,
                EntryField::Content => self.content = None,
                EntryField::EncryptedName => self.encrypted_name = None,
                EntryField::EncryptedContent => self.encrypted_content = None,
                EntryField::ExtraName => self.extra_name = None,
                EntryField::PreserveContent => self.preserve_content = None,
            }
        }
    }

    fn set_value(&mut self, field: EntryField, value: Value) -> Result<(), EntryError> {
        fn parse<T: serde::de::DeserializeOwned>(
            field: EntryField,
            value: Value,
        ) -> Result<T, EntryError> {
            serde_json::from_value(value).map_err(|e| EntryError::InvalidValue(field.as_str(), e))
        }

        match field {
            EntryField::Type => self.kind = Some(parse(field, value)?),
            EntryField::Id => self.id = Some(parse(field, value)?),
            EntryField::Parent => self.parent = Some(parse(field, value)?),
            EntryField::Ts => self.ts = Some(parse(field, value)?),
            EntryField::ScrambledTs => self.scrambled_ts = Some(parse(field, value)?),
            EntryField::Name => self.name = Some(parse(field, value)?),
            EntryField::Content => self.content = Some(parse(field, value)?),
            EntryField::EncryptedName => self.encrypted_name = Some(parse(field, value)?),
            EntryField::EncryptedContent => self.encrypted_content = Some(parse(field, value)?),
            EntryField::ExtraName => self.extra_name = Some(parse(field, value)?),
            EntryField::PreserveContent => self.preserve_content = Some(parse(field, value)?),
        }
        Ok(())
    }

    /* Getters */

    pub fn kind(&self) -> Option<NodeType> {
        self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn ts(&self) -> Option<Timestamp> {
        self.ts
    }

    pub fn scrambled_ts(&self) -> Option<&str> {
        self.scrambled_ts.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn encrypted_name(&self) -> Option<&str> {
        self.encrypted_name.as_deref()
    }

    pub fn encrypted_content(&self) -> Option<&str> {
        self.encrypted_content.as_deref()
    }

    pub fn extra_name(&self) -> Option<&str> {
        self.extra_name.as_deref()
    }

    pub fn preserve_content(&self) -> bool {
        self.preserve_content.unwrap_or(false)
    }

    /* Setters */

    pub fn set_kind(&mut self, kind: NodeType) {
        self.kind = Some(kind);
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn set_parent(&mut self, parent: Option<String>) {
        self.parent = parent;
    }

    pub fn set_ts(&mut self, ts: Timestamp) {
        self.ts = Some(ts);
    }

    pub fn set_scrambled_ts(&mut self, scrambled: impl Into<String>) {
        self.scrambled_ts = Some(scrambled.into());
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn set_content(&mut self, content: Option<String>) {
        self.content = content;
    }

    pub fn set_encrypted_name(&mut self, encrypted: impl Into<String>) {
        self.encrypted_name = Some(encrypted.into());
    }

    pub fn set_encrypted_content(&mut self, encrypted: Option<String>) {
        self.encrypted_content = encrypted;
    }

    pub fn set_extra_name(&mut self, extra: Option<String>) {
        self.extra_name = extra;
    }

    pub fn set_preserve_content(&mut self, preserve: bool) {
        self.preserve_content = Some(preserve);
    }
}
