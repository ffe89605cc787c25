use crate::{
    ConversationId, StoreError, StoreResult, UserIdentity, CHATS_COLLECTION,
    USERS_COLLECTION, USER_CHATS_COLLECTION,
};
use serde_json::{Map, Value};
use std::fmt;

/// Two-segment address of a document: collection name and document id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentPath {
    collection: String,
    id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> StoreResult<Self> {
        let collection = collection.into();
        let id = id.into();
        for segment in [&collection, &id] {
            if segment.is_empty() || segment.contains('/') {
                return Err(StoreError::InvalidPath(format!("{}/{}", collection, id)));
            }
        }
        Ok(Self { collection, id })
    }

    /// Parses `"collection/id"`.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let (collection, id) = raw
            .split_once('/')
            .ok_or_else(|| StoreError::InvalidPath(raw.to_string()))?;
        Self::new(collection, id)
    }

    pub fn chat(conversation_id: &ConversationId) -> StoreResult<Self> {
        Self::new(CHATS_COLLECTION, conversation_id.as_str())
    }

    pub fn user_chats(user_id: &UserIdentity) -> StoreResult<Self> {
        Self::new(USER_CHATS_COLLECTION, user_id.as_str())
    }

    pub fn user(user_id: &UserIdentity) -> StoreResult<Self> {
        Self::new(USERS_COLLECTION, user_id.as_str())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// State of a document at one version. `data` is `None` while the document does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    pub data: Option<Value>,
    pub version: u64,
}

impl DocumentSnapshot {
    pub fn missing(path: DocumentPath) -> Self {
        Self {
            path,
            data: None,
            version: 0,
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Appends each value not already present in the array at this field.
    ArrayUnion(Vec<Value>),
}

/// Field writes keyed by dotted field path, applied in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldUpdates {
    fields: Vec<(String, FieldValue)>,
}

impl FieldUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field_path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields
            .push((field_path.into(), FieldValue::Value(value.into())));
        self
    }

    pub fn array_union(mut self, field_path: impl Into<String>, values: Vec<Value>) -> Self {
        self.fields
            .push((field_path.into(), FieldValue::ArrayUnion(values)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldValue)> {
        self.fields.iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        path: DocumentPath,
        data: Value,
        merge: bool,
    },
    Update {
        path: DocumentPath,
        fields: FieldUpdates,
        /// Start from an empty document instead of failing when it does not exist.
        create_missing: bool,
    },
}

impl WriteOp {
    pub fn path(&self) -> &DocumentPath {
        match self {
            WriteOp::Set { path, .. } | WriteOp::Update { path, .. } => path,
        }
    }

    /// Computes the new document body from the current one.
    pub fn apply(&self, current: Option<&Value>) -> StoreResult<Value> {
        match self {
            WriteOp::Set { path, data, merge } => {
                if !data.is_object() {
                    return Err(StoreError::Malformed(format!(
                        "{}: document body must be an object",
                        path
                    )));
                }
                match (merge, current) {
                    (true, Some(existing)) => {
                        let mut merged = existing.clone();
                        deep_merge(&mut merged, data);
                        Ok(merged)
                    }
                    _ => Ok(data.clone()),
                }
            }
            WriteOp::Update {
                path,
                fields,
                create_missing,
            } => {
                let mut doc = match current {
                    Some(existing) => existing.clone(),
                    None if *create_missing => Value::Object(Map::new()),
                    None => return Err(StoreError::NotFound(path.to_string())),
                };
                for (field_path, value) in fields.iter() {
                    apply_field(&mut doc, field_path, value)?;
                }
                Ok(doc)
            }
        }
    }
}

/// Writes committed together: either every op is applied or none is.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: DocumentPath, data: Value, merge: bool) -> Self {
        self.ops.push(WriteOp::Set { path, data, merge });
        self
    }

    pub fn update(mut self, path: DocumentPath, fields: FieldUpdates) -> Self {
        self.ops.push(WriteOp::Update {
            path,
            fields,
            create_missing: false,
        });
        self
    }

    pub fn upsert(mut self, path: DocumentPath, fields: FieldUpdates) -> Self {
        self.ops.push(WriteOp::Update {
            path,
            fields,
            create_missing: true,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = target.get_mut(key) {
                        deep_merge(existing, value);
                    }
                } else {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn apply_field(doc: &mut Value, field_path: &str, value: &FieldValue) -> StoreResult<()> {
    let segments: Vec<&str> = field_path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::Malformed(format!(
            "invalid field path {:?}",
            field_path
        )));
    }

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| StoreError::Malformed("empty field path".to_string()))?;

    let mut cursor = doc;
    for segment in parents {
        cursor = object_mut(cursor)?
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let target = object_mut(cursor)?;
    match value {
        FieldValue::Value(v) => {
            target.insert(last.to_string(), v.clone());
        }
        FieldValue::ArrayUnion(values) => {
            let slot = target
                .entry(last.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                for v in values {
                    if !items.contains(v) {
                        items.push(v.clone());
                    }
                }
            }
        }
    }
    Ok(())
}

/// Returns the value as an object, replacing it with an empty one if it is not.
fn object_mut(value: &mut Value) -> StoreResult<&mut Map<String, Value>> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    value
        .as_object_mut()
        .ok_or_else(|| StoreError::Malformed("expected an object".to_string()))
}
