use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    json,
    Value,
};

/// Operation kinds carried by catalog delta streams. A full export consists
/// solely of `ADD` envelopes.
pub const OP_ADD: &str = "ADD";
pub const OP_MOD: &str = "MOD";
pub const OP_DEL: &str = "DEL";

/// One record of an entity update stream: `{op, entity}`. The entity is
/// kept as raw JSON; the provider validates and enriches it when the
/// envelope is turned into a bulk operation. The op is kept as a string so
/// unknown operation types surface as a classified error at that point
/// rather than as a decode failure mid-stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    pub op: String,
    pub entity: Option<Value>,
}

/// Typed view of an envelope's operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOp {
    Add,
    Mod,
    Del,
}

impl UpdateEnvelope {
    pub fn add(entity: Value) -> Self {
        Self {
            op: OP_ADD.to_string(),
            entity: Some(entity),
        }
    }

    pub fn modify(entity: Value) -> Self {
        Self {
            op: OP_MOD.to_string(),
            entity: Some(entity),
        }
    }

    /// Deletions only need to carry the entity id.
    pub fn delete(entity_id: &str) -> Self {
        Self {
            op: OP_DEL.to_string(),
            entity: Some(json!({ "id": entity_id })),
        }
    }

    pub fn entity_op(&self) -> Option<EntityOp> {
        match self.op.as_str() {
            OP_ADD => Some(EntityOp::Add),
            OP_MOD => Some(EntityOp::Mod),
            OP_DEL => Some(EntityOp::Del),
            _ => None,
        }
    }
}
