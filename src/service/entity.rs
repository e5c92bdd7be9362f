use crate::core::{DbError, Result};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document};

/// Anything that identifies a stored record through its `_id`.
pub trait EntityRef {
    fn entity_id(&self) -> Option<Bson>;
}

impl EntityRef for Document {
    fn entity_id(&self) -> Option<Bson> {
        self.get("_id").filter(|id| !matches!(id, Bson::Null)).cloned()
    }
}

impl EntityRef for ObjectId {
    fn entity_id(&self) -> Option<Bson> {
        Some(Bson::ObjectId(*self))
    }
}

impl EntityRef for Bson {
    fn entity_id(&self) -> Option<Bson> {
        match self {
            Bson::Null | Bson::Undefined => None,
            Bson::Document(doc) => doc.entity_id(),
            other => Some(other.clone()),
        }
    }
}

impl<E: EntityRef + ?Sized> EntityRef for &E {
    fn entity_id(&self) -> Option<Bson> {
        (**self).entity_id()
    }
}

impl<E: EntityRef> EntityRef for Option<E> {
    fn entity_id(&self) -> Option<Bson> {
        self.as_ref().and_then(EntityRef::entity_id)
    }
}

/// Identifier arguments accepted by `find_by_id`, and the `_id` of the
/// records passed to `update` and `delete`.
///
/// Strings must be 24 hex digits; other BSON values pass through so that
/// collections keyed by custom `_id`s keep working.
pub trait IntoEntityId {
    fn into_entity_id(self) -> Result<Bson>;
}

fn missing_id() -> DbError {
    DbError::Validation("ID must be provided.".into())
}

fn parse_object_id(value: &str) -> Result<Bson> {
    if value.trim().is_empty() {
        return Err(missing_id());
    }
    ObjectId::parse_str(value)
        .map(Bson::ObjectId)
        .map_err(|_| DbError::InvalidId(value.to_string()))
}

impl IntoEntityId for ObjectId {
    fn into_entity_id(self) -> Result<Bson> {
        Ok(Bson::ObjectId(self))
    }
}

impl IntoEntityId for &str {
    fn into_entity_id(self) -> Result<Bson> {
        parse_object_id(self)
    }
}

impl IntoEntityId for String {
    fn into_entity_id(self) -> Result<Bson> {
        parse_object_id(&self)
    }
}

impl IntoEntityId for &String {
    fn into_entity_id(self) -> Result<Bson> {
        parse_object_id(self)
    }
}

impl IntoEntityId for Bson {
    fn into_entity_id(self) -> Result<Bson> {
        match self {
            Bson::Null | Bson::Undefined => Err(missing_id()),
            Bson::String(value) => parse_object_id(&value),
            other => Ok(other),
        }
    }
}

impl<I: IntoEntityId> IntoEntityId for Option<I> {
    fn into_entity_id(self) -> Result<Bson> {
        self.ok_or_else(missing_id)?.into_entity_id()
    }
}
