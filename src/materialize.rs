//! Materializer collaborator.
//!
//! The engine's contract ends at exclusive attribution of raw output to
//! the right logical request; turning payloads into domain objects is this
//! pluggable step. [`FieldMapMaterializer`] is the default: it maps wire
//! properties onto entity fields through the registration-time descriptor
//! table, with no reflection.

use crate::error::Result;
use crate::model::batch::BatchResult;
use crate::model::entity::{Entity, EntityHandle, NEXT_PAGE_LINK};
use crate::model::request::BatchRequest;
use serde_json::{Map, Value};

pub trait Materializer: Send + Sync {
    fn materialize(&self, request: &BatchRequest, result: &BatchResult) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct FieldMapMaterializer;

impl FieldMapMaterializer {
    pub fn new() -> Self {
        Self
    }

    fn apply_fields(entity: &mut Entity, object: &Map<String, Value>) {
        let descriptor = entity.descriptor().clone();
        for (wire_name, value) in object {
            if let Some(field) = descriptor.field_for_wire(wire_name) {
                entity.set_field(field.name.clone(), value.clone());
            }
        }
    }

    fn next_link(object: &Map<String, Value>) -> Option<&str> {
        for key in ["@odata.nextLink", "odata.nextLink", "__next"] {
            if let Some(link) = object.get(key).and_then(Value::as_str) {
                return Some(link);
            }
        }
        None
    }

    /// Collection payloads land in the entity's child collection; the
    /// descriptor then describes the item type.
    fn load_collection(
        entity: &EntityHandle,
        items: &[Value],
        skip_collection_clear: bool,
    ) {
        let (children, descriptor) = {
            let mut owner = entity.write();
            (owner.ensure_children(), owner.descriptor().clone())
        };
        if !skip_collection_clear {
            children.clear();
        }
        for item in items {
            if let Value::Object(object) = item {
                let mut child = Entity::new(descriptor.clone());
                Self::apply_fields(&mut child, object);
                children.attach(&EntityHandle::new(child));
            }
        }
    }
}

impl Materializer for FieldMapMaterializer {
    fn materialize(&self, request: &BatchRequest, result: &BatchResult) -> Result<()> {
        if !result.is_success() || result.payload.is_empty() {
            return Ok(());
        }
        if request.descriptor().flags.binary {
            return Ok(());
        }
        let Some(entity) = request.entity() else {
            return Ok(());
        };
        let Ok(json) = serde_json::from_slice::<Value>(&result.payload) else {
            // Non-JSON payloads stay raw on the result.
            return Ok(());
        };

        // Verbose OData wraps everything under `d`.
        let json = json.get("d").cloned().unwrap_or(json);
        let Value::Object(object) = json else {
            return Ok(());
        };

        if let Some(link) = Self::next_link(&object) {
            entity.write().set_metadata(NEXT_PAGE_LINK, link);
        }

        let items = object
            .get("value")
            .or_else(|| object.get("results"))
            .and_then(Value::as_array);
        match items {
            Some(items) => Self::load_collection(
                entity,
                items,
                request.descriptor().flags.skip_collection_clear,
            ),
            None => Self::apply_fields(&mut entity.write(), &object),
        }
        Ok(())
    }
}
