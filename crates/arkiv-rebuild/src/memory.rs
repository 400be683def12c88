use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map, Value};

use arkiv_types::{Error, Result};

use crate::traits::{
    ConditionalUpsert, DerivedGuard, DocCollection, DocumentStore, LifecycleStore,
    GRAPH_UPDATED_AT,
};

/// Document store over in-process maps, honoring the same guard semantics
/// a real database would enforce with filtered bulk writes.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<DocCollection, HashMap<String, Value>>>,
}

impl InMemoryDocumentStore {
    /// Snapshot of one document, for assertions.
    pub fn document(&self, collection: DocCollection, id: &str) -> Option<Value> {
        let collections = self.collections.lock().expect("document store poisoned");
        collections.get(&collection).and_then(|docs| docs.get(id)).cloned()
    }

    pub fn len(&self, collection: DocCollection) -> usize {
        let collections = self.collections.lock().expect("document store poisoned");
        collections.get(&collection).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, collection: DocCollection) -> bool {
        self.len(collection) == 0
    }

    fn guard_holds(stored: Option<&Value>, guard: &DerivedGuard) -> bool {
        let marker = stored.and_then(|doc| doc.get(GRAPH_UPDATED_AT)).filter(|v| !v.is_null());
        match guard {
            DerivedGuard::Absent => marker.is_none(),
            DerivedGuard::Equals(expected) => marker == Some(expected),
        }
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn find_projected(
        &self,
        collection: DocCollection,
        ids: &[String],
        fields: &[&str],
    ) -> Result<HashMap<String, Value>> {
        let collections = self.collections.lock().expect("document store poisoned");
        let docs = match collections.get(&collection) {
            Some(docs) => docs,
            None => return Ok(HashMap::new()),
        };
        let mut found = HashMap::new();
        for id in ids {
            if let Some(doc) = docs.get(id) {
                let mut projected = Map::new();
                for field in fields {
                    if let Some(value) = doc.get(*field) {
                        projected.insert((*field).to_string(), value.clone());
                    }
                }
                found.insert(id.clone(), Value::Object(projected));
            }
        }
        Ok(found)
    }

    fn bulk_upsert(
        &self,
        collection: DocCollection,
        upserts: Vec<ConditionalUpsert>,
    ) -> Result<()> {
        let mut collections = self.collections.lock().expect("document store poisoned");
        let docs = collections.entry(collection).or_default();

        // All-or-nothing: check every guard before the first write, the way
        // a failed filtered bulk write leaves the batch to be retried.
        for upsert in &upserts {
            if !Self::guard_holds(docs.get(&upsert.id), &upsert.guard) {
                return Err(Error::conflict(format!(
                    "document {:?} was modified concurrently",
                    upsert.id
                )));
            }
        }
        for upsert in upserts {
            docs.insert(upsert.id, upsert.document);
        }
        Ok(())
    }

    fn bulk_set_fields(&self, collection: DocCollection, patches: Vec<Value>) -> Result<()> {
        let mut collections = self.collections.lock().expect("document store poisoned");
        let docs = collections.entry(collection).or_default();
        for patch in patches {
            let fields = match patch.as_object() {
                Some(fields) => fields,
                None => {
                    return Err(Error::illegal_argument("graph patch is not an object"));
                }
            };
            let id = fields
                .get("_id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::illegal_argument("graph patch has no _id"))?
                .to_string();
            let doc = docs
                .entry(id.clone())
                .or_insert_with(|| Value::Object(Map::from_iter([("_id".to_string(), Value::String(id))])));
            if let Some(target) = doc.as_object_mut() {
                for (field, value) in fields {
                    target.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    fn delete_documents(&self, collection: DocCollection, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.lock().expect("document store poisoned");
        if let Some(docs) = collections.get_mut(&collection) {
            for id in ids {
                docs.remove(id);
            }
        }
        Ok(())
    }
}

/// Lifecycle trail over in-process vectors.
#[derive(Default)]
pub struct InMemoryLifecycleStore {
    collections: Mutex<HashMap<DocCollection, Vec<Value>>>,
}

impl InMemoryLifecycleStore {
    /// Every appended snapshot for a collection, in append order.
    pub fn appended(&self, collection: DocCollection) -> Vec<Value> {
        let collections = self.collections.lock().expect("lifecycle store poisoned");
        collections.get(&collection).cloned().unwrap_or_default()
    }
}

impl LifecycleStore for InMemoryLifecycleStore {
    fn bulk_raw_append(&self, collection: DocCollection, lifecycles: Vec<Value>) -> Result<()> {
        let mut collections = self.collections.lock().expect("lifecycle store poisoned");
        collections.entry(collection).or_default().extend(lifecycles);
        Ok(())
    }

    fn bulk_delete(&self, collection: DocCollection, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.lock().expect("lifecycle store poisoned");
        if let Some(lifecycles) = collections.get_mut(&collection) {
            lifecycles.retain(|lc| {
                lc.get("_id")
                    .and_then(Value::as_str)
                    .map_or(true, |id| !ids.iter().any(|d| d == id))
            });
        }
        Ok(())
    }
}
