//! Filter composition.

use mongodb::bson::{Bson, Document, doc};

/// Compose a scoping filter with a caller filter.
///
/// Every clause of `base` is kept as is, so a caller can only narrow the
/// scope. Caller keys that `base` does not mention are added at the top
/// level. A caller key that `base` already constrains differently is added
/// as an extra `$and` clause next to the base one, and caller `$and` lists
/// are appended to the base list.
pub fn merge_filters(base: &Document, overlay: &Document) -> Document {
    let mut merged = base.clone();
    let mut clauses = Vec::new();

    for (key, value) in overlay {
        match merged.get(key) {
            None => {
                merged.insert(key.clone(), value.clone());
            }
            Some(existing) if existing == value => {}
            Some(_) => match value {
                Bson::Array(items) if key == "$and" => clauses.extend(items.iter().cloned()),
                _ => {
                    let mut clause = Document::new();
                    clause.insert(key.clone(), value.clone());
                    clauses.push(Bson::Document(clause));
                }
            },
        }
    }

    if clauses.is_empty() {
        return merged;
    }

    let combined = match merged.remove("$and") {
        Some(Bson::Array(mut existing)) => {
            existing.extend(clauses);
            existing
        }
        Some(other) => {
            let mut all = vec![Bson::Document(doc! { "$and": other })];
            all.extend(clauses);
            all
        }
        None => clauses,
    };
    merged.insert("$and", combined);
    merged
}
