// ============================================================================
// DefaultService - shared CRUD over one collection
// ============================================================================
//
// Every read is one aggregation pipeline:
//
//   pipeline_prefix -> $match(base_filter + filter) -> [$sort] -> [$skip -> $limit]
//
// Writes stamp audit timestamps from the service clock. Deletes are soft:
// only the deletion timestamp is written.
//
// ============================================================================

use super::clock::{Clock, SystemClock};
use super::config::{IndexSpec, ServiceConfig};
use super::entity::{EntityRef, IntoEntityId};
use super::paginate::Paginate;
use crate::core::{DbError, Result, merge_filters};
use futures::TryStreamExt;
use mongodb::bson::{self, Bson, Document, doc};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{ClientSession, Collection, Database};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Name of the field produced by the count stage
const COUNT_FIELD: &str = "docs";

/// Per-call options of `list`
#[derive(Clone, Default)]
pub struct ListOptions {
    /// Overrides the configured default sort when non-empty
    pub sort: Option<Document>,
    pub paginate: Option<Arc<dyn Paginate>>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn paginate(mut self, paginate: impl Paginate + 'static) -> Self {
        self.paginate = Some(Arc::new(paginate));
        self
    }
}

impl std::fmt::Debug for ListOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListOptions")
            .field("sort", &self.sort)
            .field(
                "paginate",
                &self.paginate.as_ref().map(|p| (p.skip(), p.limit())),
            )
            .finish()
    }
}

/// Outcome of the background index bootstrap for one database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    NotStarted,
    Pending,
    Ready(Vec<String>),
    Failed(String),
}

/// Index bootstrap bookkeeping, keyed by database name.
///
/// Every bootstrap run gets a fresh number and only the latest run of a
/// database may record its outcome.
#[derive(Debug, Default)]
struct IndexRuns {
    last_run: u64,
    states: HashMap<String, (u64, IndexState)>,
}

/// Generic data access over one collection.
///
/// Concrete services wrap a `DefaultService` built from their own
/// [`ServiceConfig`]. `T` is the record type; use [`Document`] for untyped
/// services.
pub struct DefaultService<T> {
    config: Arc<ServiceConfig>,
    clock: Arc<dyn Clock>,
    index_runs: Arc<Mutex<IndexRuns>>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for DefaultService<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            clock: Arc::clone(&self.clock),
            index_runs: Arc::clone(&self.index_runs),
            _record: PhantomData,
        }
    }
}

impl<T> DefaultService<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            index_runs: Arc::new(Mutex::new(IndexRuns::default())),
            _record: PhantomData,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn has_sorting(&self) -> bool {
        self.config.has_sorting()
    }

    pub fn has_index(&self) -> bool {
        self.config.has_index()
    }

    /// Database handle, then static configuration; nothing else is touched
    /// before both hold.
    fn preflight<'a>(
        &self,
        db: Option<&'a Database>,
        operation: &'static str,
    ) -> Result<(&'a Database, Collection<Document>)> {
        let db = db.ok_or(DbError::DatabaseRequired)?;
        self.config.validate()?;

        tracing::debug!(
            collection = %self.config.collection,
            database = db.name(),
            operation,
            "service operation"
        );
        Ok((db, db.collection(&self.config.collection)))
    }

    async fn aggregate(
        &self,
        collection: &Collection<Document>,
        pipeline: Vec<Document>,
        session: Option<&mut ClientSession>,
    ) -> Result<Vec<Document>> {
        let action = collection
            .aggregate(pipeline)
            .with_options(self.config.query_options.clone());

        let docs: Vec<Document> = match session {
            Some(session) => {
                let mut cursor = action.session(&mut *session).await?;
                cursor.stream(session).try_collect().await?
            }
            None => action.await?.try_collect().await?,
        };
        Ok(docs)
    }

    async fn find_one_and_set(
        &self,
        collection: &Collection<Document>,
        id: Bson,
        set: Document,
        returning: ReturnDocument,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<T>> {
        let action = collection
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .with_options(
                FindOneAndUpdateOptions::builder()
                    .return_document(returning)
                    .build(),
            );

        let found = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        found.map(Self::decode).transpose()
    }

    fn now(&self) -> Bson {
        Bson::DateTime(bson::DateTime::from_millis(
            self.clock.now().timestamp_millis(),
        ))
    }

    fn decode(doc: Document) -> Result<T> {
        Ok(bson::from_document(doc)?)
    }

    fn scoped_match(&self, filter: &Document) -> Document {
        doc! { "$match": merge_filters(&self.config.base_filter, filter) }
    }

    // ========================================================================
    // Pipelines
    // ========================================================================

    /// Pipeline issued by `list`.
    pub fn list_pipeline(&self, filter: &Document, options: &ListOptions) -> Result<Vec<Document>> {
        let mut pipeline = self.config.pipeline_prefix.clone();
        pipeline.push(self.scoped_match(filter));

        let sort = match &options.sort {
            Some(sort) if !sort.is_empty() => Some(sort),
            _ => self.config.default_sort.as_ref().filter(|sort| !sort.is_empty()),
        };
        if let Some(sort) = sort {
            pipeline.push(doc! { "$sort": sort.clone() });
        }

        if let Some(paginate) = &options.paginate {
            let limit = paginate.limit();
            if limit == 0 {
                return Err(DbError::Validation(
                    "Pagination limit must be greater than zero.".into(),
                ));
            }
            let skip = i64::try_from(paginate.skip())
                .map_err(|_| DbError::Validation("Pagination skip is too large.".into()))?;
            let limit = i64::try_from(limit)
                .map_err(|_| DbError::Validation("Pagination limit is too large.".into()))?;

            pipeline.push(doc! { "$skip": skip });
            pipeline.push(doc! { "$limit": limit });
        }

        Ok(pipeline)
    }

    /// Pipeline issued by `count`.
    pub fn count_pipeline(&self, filter: &Document) -> Vec<Document> {
        let mut pipeline = self.config.pipeline_prefix.clone();
        pipeline.push(self.scoped_match(filter));
        pipeline.push(doc! { "$count": COUNT_FIELD });
        pipeline
    }

    fn find_pipeline(&self, field: &str, value: Bson) -> Vec<Document> {
        let mut filter = Document::new();
        filter.insert(field, value);

        let mut pipeline = self.config.pipeline_prefix.clone();
        pipeline.push(self.scoped_match(&filter));
        pipeline.push(doc! { "$limit": 1 });
        pipeline
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn list<'a>(
        &self,
        db: impl Into<Option<&'a Database>>,
        filter: Document,
        options: ListOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<Vec<T>> {
        let (db, collection) = self.preflight(db.into(), "list")?;
        let pipeline = self.list_pipeline(&filter, &options)?;

        if self.has_index() {
            self.schedule_index_bootstrap(db).await;
        }

        self.aggregate(&collection, pipeline, session)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    /// Number of records matching the base filter and `filter`; 0 when none do.
    pub async fn count<'a>(
        &self,
        db: impl Into<Option<&'a Database>>,
        filter: Document,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let (_, collection) = self.preflight(db.into(), "count")?;
        let pipeline = self.count_pipeline(&filter);

        let result = self.aggregate(&collection, pipeline, session).await?;

        // No matching record means no output row at all
        let count = match result.first().and_then(|row| row.get(COUNT_FIELD)) {
            Some(Bson::Int32(n)) => i64::from(*n),
            Some(Bson::Int64(n)) => *n,
            Some(Bson::Double(n)) => *n as i64,
            _ => 0,
        };
        Ok(count.max(0) as u64)
    }

    pub async fn find_by<'a>(
        &self,
        db: impl Into<Option<&'a Database>>,
        field: &str,
        value: impl Into<Bson>,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<T>> {
        let (_, collection) = self.preflight(db.into(), "find_by")?;

        if field.is_empty() {
            return Err(DbError::Validation("Field must be provided.".into()));
        }
        let value = value.into();
        if matches!(value, Bson::Null | Bson::Undefined) {
            return Err(DbError::Validation("Value must be provided.".into()));
        }

        self.find_first(&collection, field, value, session).await
    }

    pub async fn find_by_id<'a>(
        &self,
        db: impl Into<Option<&'a Database>>,
        id: impl IntoEntityId,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<T>> {
        let (_, collection) = self.preflight(db.into(), "find_by_id")?;
        let id = id.into_entity_id()?;

        self.find_first(&collection, "_id", id, session).await
    }

    async fn find_first(
        &self,
        collection: &Collection<Document>,
        field: &str,
        value: Bson,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<T>> {
        let pipeline = self.find_pipeline(field, value);
        self.aggregate(collection, pipeline, session)
            .await?
            .into_iter()
            .next()
            .map(Self::decode)
            .transpose()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert `entity` and return it as stored.
    ///
    /// Fails with `InsertNotVisible` when the record cannot be read back,
    /// e.g. because it was removed between the write and the re-read.
    pub async fn insert<'a>(
        &self,
        db: impl Into<Option<&'a Database>>,
        entity: &T,
        mut session: Option<&mut ClientSession>,
    ) -> Result<T> {
        let (_, collection) = self.preflight(db.into(), "insert")?;

        let mut doc = bson::to_document(entity)?;
        if doc.is_empty() {
            return Err(DbError::Validation("Entity must be provided.".into()));
        }

        doc.remove(&self.config.updated_at_field);
        doc.remove(&self.config.deleted_at_field);
        doc.insert(self.config.created_at_field.clone(), self.now());

        let inserted = match session.as_deref_mut() {
            Some(session) => collection.insert_one(&doc).session(session).await?,
            None => collection.insert_one(&doc).await?,
        };
        let id = inserted.inserted_id;

        let filter = doc! { "_id": id.clone() };
        let stored = match session {
            Some(session) => collection.find_one(filter).session(session).await?,
            None => collection.find_one(filter).await?,
        };

        match stored {
            Some(stored) => Self::decode(stored),
            None => Err(DbError::InsertNotVisible(display_id(&id))),
        }
    }

    /// Apply `patch` to the referenced record and return its new state.
    ///
    /// Returns `None` when no record has the referenced `_id`.
    pub async fn update<'a>(
        &self,
        db: impl Into<Option<&'a Database>>,
        entity: &impl EntityRef,
        patch: Document,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<T>> {
        let (_, collection) = self.preflight(db.into(), "update")?;
        let id = Self::target_id(entity)?;

        if patch.is_empty() {
            return Err(DbError::Validation("Update data must be provided.".into()));
        }
        if let Some(key) = patch.keys().find(|key| key.starts_with('$')) {
            return Err(DbError::Validation(format!(
                "Update data must not contain operators, found '{}'.",
                key
            )));
        }
        if patch.contains_key("_id") {
            return Err(DbError::Validation("Update data must not change '_id'.".into()));
        }

        let mut set = patch;
        set.remove(&self.config.created_at_field);
        set.remove(&self.config.deleted_at_field);
        set.insert(self.config.updated_at_field.clone(), self.now());

        self.find_one_and_set(&collection, id, set, ReturnDocument::After, session)
            .await
    }

    /// Soft-delete the referenced record, returning its state before the write.
    pub async fn delete<'a>(
        &self,
        db: impl Into<Option<&'a Database>>,
        entity: &impl EntityRef,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<T>> {
        let (_, collection) = self.preflight(db.into(), "delete")?;
        let id = Self::target_id(entity)?;

        let mut set = Document::new();
        set.insert(self.config.deleted_at_field.clone(), self.now());

        self.find_one_and_set(&collection, id, set, ReturnDocument::Before, session)
            .await
    }

    /// `_id` of the record a write targets. String ids go through the same
    /// parsing as `find_by_id`.
    fn target_id(entity: &impl EntityRef) -> Result<Bson> {
        entity
            .entity_id()
            .ok_or_else(|| DbError::Validation("Entity must be provided.".into()))?
            .into_entity_id()
    }

    // ========================================================================
    // Index bootstrap
    // ========================================================================

    /// Create the configured indexes and wait for them.
    ///
    /// Idempotent; returns the index names (empty when none are configured).
    /// The recorded index state is this call's outcome even when a background
    /// bootstrap started earlier finishes later.
    pub async fn ensure_indexes<'a>(
        &self,
        db: impl Into<Option<&'a Database>>,
    ) -> Result<Vec<String>> {
        let (db, collection) = self.preflight(db.into(), "ensure_indexes")?;
        if !self.has_index() {
            return Ok(Vec::new());
        }

        let key = db.name().to_string();
        let run = self.begin_index_run(&key, true).await;
        let outcome = self.create_indexes(&collection).await;
        if let Some(run) = run {
            self.finish_index_run(&key, run, &outcome).await;
        }
        outcome
    }

    pub async fn index_state(&self, db: &Database) -> IndexState {
        self.index_state_of_key(db.name()).await
    }

    async fn index_state_of_key(&self, key: &str) -> IndexState {
        self.index_runs
            .lock()
            .await
            .states
            .get(key)
            .map(|(_, state)| state.clone())
            .unwrap_or(IndexState::NotStarted)
    }

    /// Mark `key` as pending under a new run number.
    ///
    /// Without `force`, nothing starts while a run is pending or after one
    /// succeeded.
    async fn begin_index_run(&self, key: &str, force: bool) -> Option<u64> {
        let mut runs = self.index_runs.lock().await;
        if !force
            && matches!(
                runs.states.get(key),
                Some((_, IndexState::Pending | IndexState::Ready(_)))
            )
        {
            return None;
        }

        runs.last_run += 1;
        let run = runs.last_run;
        runs.states
            .insert(key.to_string(), (run, IndexState::Pending));
        Some(run)
    }

    /// Record the outcome of `run` unless a newer run replaced it.
    async fn finish_index_run(&self, key: &str, run: u64, outcome: &Result<Vec<String>>) {
        let mut runs = self.index_runs.lock().await;
        match runs.states.get_mut(key) {
            Some(entry) if entry.0 == run => entry.1 = index_state_of(outcome),
            _ => tracing::debug!(
                collection = %self.config.collection,
                run,
                "discarding outcome of superseded index run"
            ),
        }
    }

    async fn create_indexes(&self, collection: &Collection<Document>) -> Result<Vec<String>> {
        let models = match &self.config.index {
            None => return Ok(Vec::new()),
            Some(IndexSpec::Single(model)) => {
                let created = collection
                    .create_index(model.clone())
                    .await
                    .map_err(|e| DbError::Index(e.to_string()))?;
                return Ok(vec![created.index_name]);
            }
            Some(IndexSpec::Many(models)) => models,
        };

        let requests = models
            .iter()
            .map(|model| async move { collection.create_index(model.clone()).await });
        let results = futures::future::join_all(requests).await;

        let mut names = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(created) => names.push(created.index_name),
                Err(e) => failures.push(e.to_string()),
            }
        }

        if failures.is_empty() {
            Ok(names)
        } else {
            Err(DbError::Index(failures.join("; ")))
        }
    }

    /// Start index creation in the background unless it already ran (or is
    /// running) for this database.
    async fn schedule_index_bootstrap(&self, db: &Database) {
        let key = db.name().to_string();
        let Some(run) = self.begin_index_run(&key, false).await else {
            return;
        };

        let service = self.clone();
        let collection = db.collection::<Document>(&self.config.collection);
        tokio::spawn(async move {
            let outcome = service.create_indexes(&collection).await;
            if let Err(e) = &outcome {
                tracing::warn!(
                    collection = %service.config.collection,
                    error = %e,
                    "background index creation failed"
                );
            }
            service.finish_index_run(&key, run, &outcome).await;
        });
    }
}

fn display_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}
fn index_state_of(outcome: &Result<Vec<String>>) -> IndexState {
    match outcome {
        Ok(names) => IndexState::Ready(names.clone()),
        Err(e) => IndexState::Failed(e.to_string()),
    }
}
