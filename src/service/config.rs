use crate::core::{DbError, Result};
use mongodb::IndexModel;
use mongodb::bson::Document;
use mongodb::options::{AggregateOptions, Collation, CollationStrength};

/// Index bootstrap request: one index, or several created concurrently.
#[derive(Debug, Clone)]
pub enum IndexSpec {
    Single(IndexModel),
    Many(Vec<IndexModel>),
}

impl IndexSpec {
    pub fn models(&self) -> &[IndexModel] {
        match self {
            IndexSpec::Single(model) => std::slice::from_ref(model),
            IndexSpec::Many(models) => models,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            IndexSpec::Single(model) => model.keys.is_empty(),
            IndexSpec::Many(models) => models.is_empty(),
        }
    }
}

impl From<IndexModel> for IndexSpec {
    fn from(model: IndexModel) -> Self {
        IndexSpec::Single(model)
    }
}

impl From<Document> for IndexSpec {
    fn from(keys: Document) -> Self {
        IndexSpec::Single(IndexModel::builder().keys(keys).build())
    }
}

impl From<Vec<IndexModel>> for IndexSpec {
    fn from(models: Vec<IndexModel>) -> Self {
        IndexSpec::Many(models)
    }
}

impl From<Vec<Document>> for IndexSpec {
    fn from(keys: Vec<Document>) -> Self {
        IndexSpec::Many(keys
                .into_iter()
                .map(|keys| IndexModel::builder().keys(keys).build())
                .collect())
    }
}

/// Static configuration of one collection-backed service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub collection: String,
    pub created_at_field: String,
    pub updated_at_field: String,
    pub deleted_at_field: String,
    /// Always merged into every read filter
    pub base_filter: Document,
    pub default_sort: Option<Document>,
    pub index: Option<IndexSpec>,
    /// Stages placed before the match stage of every read
    pub pipeline_prefix: Vec<Document>,
    pub query_options: AggregateOptions,
}

/// Case and accent insensitive matching and sorting
pub fn default_query_options() -> AggregateOptions {
    AggregateOptions::builder()
        .collation(
            Collation::builder()
                .locale("pt".to_string())
                .strength(CollationStrength::Primary)
                .build(),
        )
        .build()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            collection: String::new(),
            created_at_field: "created_at".to_string(),
            updated_at_field: "updated_at".to_string(),
            deleted_at_field: "deleted_at".to_string(),
            base_filter: Document::new(),
            default_sort: None,
            index: None,
            pipeline_prefix: Vec::new(),
            query_options: default_query_options(),
        }
    }
}

impl ServiceConfig {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            ..Self::default()
        }
    }

    pub fn created_at_field(mut self, field: &str) -> Self {
        self.created_at_field = field.to_string();
        self
    }

    pub fn updated_at_field(mut self, field: &str) -> Self {
        self.updated_at_field = field.to_string();
        self
    }

    pub fn deleted_at_field(mut self, field: &str) -> Self {
        self.deleted_at_field = field.to_string();
        self
    }

    pub fn base_filter(mut self, filter: Document) -> Self {
        self.base_filter = filter;
        self
    }

    pub fn default_sort(mut self, sort: Document) -> Self {
        self.default_sort = Some(sort);
        self
    }

    pub fn index(mut self, index: impl Into<IndexSpec>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn pipeline_prefix(mut self, stages: Vec<Document>) -> Self {
        self.pipeline_prefix = stages;
        self
    }

    pub fn query_options(mut self, options: AggregateOptions) -> Self {
        self.query_options = options;
        self
    }

    pub fn has_sorting(&self) -> bool {
        self.default_sort.as_ref().is_some_and(|sort| !sort.is_empty())
    }

    pub fn has_index(&self) -> bool {
        self.index.as_ref().is_some_and(|index| !index.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(DbError::Configuration(
                "Collection name must be provided.".into(),
            ));
        }

        for (name, field) in [
            ("created_at_field", &self.created_at_field),
            ("updated_at_field", &self.updated_at_field),
            ("deleted_at_field", &self.deleted_at_field),
        ] {
            if field.is_empty() || field.starts_with('$') {
                return Err(DbError::Configuration(format!(
                    "{} must be a plain field name, got '{}'",
                    name, field
                )));
            }
        }

        if let Some(collation) = &self.query_options.collation {
            if collation.locale.is_empty() {
                return Err(DbError::Configuration(
                    "Collation locale must be provided.".into(),
                ));
            }
        }

        Ok(())
    }
}
