//! In-memory cache of compiled response schemas and the active prompt template.
//!
//! Everything is loaded into one immutable snapshot and swapped as a whole,
//! so a lookup sees either the previous or the new catalog, never a mix.
//! A failed reload leaves the previous snapshot live.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use dossier_core::{Error, PromptTemplate, Result, SchemaRepository, TemplateRepository};

use crate::template::PromptText;

/// A JSON Schema compiled once and shared by every validation.
pub struct CompiledSchema {
    version: String,
    validator: jsonschema::Validator,
}

impl CompiledSchema {
    pub fn compile(version: &str, schema: &JsonValue) -> Result<Self> {
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            Error::InvalidInput(format!("schema {} does not compile: {}", version, e))
        })?;
        Ok(Self {
            version: version.to_string(),
            validator,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Validate `instance`, joining every violation into one error.
    pub fn validate(&self, instance: &JsonValue) -> Result<()> {
        let messages: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();

        if messages.is_empty() {
            Ok(())
        } else {
            Err(Error::SchemaValidation(messages.join("; ")))
        }
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// The active prompt template, parsed.
#[derive(Debug, Clone)]
pub struct ActiveTemplate {
    pub name: String,
    pub version: String,
    pub schema_version: Option<String>,
    pub text: PromptText,
}

/// One consistent view of the catalog.
#[derive(Debug)]
pub struct CatalogSnapshot {
    schemas: HashMap<String, Arc<CompiledSchema>>,
    template: Arc<ActiveTemplate>,
    loaded_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn schema(&self, version: &str) -> Option<Arc<CompiledSchema>> {
        self.schemas.get(version).cloned()
    }

    pub fn template(&self) -> Arc<ActiveTemplate> {
        self.template.clone()
    }

    pub fn schema_versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.schemas.keys().cloned().collect();
        versions.sort();
        versions
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Template/schema cache backed by the prompt stores.
pub struct PromptCatalog {
    schemas: Arc<dyn SchemaRepository>,
    templates: Arc<dyn TemplateRepository>,
    template_name: String,
    template_version: String,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
}

impl std::fmt::Debug for PromptCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptCatalog")
            .field("template_name", &self.template_name)
            .field("template_version", &self.template_version)
            .finish_non_exhaustive()
    }
}

impl PromptCatalog {
    /// Load every schema and the named template; fails if any part is missing
    /// or does not compile.
    pub async fn load(
        schemas: Arc<dyn SchemaRepository>,
        templates: Arc<dyn TemplateRepository>,
        template_name: impl Into<String>,
        template_version: impl Into<String>,
    ) -> Result<Self> {
        let template_name = template_name.into();
        let template_version = template_version.into();
        let snapshot = build_snapshot(
            schemas.as_ref(),
            templates.as_ref(),
            &template_name,
            &template_version,
        )
        .await?;

        Ok(Self {
            schemas,
            templates,
            template_name,
            template_version,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Current snapshot. Cheap; holds the lock only to clone an `Arc`.
    pub async fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Compiled schema for `version`.
    pub async fn schema(&self, version: &str) -> Result<Arc<CompiledSchema>> {
        self.snapshot()
            .await
            .schema(version)
            .ok_or_else(|| Error::SchemaNotFound(version.to_string()))
    }

    pub async fn template(&self) -> Arc<ActiveTemplate> {
        self.snapshot().await.template()
    }

    /// Rebuild from storage and swap atomically. On error the previous
    /// snapshot stays in place.
    #[instrument(skip(self), fields(subsystem = "inference", component = "catalog", op = "reload"))]
    pub async fn reload(&self) -> Result<()> {
        let start = Instant::now();
        let fresh = match build_snapshot(
            self.schemas.as_ref(),
            self.templates.as_ref(),
            &self.template_name,
            &self.template_version,
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Catalog reload failed, keeping previous snapshot");
                return Err(e);
            }
        };

        let schema_count = fresh.schemas.len();
        *self.snapshot.write().await = Arc::new(fresh);
        info!(
            schema_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Catalog reloaded"
        );
        Ok(())
    }
}

async fn build_snapshot(
    schemas: &dyn SchemaRepository,
    templates: &dyn TemplateRepository,
    template_name: &str,
    template_version: &str,
) -> Result<CatalogSnapshot> {
    let records = schemas.list_all().await?;
    let mut compiled = HashMap::with_capacity(records.len());
    for record in records {
        let schema = CompiledSchema::compile(&record.version, &record.schema)?;
        debug!(schema_version = %record.version, "Compiled response schema");
        compiled.insert(record.version, Arc::new(schema));
    }

    let template = templates
        .get_by_name_version(template_name, template_version)
        .await?
        .filter(|t| !t.text.trim().is_empty())
        .ok_or_else(|| {
            Error::Template(format!(
                "template {}:{} not found",
                template_name, template_version
            ))
        })?;

    Ok(CatalogSnapshot {
        schemas: compiled,
        template: Arc::new(activate(template)?),
        loaded_at: Utc::now(),
    })
}

fn activate(template: PromptTemplate) -> Result<ActiveTemplate> {
    let text = PromptText::parse(&template.text)?;
    Ok(ActiveTemplate {
        name: template.name,
        version: template.version,
        schema_version: template.schema_version.filter(|v| !v.trim().is_empty()),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compiled_schema_reports_all_violations() {
        let schema = CompiledSchema::compile(
            "v1",
            &json!({
                "type": "object",
                "required": ["summary", "entities"],
                "properties": {"summary": {"type": "string"}}
            }),
        )
        .unwrap();

        assert!(schema.validate(&json!({"summary": "s", "entities": {}})).is_ok());

        let err = schema.validate(&json!({"summary": 3})).unwrap_err();
        match err {
            Error::SchemaValidation(msg) => assert!(msg.contains("; "), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bad_schema_fails_to_compile() {
        let result = CompiledSchema::compile("bad", &json!({"type": 12}));
        assert!(result.is_err());
    }

    use crate::mock::{default_schema, MockPromptStore};

    async fn catalog(store: &Arc<MockPromptStore>) -> Result<PromptCatalog> {
        PromptCatalog::load(store.clone(), store.clone(), "activity", "v1").await
    }

    #[tokio::test]
    async fn test_load_requires_template() {
        let store = Arc::new(MockPromptStore::new());
        store.put_schema("v1", default_schema());
        let err = catalog(&store).await.unwrap_err();
        assert!(matches!(err, Error::Template(m) if m.contains("activity:v1")));
    }

    #[tokio::test]
    async fn test_debug_names_the_template() {
        let store = Arc::new(MockPromptStore::with_defaults());
        let catalog = catalog(&store).await.unwrap();
        let debug = format!("{catalog:?}");
        assert!(debug.contains("activity"), "{debug}");
        assert!(debug.contains("v1"), "{debug}");
    }

    #[tokio::test]
    async fn test_schema_lookup() {
        let store = Arc::new(MockPromptStore::with_defaults());
        let catalog = catalog(&store).await.unwrap();
        assert_eq!(catalog.schema("v1").await.unwrap().version(), "v1");
        assert!(matches!(
            catalog.schema("v2").await,
            Err(Error::SchemaNotFound(v)) if v == "v2"
        ));
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_schema() {
        let store = Arc::new(MockPromptStore::with_defaults());
        let catalog = catalog(&store).await.unwrap();
        let before = catalog.snapshot().await;

        store.put_schema("v2", default_schema());
        catalog.reload().await.unwrap();

        assert_eq!(catalog.snapshot().await.schema_versions(), ["v1", "v2"]);
        // Holders of the old snapshot keep a consistent view.
        assert_eq!(before.schema_versions(), ["v1"]);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_snapshot() {
        let store = Arc::new(MockPromptStore::with_defaults());
        let catalog = catalog(&store).await.unwrap();

        store.put_schema("broken", json!({"type": 12}));
        assert!(catalog.reload().await.is_err());

        assert_eq!(catalog.snapshot().await.schema_versions(), ["v1"]);
        assert!(catalog.schema("v1").await.is_ok());
    }
}
