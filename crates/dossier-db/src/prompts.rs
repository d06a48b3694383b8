//! Response schemas and prompt templates.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use dossier_core::{
    Error, PromptTemplate, Result, SchemaRecord, SchemaRepository, TemplateRepository,
};

/// PostgreSQL store for both prompt collaborators.
pub struct PgPromptRepository {
    pool: Pool<Postgres>,
}

impl PgPromptRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert or replace a schema version.
    pub async fn put_schema(&self, record: &SchemaRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO response_schemas (version, schema) VALUES ($1, $2)
             ON CONFLICT (version) DO UPDATE SET schema = EXCLUDED.schema",
        )
        .bind(&record.version)
        .bind(&record.schema)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Insert or replace a template.
    pub async fn put_template(&self, template: &PromptTemplate) -> Result<()> {
        sqlx::query(
            "INSERT INTO prompt_templates (name, version, text, schema_version)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (name, version) DO UPDATE
             SET text = EXCLUDED.text, schema_version = EXCLUDED.schema_version",
        )
        .bind(&template.name)
        .bind(&template.version)
        .bind(&template.text)
        .bind(&template.schema_version)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl SchemaRepository for PgPromptRepository {
    async fn list_all(&self) -> Result<Vec<SchemaRecord>> {
        let rows = sqlx::query("SELECT version, schema FROM response_schemas ORDER BY version")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| SchemaRecord {
                version: row.get("version"),
                schema: row.get("schema"),
            })
            .collect())
    }
}

#[async_trait]
impl TemplateRepository for PgPromptRepository {
    async fn get_by_name_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<PromptTemplate>> {
        let row = sqlx::query(
            "SELECT name, version, text, schema_version
             FROM prompt_templates WHERE name = $1 AND version = $2",
        )
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| PromptTemplate {
            name: row.get("name"),
            version: row.get("version"),
            text: row.get("text"),
            schema_version: row.get("schema_version"),
        }))
    }
}
