//! Clarification questions raised by the response processor.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use dossier_core::{Error, Question, QuestionSink, Result};

pub struct PgQuestionRepository {
    pool: Pool<Postgres>,
}

impl PgQuestionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Questions for an engineer, oldest first.
    pub async fn list_for_engineer(&self, engineer_id: i64) -> Result<Vec<Question>> {
        let rows = sqlx::query(
            "SELECT id, engineer_id, question, created_at
             FROM clarification_questions
             WHERE engineer_id = $1
             ORDER BY id ASC",
        )
        .bind(engineer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| Question {
                id: row.get("id"),
                engineer_id: row.get("engineer_id"),
                question: row.get("question"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

#[async_trait]
impl QuestionSink for PgQuestionRepository {
    async fn create(&self, engineer_id: i64, question: &str) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO clarification_questions (engineer_id, question)
             VALUES ($1, $2) RETURNING id",
        )
        .bind(engineer_id)
        .bind(question)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)
    }
}
