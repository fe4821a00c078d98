use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Polling cadence tier of a site.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VelocityMode {
    /// Frequent polling, minutes apart.
    #[default]
    News,
    /// Infrequent polling, once a day.
    Evergreen,
}

impl VelocityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VelocityMode::News => "news",
            VelocityMode::Evergreen => "evergreen",
        }
    }
}

/// A destination category, id as assigned by the publishing target.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SiteCategory {
    pub id: i64,
    pub name: String,
}

stored_object!(Site, "site", {
    name: String,
    base_url: String,
    /// Opaque handle resolved by the credential store; never a secret.
    credentials_ref: String,
    target_language: String,
    velocity: VelocityMode,
    #[serde(default)]
    categories: Vec<SiteCategory>,
    watermark_text: Option<String>,
    default_author_id: Option<i64>,
    is_active: bool
});

impl Site {
    pub fn new(
        name: String,
        base_url: String,
        credentials_ref: String,
        target_language: String,
        velocity: VelocityMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            base_url,
            credentials_ref,
            target_language,
            velocity,
            categories: Vec::new(),
            watermark_text: None,
            default_author_id: None,
            is_active: true,
        }
    }

    pub fn category(&self, id: i64) -> Option<&SiteCategory> {
        self.categories.iter().find(|category| category.id == id)
    }

    /// Watermark text, if configured and not blank.
    pub fn watermark(&self) -> Option<&str> {
        self.watermark_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    /// Replace the category list, typically after a sync with the destination.
    pub async fn replace_categories(
        id: &str,
        categories: Vec<SiteCategory>,
        db: &SurrealDbClient,
    ) -> Result<Site, AppError> {
        let mut result = db
            .client
            .query(
                "UPDATE type::thing($table, $id)
                 SET categories = $categories, updated_at = $now
                 RETURN *;",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("categories", categories))
            .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
            .await?;

        let updated: Option<Site> = result.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("site {id}")))
    }

    pub async fn list_active(
        velocity: VelocityMode,
        db: &SurrealDbClient,
    ) -> Result<Vec<Site>, AppError> {
        let sites: Vec<Site> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE is_active = true AND velocity = $velocity
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("velocity", velocity))
            .await?
            .take(0)?;

        Ok(sites)
    }
}
