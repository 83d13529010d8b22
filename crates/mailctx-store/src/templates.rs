use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, instrument};

use mailctx_core::ids::TemplateId;
use mailctx_core::template::{ResponseTemplate, UsageAnalytics, UsageMetrics};
use mailctx_core::wire::{ResponseTone, TemplateCategory};

use crate::database::Database;
use crate::error::{is_constraint_violation, StoreError};
use crate::rows::{like_pattern, RowReader};

const TEMPLATE_COLUMNS: &str = "t.template_id, t.version, t.name, t.content, t.tone, t.category, t.placeholders,
     t.tags, t.is_active, t.metadata, t.created_at, a.usage_count, a.success_rate";

/// Versioned templates plus one analytics record per version. Exactly one
/// version of each template is current.
#[derive(Clone)]
pub struct TemplateRepo {
    db: Database,
}

impl TemplateRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist `template` as the new current version together with a zeroed
    /// analytics record. Both land or neither does.
    #[instrument(skip(self, template), fields(template_id = %template.template_id, version = template.version))]
    pub fn insert_version(&self, template: &ResponseTemplate) -> Result<UsageAnalytics, StoreError> {
        let placeholders = serde_json::to_string(&template.placeholders)?;
        let tags = serde_json::to_string(&template.tags)?;
        let metadata = serde_json::to_string(&template.metadata)?;

        self.db.with_transaction(|tx| {
            tx.execute(
                "UPDATE templates SET is_current = 0 WHERE template_id = ?1",
                [template.template_id.as_str()],
            )?;
            let inserted = tx.execute(
                "INSERT INTO templates (template_id, version, name, content, tone, category, placeholders,
                                        tags, is_active, is_current, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11)",
                rusqlite::params![
                    template.template_id.as_str(),
                    template.version,
                    template.name,
                    template.content,
                    template.tone.as_str(),
                    template.category.as_str(),
                    placeholders,
                    tags,
                    template.is_active,
                    metadata,
                    template.created_at.to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(StoreError::Conflict(format!(
                        "template {} version {} already exists",
                        template.template_id, template.version
                    )));
                }
                Err(e) => return Err(e.into()),
            }
            tx.execute(
                "INSERT INTO template_analytics (template_id, version, usage_count, success_rate, last_used)
                 VALUES (?1, ?2, 0, 0.0, NULL)",
                rusqlite::params![template.template_id.as_str(), template.version],
            )?;
            Ok(UsageAnalytics::zeroed(template.template_id.clone(), template.version))
        })
    }

    /// Current version of a template.
    #[instrument(skip(self), fields(template_id = %id))]
    pub fn current(&self, id: &TemplateId) -> Result<ResponseTemplate, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {TEMPLATE_COLUMNS} FROM templates t
                 JOIN template_analytics a ON a.template_id = t.template_id AND a.version = t.version
                 WHERE t.template_id = ?1 AND t.is_current = 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_template(row),
                None => Err(StoreError::NotFound(format!("template {id}"))),
            }
        })
    }

    /// Every version of a template, oldest first.
    #[instrument(skip(self), fields(template_id = %id))]
    pub fn versions(&self, id: &TemplateId) -> Result<Vec<ResponseTemplate>, StoreError> {
        let versions = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {TEMPLATE_COLUMNS} FROM templates t
                 JOIN template_analytics a ON a.template_id = t.template_id AND a.version = t.version
                 WHERE t.template_id = ?1 ORDER BY t.version ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_template(row)?);
            }
            Ok(out)
        })?;
        if versions.is_empty() {
            return Err(StoreError::NotFound(format!("template {id}")));
        }
        Ok(versions)
    }

    /// Current versions filtered by category, tone and a case-insensitive
    /// name substring. Ordered by name.
    pub fn list_current(
        &self,
        category: Option<TemplateCategory>,
        tone: Option<ResponseTone>,
        name_pattern: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<ResponseTemplate>, StoreError> {
        self.db.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {TEMPLATE_COLUMNS} FROM templates t
                 JOIN template_analytics a ON a.template_id = t.template_id AND a.version = t.version
                 WHERE t.is_current = 1"
            );
            let mut params: Vec<String> = Vec::new();
            if let Some(category) = category {
                params.push(category.as_str().to_string());
                sql.push_str(&format!(" AND t.category = ?{}", params.len()));
            }
            if let Some(tone) = tone {
                params.push(tone.as_str().to_string());
                sql.push_str(&format!(" AND t.tone = ?{}", params.len()));
            }
            if let Some(pattern) = name_pattern {
                params.push(like_pattern(pattern));
                sql.push_str(&format!(" AND t.name LIKE ?{} ESCAPE '\\'", params.len()));
            }
            if active_only {
                sql.push_str(" AND t.is_active = 1");
            }
            sql.push_str(" ORDER BY t.name ASC, t.template_id ASC");

            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
            let mut rows = stmt.query(params_refs.as_slice())?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_template(row)?);
            }
            Ok(out)
        })
    }

    /// Record one use of the template's current version. The read of the old
    /// counters and the write of the new ones happen in one immediate
    /// transaction, so concurrent callers never lose an increment.
    #[instrument(skip(self), fields(template_id = %id))]
    pub fn track_usage(&self, id: &TemplateId, success: Option<bool>) -> Result<UsageAnalytics, StoreError> {
        let analytics = self.db.with_transaction(|tx| {
            let current: Option<(u32, i64, f64)> = tx
                .query_row(
                    "SELECT a.version, a.usage_count, a.success_rate
                     FROM templates t
                     JOIN template_analytics a ON a.template_id = t.template_id AND a.version = t.version
                     WHERE t.template_id = ?1 AND t.is_current = 1",
                    [id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((version, old_count, old_rate)) = current else {
                return Err(StoreError::NotFound(format!("template {id}")));
            };

            let count = old_count as u64 + 1;
            let rate = match success {
                Some(ok) => running_rate(old_rate, count, ok),
                None => old_rate,
            };
            let now = Utc::now();
            tx.execute(
                "UPDATE template_analytics SET usage_count = ?1, success_rate = ?2, last_used = ?3
                 WHERE template_id = ?4 AND version = ?5",
                rusqlite::params![count as i64, rate, now.to_rfc3339(), id.as_str(), version],
            )?;
            Ok(UsageAnalytics {
                template_id: id.clone(),
                version,
                usage_count: count,
                success_rate: rate,
                last_used: Some(now),
            })
        })?;
        debug!(
            template_id = %id,
            version = analytics.version,
            usage_count = analytics.usage_count,
            success_rate = analytics.success_rate,
            "template usage tracked"
        );
        Ok(analytics)
    }

    /// Analytics for one specific version.
    pub fn analytics(&self, id: &TemplateId, version: u32) -> Result<UsageAnalytics, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT usage_count, success_rate, last_used FROM template_analytics
                 WHERE template_id = ?1 AND version = ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![id.as_str(), version])?;
            let Some(row) = rows.next()? else {
                return Err(StoreError::NotFound(format!("analytics for {id} v{version}")));
            };
            let r = RowReader::new(row, "template_analytics");
            Ok(UsageAnalytics {
                template_id: id.clone(),
                version,
                usage_count: r.count(0, "usage_count")?,
                success_rate: r.value(1, "success_rate")?,
                last_used: r.timestamp_opt(2, "last_used")?,
            })
        })
    }
}

/// Incremental mean: `(old * (n - 1) + outcome) / n`, where `n` already
/// includes this use.
pub fn running_rate(old_rate: f64, n: u64, success: bool) -> f64 {
    let n = n.max(1) as f64;
    (old_rate * (n - 1.0) + if success { 1.0 } else { 0.0 }) / n
}

fn row_to_template(row: &rusqlite::Row<'_>) -> Result<ResponseTemplate, StoreError> {
    let r = RowReader::new(row, "templates");
    let usage = r.joined("template_analytics");
    Ok(ResponseTemplate {
        template_id: TemplateId::from_raw(r.value::<String>(0, "template_id")?),
        version: r.value(1, "version")?,
        name: r.value(2, "name")?,
        content: r.value(3, "content")?,
        tone: r.parsed::<ResponseTone>(4, "tone")?,
        category: r.parsed::<TemplateCategory>(5, "category")?,
        placeholders: r.json::<BTreeSet<String>>(6, "placeholders")?,
        tags: r.json::<BTreeSet<String>>(7, "tags")?,
        is_active: r.value(8, "is_active")?,
        metadata: r.json::<BTreeMap<String, String>>(9, "metadata")?,
        created_at: r.timestamp(10, "created_at")?,
        usage_metrics: UsageMetrics {
            usage_count: usage.count(11, "usage_count")?,
            success_rate: usage.value(12, "success_rate")?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailctx_core::template::extract_placeholders;

    fn template(id: &TemplateId, version: u32, name: &str, category: TemplateCategory) -> ResponseTemplate {
        let content = format!("Hello {{name}}, this is version {version} of {name}.");
        ResponseTemplate {
            template_id: id.clone(),
            name: name.into(),
            placeholders: extract_placeholders(&content),
            content,
            tone: ResponseTone::Professional,
            category,
            tags: ["sales".to_string()].into_iter().collect(),
            is_active: true,
            version,
            usage_metrics: UsageMetrics::default(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    fn repo() -> TemplateRepo {
        TemplateRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn insert_and_get_current() {
        let repo = repo();
        let id = TemplateId::new();
        let t = template(&id, 1, "Ack", TemplateCategory::Acknowledgement);
        let analytics = repo.insert_version(&t).unwrap();
        assert_eq!(analytics.usage_count, 0);

        let current = repo.current(&id).unwrap();
        assert_eq!(current, t);
    }

    #[test]
    fn new_version_becomes_current_and_history_is_ascending() {
        let repo = repo();
        let id = TemplateId::new();
        repo.insert_version(&template(&id, 1, "Ack", TemplateCategory::Acknowledgement)).unwrap();
        repo.insert_version(&template(&id, 2, "Ack", TemplateCategory::Acknowledgement)).unwrap();
        repo.insert_version(&template(&id, 3, "Ack", TemplateCategory::Acknowledgement)).unwrap();

        assert_eq!(repo.current(&id).unwrap().version, 3);
        let versions: Vec<u32> = repo.versions(&id).unwrap().iter().map(|t| t.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_version_conflicts_and_keeps_current() {
        let repo = repo();
        let id = TemplateId::new();
        repo.insert_version(&template(&id, 1, "Ack", TemplateCategory::General)).unwrap();
        let err = repo
            .insert_version(&template(&id, 1, "Ack", TemplateCategory::General))
            .unwrap_err();
        assert!(err.is_conflict());
        // The rolled-back transaction must not have cleared the current flag.
        assert_eq!(repo.current(&id).unwrap().version, 1);
    }

    #[test]
    fn missing_template_is_not_found() {
        let repo = repo();
        let id = TemplateId::new();
        assert!(matches!(repo.current(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.versions(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.track_usage(&id, None), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn track_usage_running_rate() {
        let repo = repo();
        let id = TemplateId::new();
        repo.insert_version(&template(&id, 1, "Ack", TemplateCategory::General)).unwrap();

        let a = repo.track_usage(&id, Some(true)).unwrap();
        assert_eq!(a.usage_count, 1);
        assert!((a.success_rate - 1.0).abs() < 1e-9);

        let a = repo.track_usage(&id, Some(false)).unwrap();
        assert_eq!(a.usage_count, 2);
        assert!((a.success_rate - 0.5).abs() < 1e-9);

        let a = repo.track_usage(&id, None).unwrap();
        assert_eq!(a.usage_count, 3);
        assert!((a.success_rate - 0.5).abs() < 1e-9);
        assert!(a.last_used.is_some());

        let stored = repo.analytics(&id, 1).unwrap();
        assert_eq!(stored.usage_count, 3);
        assert_eq!(repo.current(&id).unwrap().usage_metrics.usage_count, 3);
    }

    #[test]
    fn analytics_are_per_version() {
        let repo = repo();
        let id = TemplateId::new();
        repo.insert_version(&template(&id, 1, "Ack", TemplateCategory::General)).unwrap();
        repo.track_usage(&id, Some(true)).unwrap();
        repo.insert_version(&template(&id, 2, "Ack", TemplateCategory::General)).unwrap();

        assert_eq!(repo.analytics(&id, 1).unwrap().usage_count, 1);
        assert_eq!(repo.analytics(&id, 2).unwrap().usage_count, 0);
        repo.track_usage(&id, Some(false)).unwrap();
        assert_eq!(repo.analytics(&id, 1).unwrap().usage_count, 1);
        assert_eq!(repo.analytics(&id, 2).unwrap().usage_count, 1);
    }

    #[test]
    fn list_current_filters() {
        let repo = repo();
        let a = TemplateId::new();
        let b = TemplateId::new();
        repo.insert_version(&template(&a, 1, "Sales_Followup", TemplateCategory::FollowUp)).unwrap();
        repo.insert_version(&template(&a, 2, "Sales_Followup", TemplateCategory::FollowUp)).unwrap();
        repo.insert_version(&template(&b, 1, "Meeting 100%", TemplateCategory::MeetingRequest)).unwrap();

        let all = repo.list_current(None, None, None, true).unwrap();
        assert_eq!(all.len(), 2);

        let follow = repo.list_current(Some(TemplateCategory::FollowUp), None, None, true).unwrap();
        assert_eq!(follow.len(), 1);
        assert_eq!(follow[0].version, 2);

        let by_name = repo.list_current(None, None, Some("sales_"), true).unwrap();
        assert_eq!(by_name.len(), 1);
        let literal_percent = repo.list_current(None, None, Some("100%"), true).unwrap();
        assert_eq!(literal_percent.len(), 1);
        assert!(repo.list_current(None, None, Some("x%"), true).unwrap().is_empty());

        let formal = repo.list_current(None, Some(ResponseTone::Formal), None, true).unwrap();
        assert!(formal.is_empty());
    }

    #[test]
    fn concurrent_tracking_is_exact() {
        let repo = repo();
        let id = TemplateId::new();
        repo.insert_version(&template(&id, 1, "Ack", TemplateCategory::General)).unwrap();

        std::thread::scope(|s| {
            for _ in 0..16 {
                let repo = TemplateRepo::new(repo.db.clone());
                let id = id.clone();
                s.spawn(move || {
                    for _ in 0..10 {
                        repo.track_usage(&id, Some(true)).unwrap();
                    }
                });
            }
        });

        let a = repo.analytics(&id, 1).unwrap();
        assert_eq!(a.usage_count, 160);
        assert_eq!(a.success_rate, 1.0);
    }

    #[test]
    fn running_rate_formula() {
        assert_eq!(running_rate(0.0, 1, true), 1.0);
        assert_eq!(running_rate(1.0, 2, false), 0.5);
        assert!((running_rate(0.5, 3, true) - 2.0 / 3.0).abs() < 1e-12);
    }
}
