use std::collections::HashMap;

use super::schema::Database;
use super::types::{
    DatabaseError, EntryFilter, FilterAction, FilterGroup, FilterGroupRule, NewEntryFilter,
    NewFilterGroup, PatternType, RuleOperator, UnknownVariant,
};
use crate::filter::validate_regex_pattern;

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: i64,
    name: String,
    action: String,
    is_active: bool,
    priority: i64,
    apply_to_category: String,
}

/// Rule joined with its (possibly missing) filter.
#[derive(sqlx::FromRow)]
struct RuleRow {
    group_id: i64,
    filter_id: i64,
    operator: String,
    position: i64,
    f_id: Option<i64>,
    f_name: Option<String>,
    f_pattern: Option<String>,
    f_pattern_type: Option<String>,
    f_target_type: Option<String>,
    f_case_sensitive: Option<bool>,
}

impl RuleRow {
    /// Resolve the joined filter columns. A dangling or unreadable filter
    /// resolves to `None`, which never matches.
    fn resolve_filter(&self) -> Option<EntryFilter> {
        let id = self.f_id?;
        let parsed = (|| -> Result<EntryFilter, UnknownVariant> {
            Ok(EntryFilter {
                id,
                name: self.f_name.clone().unwrap_or_default(),
                pattern: self.f_pattern.clone().unwrap_or_default(),
                pattern_type: self.f_pattern_type.as_deref().unwrap_or_default().parse()?,
                target_type: self.f_target_type.as_deref().unwrap_or_default().parse()?,
                case_sensitive: self.f_case_sensitive.unwrap_or(false),
            })
        })();

        match parsed {
            Ok(filter) => Some(filter),
            Err(e) => {
                tracing::warn!(filter_id = id, error = %e, "Unreadable filter, rule will not match");
                None
            }
        }
    }
}

impl Database {
    // ========================================================================
    // Filter Configuration
    // ========================================================================
    //
    // Callers mutating filter configuration must invalidate any
    // `FilterEngine` cache built on this database.

    /// Create an entry filter, returning its ID.
    ///
    /// Regex patterns are compiled once up front so a broken pattern is
    /// rejected here rather than at evaluation time.
    pub async fn create_filter(&self, filter: &NewEntryFilter) -> Result<i64, DatabaseError> {
        if filter.pattern.is_empty() {
            return Err(DatabaseError::Invalid("filter pattern is empty".into()));
        }
        if filter.pattern_type == PatternType::Regex {
            validate_regex_pattern(&filter.pattern, filter.case_sensitive)
                .map_err(|e| DatabaseError::Invalid(e.to_string()))?;
        }

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO entry_filters (name, pattern, pattern_type, target_type, case_sensitive)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(&filter.name)
        .bind(&filter.pattern)
        .bind(filter.pattern_type.as_str())
        .bind(filter.target_type.as_str())
        .bind(filter.case_sensitive)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Delete an entry filter. Rules referencing it stop matching.
    pub async fn delete_filter(&self, filter_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM entry_filters WHERE id = ?")
            .bind(filter_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("filter {filter_id}")));
        }
        Ok(())
    }

    /// Create a filter group, returning its ID.
    pub async fn create_filter_group(&self, group: &NewFilterGroup) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO filter_groups (name, action, is_active, priority, apply_to_category)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(&group.name)
        .bind(group.action.as_str())
        .bind(group.is_active)
        .bind(group.priority)
        .bind(&group.apply_to_category)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Activate or deactivate a filter group.
    pub async fn set_filter_group_active(
        &self,
        group_id: i64,
        is_active: bool,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE filter_groups SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("filter group {group_id}")));
        }
        Ok(())
    }

    /// Append or place a rule in a group's chain.
    pub async fn add_group_rule(
        &self,
        group_id: i64,
        filter_id: i64,
        operator: RuleOperator,
        position: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO filter_group_rules (group_id, filter_id, operator, position)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(group_id, position) DO UPDATE SET
                filter_id = excluded.filter_id,
                operator = excluded.operator
        "#,
        )
        .bind(group_id)
        .bind(filter_id)
        .bind(operator.as_str())
        .bind(position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load active groups with their rule chains and resolved filters.
    ///
    /// Groups are ordered by priority (highest first), rules by position.
    pub async fn get_active_filter_groups(&self) -> Result<Vec<FilterGroup>, DatabaseError> {
        let group_rows = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT id, name, action, is_active, priority, apply_to_category
            FROM filter_groups
            WHERE is_active = 1
            ORDER BY priority DESC, id ASC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let rule_rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT r.group_id, r.filter_id, r.operator, r.position,
                   f.id AS f_id, f.name AS f_name, f.pattern AS f_pattern,
                   f.pattern_type AS f_pattern_type, f.target_type AS f_target_type,
                   f.case_sensitive AS f_case_sensitive
            FROM filter_group_rules r
            JOIN filter_groups g ON g.id = r.group_id AND g.is_active = 1
            LEFT JOIN entry_filters f ON f.id = r.filter_id
            ORDER BY r.group_id, r.position
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut rules_by_group: HashMap<i64, Vec<FilterGroupRule>> = HashMap::new();
        for row in rule_rows {
            let filter = row.resolve_filter();
            rules_by_group
                .entry(row.group_id)
                .or_default()
                .push(FilterGroupRule {
                    filter_id: row.filter_id,
                    operator: RuleOperator::from_db(&row.operator),
                    position: row.position,
                    filter,
                });
        }

        let mut groups = Vec::with_capacity(group_rows.len());
        for row in group_rows {
            let action: FilterAction = match row.action.parse() {
                Ok(action) => action,
                Err(e) => {
                    tracing::warn!(group_id = row.id, error = %e, "Skipping filter group");
                    continue;
                }
            };
            groups.push(FilterGroup {
                id: row.id,
                name: row.name,
                action,
                is_active: row.is_active,
                priority: row.priority,
                apply_to_category: row.apply_to_category,
                rules: rules_by_group.remove(&row.id).unwrap_or_default(),
            });
        }

        Ok(groups)
    }
}
