use std::collections::HashMap;
use std::sync::Arc;

use oxide_record_core::Value;

use super::{collect_keys, key_of, related_builder, Relation};
use crate::builder::Builder;
use crate::collection::{Collection, HasAttributes};
use crate::connection::ConnectionRegistry;
use crate::entity::{Entity, Related};
use crate::error::Result;
use crate::schema::ModelSchema;

/// Parent and related rows linked through a pivot table.
///
/// Related rows are fetched joined to the pivot, with the pivot's parent
/// column selected under a `pivot_` alias so they can be partitioned per
/// parent. The alias is removed before the rows are handed out.
#[derive(Debug, Clone)]
pub struct BelongsToMany {
    pub(super) name: String,
    pub(super) related: Arc<ModelSchema>,
    pub(super) pivot_table: String,
    /// Pivot column pointing at the parent.
    pub(super) foreign_pivot_key: String,
    /// Pivot column pointing at the related row.
    pub(super) related_pivot_key: String,
    /// Parent column the pivot references.
    pub(super) parent_key: String,
    /// Related column the pivot references.
    pub(super) related_key: String,
}

impl BelongsToMany {
    #[must_use]
    pub fn pivot_table(&self) -> &str {
        &self.pivot_table
    }

    fn pivot_alias(&self) -> String {
        format!("pivot_{}", self.foreign_pivot_key)
    }

    fn pivot_column(&self) -> String {
        format!("{}.{}", self.pivot_table, self.foreign_pivot_key)
    }

    fn base_query(&self, db: &ConnectionRegistry) -> Result<Builder> {
        let related_table = &self.related.table;
        related_builder(db, &self.related)
            .select(&[
                format!("{related_table}.*"),
                format!("{} AS {}", self.pivot_column(), self.pivot_alias()),
            ])
            .join(
                &self.pivot_table,
                &format!("{related_table}.{}", self.related_key),
                "=",
                &format!("{}.{}", self.pivot_table, self.related_pivot_key),
            )
    }

    fn strip_pivot(&self, mut entities: Collection<Entity>) -> Collection<Entity> {
        let alias = self.pivot_alias();
        for entity in entities.iter_mut() {
            entity.forget(&alias);
        }
        entities
    }
}

impl Relation for BelongsToMany {
    fn relation_query(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Builder> {
        let value = parent
            .attribute(&self.parent_key)
            .cloned()
            .unwrap_or(Value::Null);
        Ok(self.base_query(db)?.filter_eq(&self.pivot_column(), value))
    }

    async fn get_results(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Related> {
        if key_of(parent, &self.parent_key).is_none() {
            return Ok(Related::Many(Collection::default()));
        }
        let results = self.relation_query(db, parent)?.fetch().await?;
        Ok(Related::Many(self.strip_pivot(results)))
    }

    async fn match_eager(&self, db: &ConnectionRegistry, parents: &mut [Entity]) -> Result<()> {
        let keys = collect_keys(parents, &self.parent_key);
        let groups: HashMap<String, Collection<Entity>> = if keys.is_empty() {
            HashMap::new()
        } else {
            self.base_query(db)?
                .filter_in(&self.pivot_column(), keys)
                .fetch()
                .await?
                .group_by(&self.pivot_alias())
                .into_iter()
                .map(|(key, group)| (key, self.strip_pivot(group)))
                .collect()
        };

        for parent in parents.iter_mut() {
            let related = key_of(parent, &self.parent_key)
                .and_then(|key| groups.get(&key).cloned())
                .unwrap_or_default();
            parent.set_relation(self.name.clone(), Related::Many(related));
        }
        Ok(())
    }
}
