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

/// The related table holds a foreign key; each parent has any number of rows.
#[derive(Debug, Clone)]
pub struct HasMany {
    pub(super) name: String,
    pub(super) related: Arc<ModelSchema>,
    /// Column on the related table.
    pub(super) foreign_key: String,
    /// Column on the parent.
    pub(super) local_key: String,
}

impl HasMany {
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    #[must_use]
    pub fn local_key(&self) -> &str {
        &self.local_key
    }
}

impl Relation for HasMany {
    fn relation_query(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Builder> {
        let value = parent
            .attribute(&self.local_key)
            .cloned()
            .unwrap_or(Value::Null);
        Ok(related_builder(db, &self.related).filter_eq(&self.foreign_key, value))
    }

    async fn get_results(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Related> {
        if key_of(parent, &self.local_key).is_none() {
            return Ok(Related::Many(Collection::default()));
        }
        let results = self.relation_query(db, parent)?.fetch().await?;
        Ok(Related::Many(results))
    }

    async fn match_eager(&self, db: &ConnectionRegistry, parents: &mut [Entity]) -> Result<()> {
        let keys = collect_keys(parents, &self.local_key);
        let groups = if keys.is_empty() {
            HashMap::new()
        } else {
            related_builder(db, &self.related)
                .filter_in(&self.foreign_key, keys)
                .fetch()
                .await?
                .group_by(&self.foreign_key)
        };

        for parent in parents.iter_mut() {
            let children = key_of(parent, &self.local_key)
                .and_then(|key| groups.get(&key).cloned())
                .unwrap_or_default();
            parent.set_relation(self.name.clone(), Related::Many(children));
        }
        Ok(())
    }
}
