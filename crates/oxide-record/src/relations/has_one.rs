use std::collections::HashMap;
use std::sync::Arc;

use oxide_record_core::Value;

use super::{collect_keys, key_of, related_builder, Relation};
use crate::builder::Builder;
use crate::collection::HasAttributes;
use crate::connection::ConnectionRegistry;
use crate::entity::{Entity, Related};
use crate::error::Result;
use crate::schema::ModelSchema;

/// The related table holds a foreign key; each parent has at most one row.
#[derive(Debug, Clone)]
pub struct HasOne {
    pub(super) name: String,
    pub(super) related: Arc<ModelSchema>,
    /// Column on the related table.
    pub(super) foreign_key: String,
    /// Column on the parent.
    pub(super) local_key: String,
}

impl HasOne {
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    #[must_use]
    pub fn local_key(&self) -> &str {
        &self.local_key
    }
}

impl Relation for HasOne {
    fn relation_query(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Builder> {
        let value = parent
            .attribute(&self.local_key)
            .cloned()
            .unwrap_or(Value::Null);
        Ok(related_builder(db, &self.related).filter_eq(&self.foreign_key, value))
    }

    async fn get_results(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Related> {
        if key_of(parent, &self.local_key).is_none() {
            return Ok(Related::One(None));
        }
        let results = self.relation_query(db, parent)?.take(1).fetch().await?;
        Ok(Related::One(results.into_iter().next()))
    }

    async fn match_eager(&self, db: &ConnectionRegistry, parents: &mut [Entity]) -> Result<()> {
        let keys = collect_keys(parents, &self.local_key);
        let children: HashMap<String, Entity> = if keys.is_empty() {
            HashMap::new()
        } else {
            related_builder(db, &self.related)
                .filter_in(&self.foreign_key, keys)
                .fetch()
                .await?
                .group_by(&self.foreign_key)
                .into_iter()
                .filter_map(|(key, group)| group.into_iter().next().map(|first| (key, first)))
                .collect()
        };

        for parent in parents.iter_mut() {
            let child = key_of(parent, &self.local_key).and_then(|key| children.get(&key).cloned());
            parent.set_relation(self.name.clone(), Related::One(child));
        }
        Ok(())
    }
}
