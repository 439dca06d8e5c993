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

/// The parent holds a foreign key pointing at one related row.
#[derive(Debug, Clone)]
pub struct BelongsTo {
    pub(super) name: String,
    pub(super) related: Arc<ModelSchema>,
    /// Column on the parent.
    pub(super) foreign_key: String,
    /// Column on the related table.
    pub(super) owner_key: String,
}

impl BelongsTo {
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    #[must_use]
    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }
}

impl Relation for BelongsTo {
    fn relation_query(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Builder> {
        let value = parent
            .attribute(&self.foreign_key)
            .cloned()
            .unwrap_or(Value::Null);
        Ok(related_builder(db, &self.related).filter_eq(&self.owner_key, value))
    }

    async fn get_results(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Related> {
        if key_of(parent, &self.foreign_key).is_none() {
            return Ok(Related::One(None));
        }
        let results = self.relation_query(db, parent)?.take(1).fetch().await?;
        Ok(Related::One(results.into_iter().next()))
    }

    async fn match_eager(&self, db: &ConnectionRegistry, parents: &mut [Entity]) -> Result<()> {
        let keys = collect_keys(parents, &self.foreign_key);
        let owners = if keys.is_empty() {
            HashMap::new()
        } else {
            related_builder(db, &self.related)
                .filter_in(&self.owner_key, keys)
                .fetch()
                .await?
                .key_by(&self.owner_key)
        };

        for parent in parents.iter_mut() {
            let owner = key_of(parent, &self.foreign_key).and_then(|key| owners.get(&key).cloned());
            parent.set_relation(self.name.clone(), Related::One(owner));
        }
        Ok(())
    }
}
