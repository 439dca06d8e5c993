//! Relation resolvers.
//!
//! Every strategy builds a scoped query for one parent and batch-matches
//! related rows onto many parents with a single IN query, so eager loading
//! costs one statement per relation regardless of how many parents there
//! are.

mod belongs_to;
mod belongs_to_many;
mod has_many;
mod has_one;

use std::collections::HashSet;
use std::sync::Arc;

use oxide_record_core::Value;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::BelongsToMany;
pub use has_many::HasMany;
pub use has_one::HasOne;

use crate::builder::Builder;
use crate::collection::HasAttributes;
use crate::connection::ConnectionRegistry;
use crate::entity::{Entity, Related};
use crate::error::Result;
use crate::schema::{ModelSchema, RelationDef, RelationKind};

/// Shared contract of the relation strategies.
#[allow(async_fn_in_trait)]
pub trait Relation {
    /// The query returning `parent`'s related rows.
    ///
    /// # Errors
    ///
    /// Malformed relation keys.
    fn relation_query(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Builder>;

    /// Resolves the relation for one parent.
    ///
    /// # Errors
    ///
    /// Any failure running the relation query.
    async fn get_results(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Related>;

    /// Resolves the relation for every parent with one query and caches the
    /// result on each parent.
    ///
    /// # Errors
    ///
    /// Any failure running the batched query.
    async fn match_eager(&self, db: &ConnectionRegistry, parents: &mut [Entity]) -> Result<()>;
}

/// A declared relation bound to its parent type.
#[derive(Debug, Clone)]
pub enum AnyRelation {
    BelongsTo(BelongsTo),
    HasOne(HasOne),
    HasMany(HasMany),
    BelongsToMany(BelongsToMany),
}

impl AnyRelation {
    /// Resolves the relation's keys against the parent and related schemas.
    #[must_use]
    pub fn new(parent: &Arc<ModelSchema>, def: &RelationDef) -> Self {
        let related = def.related();
        let name = String::from(def.name());
        let foreign_key = def.foreign_key_name();
        let local_key = def.local_key_name(parent);
        match def.kind() {
            RelationKind::BelongsTo => Self::BelongsTo(BelongsTo {
                name,
                related,
                foreign_key,
                owner_key: local_key,
            }),
            RelationKind::HasOne => Self::HasOne(HasOne {
                name,
                related,
                foreign_key,
                local_key,
            }),
            RelationKind::HasMany => Self::HasMany(HasMany {
                name,
                related,
                foreign_key,
                local_key,
            }),
            RelationKind::BelongsToMany => Self::BelongsToMany(BelongsToMany {
                name,
                pivot_table: String::from(def.pivot_table().unwrap_or_default()),
                related_pivot_key: def.related_pivot_key_name(),
                related_key: def.related_key_name(),
                related,
                foreign_pivot_key: foreign_key,
                parent_key: local_key,
            }),
        }
    }
}

impl Relation for AnyRelation {
    fn relation_query(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Builder> {
        match self {
            Self::BelongsTo(r) => r.relation_query(db, parent),
            Self::HasOne(r) => r.relation_query(db, parent),
            Self::HasMany(r) => r.relation_query(db, parent),
            Self::BelongsToMany(r) => r.relation_query(db, parent),
        }
    }

    async fn get_results(&self, db: &ConnectionRegistry, parent: &Entity) -> Result<Related> {
        match self {
            Self::BelongsTo(r) => r.get_results(db, parent).await,
            Self::HasOne(r) => r.get_results(db, parent).await,
            Self::HasMany(r) => r.get_results(db, parent).await,
            Self::BelongsToMany(r) => r.get_results(db, parent).await,
        }
    }

    async fn match_eager(&self, db: &ConnectionRegistry, parents: &mut [Entity]) -> Result<()> {
        match self {
            Self::BelongsTo(r) => r.match_eager(db, parents).await,
            Self::HasOne(r) => r.match_eager(db, parents).await,
            Self::HasMany(r) => r.match_eager(db, parents).await,
            Self::BelongsToMany(r) => r.match_eager(db, parents).await,
        }
    }
}

/// Distinct non-null values of `key` across `parents`, in first-seen order.
fn collect_keys(parents: &[Entity], key: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    parents
        .iter()
        .filter_map(|parent| parent.attribute(key))
        .filter(|value| value.as_key().is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect()
}

/// The match key of `parent`'s `key` attribute.
fn key_of(parent: &Entity, key: &str) -> Option<String> {
    parent.attribute(key).and_then(Value::as_key)
}

fn related_builder(db: &ConnectionRegistry, related: &Arc<ModelSchema>) -> Builder {
    Builder::new(db.clone(), Arc::clone(related))
}
