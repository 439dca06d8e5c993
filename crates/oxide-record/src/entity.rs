//! One storage row and its persistence lifecycle.
//!
//! An [`Entity`] starts out transient, becomes persisted after an insert or
//! when hydrated from a query, and ends deleted. A deleted entity stays
//! readable but can no longer be saved.

use std::collections::BTreeMap;
use std::sync::Arc;

use oxide_record_core::Value;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::builder::Builder;
use crate::cast;
use crate::collection::{Collection, HasAttributes, ToJson};
use crate::connection::{ConnectionRegistry, Row};
use crate::error::{OrmError, Result};
use crate::relations::{AnyRelation, Relation};
use crate::schema::{ModelEvent, ModelSchema};

/// Attribute map used for mass assignment and persistence.
pub type Attributes = BTreeMap<String, Value>;

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityState {
    /// Constructed in memory, not stored.
    #[default]
    Transient,
    /// Backed by a stored row.
    Persisted,
    /// Its row was deleted. Terminal.
    Deleted,
}

/// A resolved relation cached on its parent.
#[derive(Debug, Clone)]
pub enum Related {
    /// Belongs-to and has-one results.
    One(Option<Entity>),
    /// Has-many and belongs-to-many results.
    Many(Collection<Entity>),
}

impl Related {
    #[must_use]
    pub const fn as_one(&self) -> Option<&Entity> {
        match self {
            Self::One(entity) => entity.as_ref(),
            Self::Many(_) => None,
        }
    }

    #[must_use]
    pub const fn as_many(&self) -> Option<&Collection<Entity>> {
        match self {
            Self::Many(entities) => Some(entities),
            Self::One(_) => None,
        }
    }
}

impl ToJson for Related {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::One(Some(entity)) => entity.to_json(),
            Self::One(None) => serde_json::Value::Null,
            Self::Many(entities) => entities.to_json(),
        }
    }
}

/// Result of the attribute-read chain in [`Entity::resolve`].
#[derive(Debug, Clone)]
pub enum Property {
    Relation(Related),
    Attribute(Value),
}

/// In-memory representation of one row.
#[derive(Debug, Clone)]
pub struct Entity {
    schema: Arc<ModelSchema>,
    attributes: Attributes,
    original: Attributes,
    relations: BTreeMap<String, Related>,
    state: EntityState,
}

impl Entity {
    /// An empty, transient entity.
    #[must_use]
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        Self {
            schema,
            attributes: Attributes::new(),
            original: Attributes::new(),
            relations: BTreeMap::new(),
            state: EntityState::Transient,
        }
    }

    /// A transient entity populated through mass assignment.
    ///
    /// # Errors
    ///
    /// Same as [`Entity::fill`].
    pub fn make(schema: Arc<ModelSchema>, attributes: Attributes) -> Result<Self> {
        let mut entity = Self::new(schema);
        entity.fill(attributes)?;
        Ok(entity)
    }

    /// Builds a persisted entity from a fetched row, casting declared
    /// attributes once.
    ///
    /// # Errors
    ///
    /// [`OrmError::Cast`] when a stored value does not fit its cast.
    pub fn hydrate(schema: Arc<ModelSchema>, row: Row) -> Result<Self> {
        let mut attributes = Attributes::new();
        for (key, value) in row {
            let value = match schema.cast_for(&key) {
                Some(cast) => cast.hydrate(&key, value)?,
                None => value,
            };
            attributes.insert(key, value);
        }
        let mut entity = Self::new(schema);
        entity.set_raw_attributes(attributes);
        Ok(entity)
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    #[must_use]
    pub const fn state(&self) -> EntityState {
        self.state
    }

    /// Whether the entity is backed by a stored row.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.state == EntityState::Persisted
    }

    /// Applies mass assignment.
    ///
    /// Keys outside the allow-list are rejected. When the type is totally
    /// guarded or prevents silent discarding, rejected keys fail the whole
    /// call before anything is assigned, unless a discard handler is
    /// registered, in which case it is told about them and the remaining
    /// keys are assigned.
    ///
    /// # Errors
    ///
    /// [`OrmError::MassAssignment`] naming the rejected keys, or
    /// [`OrmError::Cast`] when an accepted value does not fit its cast.
    pub fn fill(&mut self, attributes: Attributes) -> Result<&mut Self> {
        let (accepted, rejected): (Vec<_>, Vec<_>) = attributes
            .into_iter()
            .partition(|(key, _)| self.schema.is_fillable(key));

        if !rejected.is_empty()
            && (self.schema.is_totally_guarded() || self.schema.prevents_silently_discarding())
        {
            let keys: Vec<String> = rejected.into_iter().map(|(key, _)| key).collect();
            match self.schema.discard_handler() {
                Some(handler) => (**handler)(&self.schema.name, &keys),
                None => {
                    return Err(OrmError::MassAssignment {
                        model: self.schema.name.clone(),
                        keys,
                    })
                }
            }
        }

        let cast = accepted
            .into_iter()
            .map(|(key, value)| {
                let value = self.cast_attribute(&key, value)?;
                Ok((key, value))
            })
            .collect::<Result<Vec<_>>>()?;
        self.attributes.extend(cast);
        Ok(self)
    }

    /// Assigns attributes without the mass-assignment guard. Casts still
    /// apply.
    ///
    /// # Errors
    ///
    /// [`OrmError::Cast`] when a value does not fit its cast.
    pub fn force_fill(&mut self, attributes: Attributes) -> Result<&mut Self> {
        for (key, value) in attributes {
            self.set(key, value)?;
        }
        Ok(self)
    }

    /// Sets one attribute through its cast.
    ///
    /// # Errors
    ///
    /// [`OrmError::Cast`] when the value does not fit the cast.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        let key = key.into();
        let value = self.cast_attribute(&key, value.into())?;
        self.attributes.insert(key, value);
        Ok(self)
    }

    fn cast_attribute(&self, key: &str, value: Value) -> Result<Value> {
        match self.schema.cast_for(key) {
            Some(cast) => cast.apply(key, value),
            None => Ok(value),
        }
    }

    /// Replaces all attributes with a stored row, bypassing guards and
    /// casts, and marks the entity persisted.
    pub fn set_raw_attributes(&mut self, attributes: Attributes) {
        self.original = attributes.clone();
        self.attributes = attributes;
        self.state = EntityState::Persisted;
    }

    /// Removes an attribute.
    pub fn forget(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// Reads a stored attribute.
    ///
    /// # Errors
    ///
    /// [`OrmError::PropertyNotFound`] when the attribute is absent.
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.attributes
            .get(key)
            .ok_or_else(|| OrmError::PropertyNotFound {
                model: self.schema.name.clone(),
                property: String::from(key),
            })
    }

    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Attribute values as last loaded or saved.
    #[must_use]
    pub const fn original(&self) -> &Attributes {
        &self.original
    }

    /// Attributes that differ from their original value.
    #[must_use]
    pub fn dirty(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Whether any attribute changed since the last load or save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty().is_empty()
    }

    /// Whether the named attribute changed since the last load or save.
    #[must_use]
    pub fn is_attribute_dirty(&self, key: &str) -> bool {
        self.attributes.get(key) != self.original.get(key)
    }

    /// The primary-key value, if set and not NULL.
    #[must_use]
    pub fn key(&self) -> Option<&Value> {
        self.attributes
            .get(&self.schema.primary_key)
            .filter(|value| !value.is_null())
    }

    fn require_key(&self) -> Result<Value> {
        self.key().cloned().ok_or_else(|| OrmError::MissingPrimaryKey {
            model: self.schema.name.clone(),
        })
    }

    /// A cached relation result.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    #[must_use]
    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Caches a relation result under `name`.
    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) -> &mut Self {
        self.relations.insert(name.into(), related);
        self
    }

    /// The cached single result of a belongs-to or has-one relation.
    #[must_use]
    pub fn related_one(&self, name: &str) -> Option<&Self> {
        self.relations.get(name).and_then(Related::as_one)
    }

    /// The cached results of a has-many or belongs-to-many relation.
    #[must_use]
    pub fn related_many(&self, name: &str) -> Option<&Collection<Self>> {
        self.relations.get(name).and_then(Related::as_many)
    }

    /// Checks a plain secret against a hashed attribute.
    #[must_use]
    pub fn check_secret(&self, key: &str, secret: &str) -> bool {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|hash| cast::verify_secret(secret, hash))
    }

    /// The query a declared relation runs for this entity.
    ///
    /// # Errors
    ///
    /// [`OrmError::RelationNotDefined`] for undeclared names.
    pub fn related_query(&self, db: &ConnectionRegistry, name: &str) -> Result<Builder> {
        let relation = AnyRelation::new(&self.schema, self.schema.relation(name)?);
        relation.relation_query(db, self)
    }

    /// Resolves a declared relation for this entity and caches it.
    ///
    /// # Errors
    ///
    /// [`OrmError::RelationNotDefined`] for undeclared names, or any error
    /// from running the relation query.
    pub async fn load(&mut self, db: &ConnectionRegistry, name: &str) -> Result<&Related> {
        let relation = AnyRelation::new(&self.schema, self.schema.relation(name)?);
        let related = relation.get_results(db, self).await?;
        self.relations.insert(String::from(name), related);
        self.relations
            .get(name)
            .ok_or_else(|| OrmError::InvalidState(format!("relation `{name}` was not cached")))
    }

    /// Reads a property: a cached relation, then a declared relation (loaded
    /// and cached), then a stored attribute.
    ///
    /// # Errors
    ///
    /// [`OrmError::PropertyNotFound`] when nothing matches.
    pub async fn resolve(&mut self, db: &ConnectionRegistry, key: &str) -> Result<Property> {
        if let Some(related) = self.relations.get(key) {
            return Ok(Property::Relation(related.clone()));
        }
        if self.schema.has_relation(key) {
            let related = self.load(db, key).await?;
            return Ok(Property::Relation(related.clone()));
        }
        self.get(key).cloned().map(Property::Attribute)
    }

    /// Inserts or updates the backing row, firing the type's lifecycle
    /// hooks around the statement.
    ///
    /// A transient entity is inserted and receives the generated key when it
    /// had none. A persisted entity updates its non-key attributes, filtered
    /// by its key. Returns `false` without touching storage when a `Saving`,
    /// `Creating` or `Updating` hook cancels.
    ///
    /// # Errors
    ///
    /// [`OrmError::InvalidState`] for deleted entities,
    /// [`OrmError::MissingPrimaryKey`] for a persisted entity whose key was
    /// not loaded, or any error from executing the statement.
    pub async fn save(&mut self, db: &ConnectionRegistry) -> Result<bool> {
        if self.state == EntityState::Deleted {
            return Err(OrmError::InvalidState(format!(
                "cannot save a deleted {}",
                self.schema.name
            )));
        }
        let creating = !self.exists();
        if !creating {
            self.require_key()?;
        }

        let schema = Arc::clone(&self.schema);
        let (before, after) = if creating {
            (ModelEvent::Creating, ModelEvent::Created)
        } else {
            (ModelEvent::Updating, ModelEvent::Updated)
        };
        if !schema.fire(ModelEvent::Saving, self) || !schema.fire(before, self) {
            debug!(model = %schema.name, "save cancelled by hook");
            return Ok(false);
        }

        let builder = Builder::new(db.clone(), Arc::clone(&schema));
        if creating {
            let id = builder.insert_get_id(self.attributes.clone()).await?;
            if self.key().is_none() {
                self.attributes
                    .insert(schema.primary_key.clone(), Value::Int(id));
            }
        } else {
            let key = self.require_key()?;
            let values: Attributes = self
                .attributes
                .iter()
                .filter(|(column, _)| **column != schema.primary_key)
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();
            if !values.is_empty() {
                builder
                    .filter_eq(&schema.primary_key, key)
                    .update(values)
                    .await?;
            }
        }

        self.original = self.attributes.clone();
        self.state = EntityState::Persisted;
        schema.fire(after, self);
        schema.fire(ModelEvent::Saved, self);
        Ok(true)
    }

    /// Fills and saves a persisted entity. Returns whether the save ran.
    ///
    /// # Errors
    ///
    /// [`OrmError::InvalidState`] unless the entity is persisted, plus any
    /// error from [`Entity::fill`] or [`Entity::save`].
    pub async fn update(&mut self, db: &ConnectionRegistry, attributes: Attributes) -> Result<bool> {
        if !self.exists() {
            return Err(OrmError::InvalidState(format!(
                "cannot update a {} that is not persisted",
                self.schema.name
            )));
        }
        self.fill(attributes)?;
        self.save(db).await
    }

    /// Deletes the backing row. Returns whether a row was removed; `false`
    /// also when a `Deleting` hook cancels, in which case nothing runs.
    ///
    /// # Errors
    ///
    /// [`OrmError::InvalidState`] when already deleted,
    /// [`OrmError::MissingPrimaryKey`] when the key is unknown, or any error
    /// from executing the statement.
    pub async fn delete(&mut self, db: &ConnectionRegistry) -> Result<bool> {
        if self.state == EntityState::Deleted {
            return Err(OrmError::InvalidState(format!(
                "{} is already deleted",
                self.schema.name
            )));
        }
        let key = self.require_key()?;
        let schema = Arc::clone(&self.schema);
        if !schema.fire(ModelEvent::Deleting, self) {
            debug!(model = %schema.name, "delete cancelled by hook");
            return Ok(false);
        }

        let deleted = Builder::new(db.clone(), Arc::clone(&schema))
            .filter_eq(&schema.primary_key, key)
            .delete()
            .await?;
        self.state = EntityState::Deleted;
        schema.fire(ModelEvent::Deleted, self);
        Ok(deleted > 0)
    }

    /// Reloads attributes from storage and reloads cached relations.
    ///
    /// # Errors
    ///
    /// [`OrmError::MissingPrimaryKey`] when the key is unknown,
    /// [`OrmError::RecordNotFound`] when the row is gone.
    pub async fn refresh(&mut self, db: &ConnectionRegistry) -> Result<()> {
        let key = self.require_key()?;
        let fresh = Builder::new(db.clone(), Arc::clone(&self.schema))
            .find_or_fail(key)
            .await?;
        self.set_raw_attributes(fresh.attributes);

        let loaded: Vec<String> = self.relations.keys().cloned().collect();
        self.relations.clear();
        for name in loaded {
            if self.schema.has_relation(&name) {
                self.load(db, &name).await?;
            }
        }
        Ok(())
    }

    /// Visible attributes and cached relations as JSON, hidden names
    /// removed.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.attributes {
            if !self.schema.is_hidden(key) {
                map.insert(key.clone(), value.to_json());
            }
        }
        for (name, related) in &self.relations {
            if !self.schema.is_hidden(name) {
                map.insert(name.clone(), related.to_json());
            }
        }
        serde_json::Value::Object(map)
    }
}

impl HasAttributes for Entity {
    fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

impl ToJson for Entity {
    fn to_json(&self) -> serde_json::Value {
        Self::to_json(self)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::attributes;
    use crate::cast::Cast;
    use crate::model::Model;

    struct Member;

    impl Model for Member {
        const NAME: &'static str = "Member";

        fn define(schema: &mut ModelSchema) {
            schema
                .fillable(&["name", "age", "password"])
                .hidden(&["password"])
                .cast("age", Cast::Integer)
                .cast("password", Cast::Hashed);
        }
    }

    static DISCARDED: Mutex<Vec<String>> = Mutex::new(Vec::new());

    struct Visitor;

    impl Model for Visitor {
        const NAME: &'static str = "Visitor";

        fn define(schema: &mut ModelSchema) {
            schema.fillable(&["name"]).on_discarded_attributes(|_, keys| {
                DISCARDED
                    .lock()
                    .unwrap()
                    .extend(keys.iter().cloned());
            });
        }
    }

    struct Lenient;

    impl Model for Lenient {
        const NAME: &'static str = "Lenient";

        fn define(schema: &mut ModelSchema) {
            schema.fillable(&["name"]).prevent_silently_discarding(false);
        }
    }

    #[test]
    fn test_fill_applies_casts() {
        let entity = Member::make(attributes! { "name" => "Ann", "age" => "41" }).unwrap();
        assert_eq!(entity.get("age").unwrap(), &Value::Int(41));
        assert_eq!(entity.state(), EntityState::Transient);
        assert!(!entity.exists());
    }

    #[test]
    fn test_fill_rejects_whole_call() {
        let mut entity = Member::make(attributes! {}).unwrap();
        let err = entity
            .fill(attributes! { "name" => "Ann", "role" => "admin" })
            .unwrap_err();
        assert!(matches!(
            err,
            OrmError::MassAssignment { ref keys, .. } if keys == &vec![String::from("role")]
        ));
        assert!(entity.attributes().is_empty());
    }

    #[test]
    fn test_discard_handler_recovers() {
        let entity = Visitor::make(attributes! { "name" => "Bo", "admin" => true }).unwrap();
        assert_eq!(entity.attributes().len(), 1);
        assert!(DISCARDED.lock().unwrap().contains(&String::from("admin")));
    }

    #[test]
    fn test_silent_discard_when_allowed() {
        let entity = Lenient::make(attributes! { "name" => "Cy", "admin" => true }).unwrap();
        assert_eq!(entity.attributes().len(), 1);
        assert!(entity.attribute("admin").is_none());
    }

    #[test]
    fn test_property_not_found() {
        let entity = Member::make(attributes! { "name" => "Ann" }).unwrap();
        assert!(matches!(
            entity.get("nickname"),
            Err(OrmError::PropertyNotFound { ref property, .. }) if property == "nickname"
        ));
    }

    #[test]
    fn test_hydrate_marks_persisted_and_clean() {
        let mut row = Row::new();
        row.insert(String::from("id"), Value::Int(4));
        row.insert(String::from("age"), Value::from("30"));
        let mut entity = Entity::hydrate(Member::schema(), row).unwrap();
        assert!(entity.exists());
        assert_eq!(entity.key(), Some(&Value::Int(4)));
        assert_eq!(entity.get("age").unwrap(), &Value::Int(30));
        assert!(!entity.is_dirty());

        entity.set("age", 31).unwrap();
        assert!(entity.is_attribute_dirty("age"));
        assert_eq!(entity.dirty().len(), 1);
        assert_eq!(entity.original()["age"], Value::Int(30));
    }

    #[test]
    fn test_hidden_and_secret() {
        let entity = Member::make(attributes! { "name" => "Ann", "password" => "pw-123" }).unwrap();
        let json = entity.to_json();
        assert_eq!(json, serde_json::json!({ "name": "Ann" }));
        assert!(entity.check_secret("password", "pw-123"));
        assert!(!entity.check_secret("password", "nope"));
        assert_eq!(serde_json::to_value(&entity).unwrap(), json);
    }

    #[test]
    fn test_to_json_expands_relations() {
        let mut parent = Member::make(attributes! { "name" => "Ann" }).unwrap();
        let child = Member::make(attributes! { "name" => "Kid", "password" => "x" }).unwrap();
        parent.set_relation("children", Related::Many(vec![child].into()));
        parent.set_relation("mentor", Related::One(None));
        assert_eq!(
            parent.to_json(),
            serde_json::json!({
                "name": "Ann",
                "children": [{ "name": "Kid" }],
                "mentor": null
            })
        );
    }
}
