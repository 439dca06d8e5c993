//! Per-type registration table.
//!
//! Each entity type describes itself once, in [`Model::define`], and the
//! resulting [`ModelSchema`] is cached for the life of the process. Relation
//! targets are stored as schema accessors so two types may refer to each
//! other; their keys resolve on first use.

use std::any::TypeId;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use oxide_record_core::inflect;

use crate::cast::Cast;
use crate::config::DEFAULT_CONNECTION;
use crate::entity::Entity;
use crate::error::{OrmError, Result};
use crate::model::Model;

/// Callback invoked instead of failing when mass assignment rejects keys.
///
/// Receives the entity type name and the rejected keys.
pub type DiscardHandler = Arc<dyn Fn(&str, &[String]) + Send + Sync>;

/// Lifecycle hook. Returning `false` from a `before` event cancels the
/// operation; the return value of other events is ignored.
pub type EventHandler = Arc<dyn Fn(&mut Entity) -> bool + Send + Sync>;

/// Points in the save and delete lifecycle where hooks run.
///
/// A save fires `Saving`, then `Creating` or `Updating`, then after the
/// statement `Created` or `Updated`, then `Saved`. A delete fires `Deleting`
/// and `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelEvent {
    Saving,
    Creating,
    Created,
    Updating,
    Updated,
    Saved,
    Deleting,
    Deleted,
}

impl ModelEvent {
    /// Whether a hook on this event can cancel the operation.
    #[must_use]
    pub const fn can_cancel(self) -> bool {
        matches!(
            self,
            Self::Saving | Self::Creating | Self::Updating | Self::Deleting
        )
    }
}

/// Accessor returning a related type's schema.
pub type SchemaFn = fn() -> Arc<ModelSchema>;

/// Strategy linking a parent type to a related type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The parent holds the foreign key.
    BelongsTo,
    /// The related type holds the foreign key; at most one row.
    HasOne,
    /// The related type holds the foreign key.
    HasMany,
    /// Linked through a pivot table.
    BelongsToMany,
}

/// A declared relation.
///
/// Unset keys fall back to naming conventions when the relation is used.
#[derive(Clone)]
pub struct RelationDef {
    name: String,
    kind: RelationKind,
    related: SchemaFn,
    related_name: &'static str,
    parent_name: String,
    foreign_key: Option<String>,
    local_key: Option<String>,
    pivot_table: Option<String>,
    related_pivot_key: Option<String>,
    related_key: Option<String>,
}

impl fmt::Debug for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("related", &self.related_name)
            .field("foreign_key", &self.foreign_key)
            .field("local_key", &self.local_key)
            .field("pivot_table", &self.pivot_table)
            .field("related_pivot_key", &self.related_pivot_key)
            .field("related_key", &self.related_key)
            .finish_non_exhaustive()
    }
}

impl RelationDef {
    fn new<R: Model>(name: &str, kind: RelationKind, parent_name: &str) -> Self {
        Self {
            name: String::from(name),
            kind,
            related: R::schema,
            related_name: R::NAME,
            parent_name: String::from(parent_name),
            foreign_key: None,
            local_key: None,
            pivot_table: None,
            related_pivot_key: None,
            related_key: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Schema of the related type.
    #[must_use]
    pub fn related(&self) -> Arc<ModelSchema> {
        (self.related)()
    }

    /// Sets the foreign-key column.
    ///
    /// On the related table for has-one/has-many, on the parent table for
    /// belongs-to, on the pivot table (pointing at the parent) for
    /// belongs-to-many.
    pub fn foreign_key(&mut self, column: &str) -> &mut Self {
        self.foreign_key = Some(String::from(column));
        self
    }

    /// Sets the parent-side key (has-one, has-many, belongs-to-many).
    pub fn local_key(&mut self, column: &str) -> &mut Self {
        self.local_key = Some(String::from(column));
        self
    }

    /// Sets the key on the related table a belongs-to points at.
    pub fn owner_key(&mut self, column: &str) -> &mut Self {
        self.local_key = Some(String::from(column));
        self
    }

    /// Sets the pivot column pointing at the related table.
    pub fn related_pivot_key(&mut self, column: &str) -> &mut Self {
        self.related_pivot_key = Some(String::from(column));
        self
    }

    /// Sets the related-table column the pivot points at.
    pub fn related_key(&mut self, column: &str) -> &mut Self {
        self.related_key = Some(String::from(column));
        self
    }

    /// Foreign-key column, defaulting to `{type}_id` of the side it
    /// references.
    #[must_use]
    pub fn foreign_key_name(&self) -> String {
        self.foreign_key.clone().unwrap_or_else(|| match self.kind {
            RelationKind::BelongsTo => inflect::foreign_key(self.related_name),
            _ => inflect::foreign_key(&self.parent_name),
        })
    }

    /// Key compared against the foreign key: the parent's column for
    /// has-one/has-many/belongs-to-many, the related column for belongs-to.
    /// Defaults to the owning side's primary key.
    #[must_use]
    pub fn local_key_name(&self, parent: &ModelSchema) -> String {
        self.local_key.clone().unwrap_or_else(|| match self.kind {
            RelationKind::BelongsTo => self.related().primary_key.clone(),
            _ => parent.primary_key.clone(),
        })
    }

    /// Pivot table name (belongs-to-many only).
    #[must_use]
    pub fn pivot_table(&self) -> Option<&str> {
        self.pivot_table.as_deref()
    }

    /// Pivot column pointing at the related table, default `{related}_id`.
    #[must_use]
    pub fn related_pivot_key_name(&self) -> String {
        self.related_pivot_key
            .clone()
            .unwrap_or_else(|| inflect::foreign_key(self.related_name))
    }

    /// Related column the pivot points at, default the related primary key.
    #[must_use]
    pub fn related_key_name(&self) -> String {
        self.related_key
            .clone()
            .unwrap_or_else(|| self.related().primary_key.clone())
    }
}

/// Everything known about one entity type.
#[derive(Clone)]
pub struct ModelSchema {
    /// Type name, used in errors and key conventions.
    pub name: String,
    pub table: String,
    pub primary_key: String,
    /// Logical connection name.
    pub connection: String,
    pub fillable: Vec<String>,
    pub guarded: Vec<String>,
    /// Attributes left out of serialized output.
    pub hidden: Vec<String>,
    pub casts: BTreeMap<String, Cast>,
    relations: BTreeMap<String, RelationDef>,
    prevent_silently_discarding: bool,
    discard_handler: Option<DiscardHandler>,
    events: BTreeMap<ModelEvent, Vec<EventHandler>>,
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("connection", &self.connection)
            .field("fillable", &self.fillable)
            .field("guarded", &self.guarded)
            .field("hidden", &self.hidden)
            .field("casts", &self.casts)
            .field("relations", &self.relations)
            .field("prevent_silently_discarding", &self.prevent_silently_discarding)
            .field("discard_handler", &self.discard_handler.is_some())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelSchema {
    /// Conventions for a type name: pluralised lower-case table, `id` key,
    /// `default` connection, every attribute guarded.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(inflect::basename(name)),
            table: inflect::table_name(name),
            primary_key: String::from("id"),
            connection: String::from(DEFAULT_CONNECTION),
            fillable: Vec::new(),
            guarded: vec![String::from("*")],
            hidden: Vec::new(),
            casts: BTreeMap::new(),
            relations: BTreeMap::new(),
            prevent_silently_discarding: true,
            discard_handler: None,
            events: BTreeMap::new(),
        }
    }

    pub fn table(&mut self, table: &str) -> &mut Self {
        self.table = String::from(table);
        self
    }

    pub fn primary_key(&mut self, column: &str) -> &mut Self {
        self.primary_key = String::from(column);
        self
    }

    pub fn connection(&mut self, name: &str) -> &mut Self {
        self.connection = String::from(name);
        self
    }

    /// Replaces the mass-assignment allow-list.
    pub fn fillable(&mut self, columns: &[&str]) -> &mut Self {
        self.fillable = columns.iter().map(|c| String::from(*c)).collect();
        self
    }

    /// Replaces the mass-assignment deny-list. `*` denies everything not
    /// allow-listed.
    pub fn guarded(&mut self, columns: &[&str]) -> &mut Self {
        self.guarded = columns.iter().map(|c| String::from(*c)).collect();
        self
    }

    pub fn hidden(&mut self, columns: &[&str]) -> &mut Self {
        self.hidden = columns.iter().map(|c| String::from(*c)).collect();
        self
    }

    pub fn cast(&mut self, column: &str, cast: Cast) -> &mut Self {
        self.casts.insert(String::from(column), cast);
        self
    }

    /// Whether mass assignment fails on rejected keys (default `true`).
    pub fn prevent_silently_discarding(&mut self, prevent: bool) -> &mut Self {
        self.prevent_silently_discarding = prevent;
        self
    }

    /// Registers a handler called with rejected keys instead of failing.
    pub fn on_discarded_attributes<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&str, &[String]) + Send + Sync + 'static,
    {
        self.discard_handler = Some(Arc::new(handler));
        self
    }

    /// Registers a lifecycle hook. Hooks on one event run in registration
    /// order; the first `false` from a cancelling event stops the rest.
    pub fn on<F>(&mut self, event: ModelEvent, handler: F) -> &mut Self
    where
        F: Fn(&mut Entity) -> bool + Send + Sync + 'static,
    {
        self.events.entry(event).or_default().push(Arc::new(handler));
        self
    }

    /// Runs the hooks registered for `event`. Returns `false` when a hook
    /// cancelled the operation.
    pub(crate) fn fire(&self, event: ModelEvent, entity: &mut Entity) -> bool {
        let Some(handlers) = self.events.get(&event) else {
            return true;
        };
        for handler in handlers {
            if !(**handler)(entity) && event.can_cancel() {
                return false;
            }
        }
        true
    }

    pub fn has_one<R: Model>(&mut self, name: &str) -> &mut RelationDef {
        self.declare::<R>(name, RelationKind::HasOne)
    }

    pub fn has_many<R: Model>(&mut self, name: &str) -> &mut RelationDef {
        self.declare::<R>(name, RelationKind::HasMany)
    }

    pub fn belongs_to<R: Model>(&mut self, name: &str) -> &mut RelationDef {
        self.declare::<R>(name, RelationKind::BelongsTo)
    }

    /// Declares a many-to-many relation through `pivot_table`.
    pub fn belongs_to_many<R: Model>(&mut self, name: &str, pivot_table: &str) -> &mut RelationDef {
        let relation = self.declare::<R>(name, RelationKind::BelongsToMany);
        relation.pivot_table = Some(String::from(pivot_table));
        relation
    }

    fn declare<R: Model>(&mut self, name: &str, kind: RelationKind) -> &mut RelationDef {
        let relation = RelationDef::new::<R>(name, kind, &self.name);
        match self.relations.entry(String::from(name)) {
            Entry::Occupied(mut entry) => {
                entry.insert(relation);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(relation),
        }
    }

    /// Looks up a declared relation.
    ///
    /// # Errors
    ///
    /// [`OrmError::RelationNotDefined`] for undeclared names.
    pub fn relation(&self, name: &str) -> Result<&RelationDef> {
        self.relations
            .get(name)
            .ok_or_else(|| OrmError::RelationNotDefined {
                model: self.name.clone(),
                relation: String::from(name),
            })
    }

    #[must_use]
    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.values()
    }

    /// Whether `key` may be mass assigned.
    #[must_use]
    pub fn is_fillable(&self, key: &str) -> bool {
        if self.fillable.iter().any(|f| f == key) {
            return true;
        }
        self.fillable.is_empty()
            && !self.guarded.is_empty()
            && !self.guarded.iter().any(|g| g == "*" || g == key)
    }

    /// Neither an allow-list nor a deny-list is declared.
    #[must_use]
    pub fn is_totally_guarded(&self) -> bool {
        self.fillable.is_empty() && self.guarded.is_empty()
    }

    #[must_use]
    pub fn is_hidden(&self, key: &str) -> bool {
        self.hidden.iter().any(|h| h == key)
    }

    #[must_use]
    pub fn cast_for(&self, key: &str) -> Option<Cast> {
        self.casts.get(key).copied()
    }

    #[must_use]
    pub const fn prevents_silently_discarding(&self) -> bool {
        self.prevent_silently_discarding
    }

    #[must_use]
    pub fn discard_handler(&self) -> Option<&DiscardHandler> {
        self.discard_handler.as_ref()
    }
}

type SchemaMap = RwLock<HashMap<TypeId, Arc<ModelSchema>>>;

static SCHEMAS: OnceLock<SchemaMap> = OnceLock::new();

/// Returns the cached schema for `M`, building it on first request.
pub(crate) fn schema_for<M: Model>() -> Arc<ModelSchema> {
    let schemas = SCHEMAS.get_or_init(SchemaMap::default);
    let id = TypeId::of::<M>();
    if let Some(schema) = schemas
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
    {
        return Arc::clone(schema);
    }

    let mut schema = ModelSchema::new(M::NAME);
    M::define(&mut schema);
    let schema = Arc::new(schema);

    let mut schemas = schemas.write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(schemas.entry(id).or_insert(schema))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::HasAttributes;

    struct Author;
    struct Book;
    struct Tag;

    impl Model for Author {
        const NAME: &'static str = "Author";

        fn define(schema: &mut ModelSchema) {
            schema.fillable(&["name"]).hidden(&["secret"]);
            schema.has_many::<Book>("books");
            schema.has_one::<Book>("latest_book").foreign_key("writer_id");
        }
    }

    impl Model for Book {
        const NAME: &'static str = "Book";

        fn define(schema: &mut ModelSchema) {
            schema.primary_key("isbn");
            schema.belongs_to::<Author>("author");
            schema.belongs_to_many::<Tag>("tags", "book_tag");
        }
    }

    impl Model for Tag {
        const NAME: &'static str = "Tag";
    }

    #[test]
    fn test_conventions() {
        let schema = ModelSchema::new("app::models::Address");
        assert_eq!(schema.name, "Address");
        assert_eq!(schema.table, "addresses");
        assert_eq!(schema.primary_key, "id");
        assert_eq!(schema.connection, "default");
        assert!(!schema.is_fillable("anything"));
        assert!(!schema.is_totally_guarded());
    }

    #[test]
    fn test_fillable_and_guarded() {
        let mut schema = ModelSchema::new("User");
        schema.fillable(&["name"]);
        assert!(schema.is_fillable("name"));
        assert!(!schema.is_fillable("role"));

        let mut open = ModelSchema::new("User");
        open.guarded(&["role"]);
        assert!(open.is_fillable("name"));
        assert!(!open.is_fillable("role"));

        let mut locked = ModelSchema::new("User");
        locked.guarded(&[]);
        assert!(locked.is_totally_guarded());
        assert!(!locked.is_fillable("name"));
    }

    #[test]
    fn test_relation_key_defaults() {
        let author = Author::schema();
        let book = Book::schema();

        let books = author.relation("books").unwrap();
        assert_eq!(books.kind(), RelationKind::HasMany);
        assert_eq!(books.foreign_key_name(), "author_id");
        assert_eq!(books.local_key_name(&author), "id");
        assert_eq!(books.related().table, "books");

        let latest = author.relation("latest_book").unwrap();
        assert_eq!(latest.foreign_key_name(), "writer_id");

        let owner = book.relation("author").unwrap();
        assert_eq!(owner.foreign_key_name(), "author_id");
        assert_eq!(owner.local_key_name(&book), "id");

        let tags = book.relation("tags").unwrap();
        assert_eq!(tags.pivot_table(), Some("book_tag"));
        assert_eq!(tags.foreign_key_name(), "book_id");
        assert_eq!(tags.related_pivot_key_name(), "tag_id");
        assert_eq!(tags.local_key_name(&book), "isbn");
        assert_eq!(tags.related_key_name(), "id");
    }

    #[test]
    fn test_undefined_relation() {
        let err = Author::schema().relation("publisher").unwrap_err();
        assert!(matches!(
            err,
            OrmError::RelationNotDefined { ref relation, .. } if relation == "publisher"
        ));
    }

    #[test]
    fn test_cancelling_events() {
        assert!(ModelEvent::Saving.can_cancel());
        assert!(ModelEvent::Deleting.can_cancel());
        assert!(!ModelEvent::Saved.can_cancel());
        assert!(!ModelEvent::Deleted.can_cancel());
    }

    #[test]
    fn test_fire_stops_at_first_veto() {
        let mut schema = ModelSchema::new("Note");
        schema
            .on(ModelEvent::Creating, |entity| {
                entity.set("checked", true).is_ok()
            })
            .on(ModelEvent::Creating, |_| false)
            .on(ModelEvent::Creating, |entity| {
                entity.set("unreachable", true).is_ok()
            })
            .on(ModelEvent::Created, |_| false);
        let schema = Arc::new(schema);

        let mut entity = Entity::new(Arc::clone(&schema));
        assert!(!schema.fire(ModelEvent::Creating, &mut entity));
        assert!(entity.attribute("checked").is_some());
        assert!(entity.attribute("unreachable").is_none());

        assert!(schema.fire(ModelEvent::Created, &mut entity));
        assert!(schema.fire(ModelEvent::Deleting, &mut entity));
    }

    #[test]
    fn test_schema_is_cached() {
        assert!(Arc::ptr_eq(&Author::schema(), &Author::schema()));
    }
}
