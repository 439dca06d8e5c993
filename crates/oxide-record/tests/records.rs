//! Persistence, query execution and mass assignment against SQLite.

mod common;

use std::sync::Mutex;

use common::{post, setup, statements, user, Post, User};
use oxide_record::{
    attributes, EntityState, HasAttributes, Model, ModelEvent, ModelSchema, OrmError, Property,
    QueryError, Value,
};

static EVENTS: Mutex<Vec<(String, ModelEvent)>> = Mutex::new(Vec::new());

/// Users seen through lifecycle hooks: records every event, defaults the
/// email, refuses to create `blocked` and to delete anyone aged 99.
struct Account;

impl Model for Account {
    const NAME: &'static str = "Account";

    fn define(schema: &mut ModelSchema) {
        schema.table("users").fillable(&["name", "email", "age"]);
        for event in [
            ModelEvent::Saving,
            ModelEvent::Creating,
            ModelEvent::Created,
            ModelEvent::Updating,
            ModelEvent::Updated,
            ModelEvent::Saved,
            ModelEvent::Deleting,
            ModelEvent::Deleted,
        ] {
            schema.on(event, move |entity| {
                let name = entity
                    .attribute("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                EVENTS.lock().unwrap().push((name, event));
                true
            });
        }
        schema
            .on(ModelEvent::Saving, |entity| {
                entity.attribute("email").is_some()
                    || entity.set("email", "unset@example.com").is_ok()
            })
            .on(ModelEvent::Creating, |entity| {
                entity.attribute("name") != Some(&Value::from("blocked"))
            })
            .on(ModelEvent::Deleting, |entity| {
                entity.attribute("age") != Some(&Value::Int(99))
            });
    }
}

fn events_for(name: &str) -> Vec<ModelEvent> {
    EVENTS
        .lock()
        .unwrap()
        .iter()
        .filter(|(owner, _)| owner == name)
        .map(|(_, event)| *event)
        .collect()
}

#[tokio::test]
async fn test_create_then_find_round_trip() {
    let db = setup().await;
    let ada = User::create(&db, attributes! { "name" => "Ada", "age" => "36" })
        .await
        .unwrap();
    assert_eq!(ada.state(), EntityState::Persisted);
    let id = ada.key().cloned().unwrap();

    let found = User::find(&db, id).await.unwrap().unwrap();
    assert_eq!(found.get("name").unwrap(), &Value::from("Ada"));
    assert_eq!(found.get("age").unwrap(), &Value::Int(36));
    assert_eq!(found.get("active").unwrap(), &Value::Bool(true));
    assert!(!found.is_dirty());
}

#[tokio::test]
async fn test_find_missing_row() {
    let db = setup().await;
    assert!(User::find(&db, 404).await.unwrap().is_none());

    let err = User::find_or_fail(&db, 404).await.unwrap_err();
    assert!(matches!(err, OrmError::RecordNotFound { ref model, .. } if model == "User"));
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_mass_assignment_names_rejected_key() {
    let db = setup().await;
    let err = User::create(&db, attributes! { "name" => "Eve", "role" => "admin" })
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::MassAssignment { ref keys, .. } if keys == &vec![String::from("role")]));
    assert!(err.to_string().contains("role"));
    assert_eq!(User::query(&db).count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fill_is_idempotent() {
    let db = setup().await;
    let mut ada = user(&db, "Ada", 36).await;
    let attrs = attributes! { "name" => "Ada L.", "age" => 37 };
    ada.fill(attrs.clone()).unwrap();
    let once = ada.attributes().clone();
    ada.fill(attrs).unwrap();
    assert_eq!(ada.attributes(), &once);
    assert!(ada.is_attribute_dirty("name"));
    assert!(ada.is_attribute_dirty("age"));
    assert!(!ada.is_attribute_dirty("id"));
}

#[tokio::test]
async fn test_update_requires_filter() {
    let db = setup().await;
    user(&db, "Ada", 36).await;
    user(&db, "Bob", 17).await;

    let err = User::query(&db)
        .update(attributes! { "name" => "everyone" })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrmError::Query(QueryError::MissingWhereClause { ref table }) if table == "users"
    ));

    let minors = User::query(&db)
        .filter("age", "<", 18)
        .unwrap()
        .update(attributes! { "active" => false })
        .await
        .unwrap();
    assert_eq!(minors, 1);
    assert_eq!(
        User::filter_eq(&db, "active", false).count().await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_save_updates_existing_row() {
    let db = setup().await;
    let mut ada = user(&db, "Ada", 36).await;
    let before = statements(&db).await;
    ada.set("age", 40).unwrap();
    ada.save(&db).await.unwrap();
    assert_eq!(statements(&db).await, before + 1);
    assert!(!ada.is_dirty());

    let stored = User::find_or_fail(&db, ada.key().cloned()).await.unwrap();
    assert_eq!(stored.get("age").unwrap(), &Value::Int(40));
    assert_eq!(User::query(&db).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_save_without_loaded_key_never_inserts() {
    let db = setup().await;
    user(&db, "Ada", 36).await;
    let mut partial = User::query(&db)
        .select(&["name"])
        .first()
        .await
        .unwrap()
        .unwrap();
    assert!(partial.exists());
    assert!(partial.key().is_none());

    partial.set("name", "Zed").unwrap();
    let before = statements(&db).await;
    assert!(matches!(
        partial.save(&db).await,
        Err(OrmError::MissingPrimaryKey { .. })
    ));
    assert_eq!(statements(&db).await, before);
    assert_eq!(User::query(&db).count().await.unwrap(), 1);
    assert_eq!(
        User::query(&db).value("name").await.unwrap(),
        Some(Value::from("Ada"))
    );
}

#[tokio::test]
async fn test_entity_update_and_refresh() {
    let db = setup().await;
    let mut ada = user(&db, "Ada", 36).await;
    let mut copy = User::find_or_fail(&db, ada.key().cloned()).await.unwrap();

    ada.update(&db, attributes! { "email" => "ada@example.com" })
        .await
        .unwrap();
    assert_eq!(copy.get("email").unwrap(), &Value::Null);
    copy.refresh(&db).await.unwrap();
    assert_eq!(copy.get("email").unwrap(), &Value::from("ada@example.com"));

    let mut transient = User::make(attributes! { "name" => "Tmp" }).unwrap();
    assert!(matches!(
        transient.update(&db, attributes! { "age" => 1 }).await,
        Err(OrmError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_delete_is_terminal() {
    let db = setup().await;
    let mut ada = user(&db, "Ada", 36).await;
    assert!(ada.delete(&db).await.unwrap());
    assert_eq!(ada.state(), EntityState::Deleted);
    assert!(User::find(&db, ada.key().cloned()).await.unwrap().is_none());
    assert!(matches!(ada.save(&db).await, Err(OrmError::InvalidState(_))));

    let before = statements(&db).await;
    assert!(matches!(ada.delete(&db).await, Err(OrmError::InvalidState(_))));
    assert_eq!(statements(&db).await, before);

    let mut transient = User::make(attributes! { "name" => "Tmp" }).unwrap();
    assert!(matches!(
        transient.delete(&db).await,
        Err(OrmError::MissingPrimaryKey { .. })
    ));
}

#[tokio::test]
async fn test_bulk_delete_with_and_without_filters() {
    let db = setup().await;
    user(&db, "Ada", 36).await;
    user(&db, "Bob", 17).await;
    user(&db, "Cyd", 52).await;

    let removed = User::query(&db)
        .filter("age", ">", 50)
        .unwrap()
        .delete()
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(User::query(&db).delete().await.unwrap(), 2);
}

#[tokio::test]
async fn test_destroy_by_keys() {
    let db = setup().await;
    let ada = user(&db, "Ada", 36).await;
    user(&db, "Bob", 17).await;
    let cyd = user(&db, "Cyd", 52).await;

    let removed = User::destroy(&db, [ada.key().cloned(), cyd.key().cloned()])
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(User::query(&db).pluck("name").await.unwrap().len(), 1);
    assert_eq!(User::destroy(&db, Vec::<i64>::new()).await.unwrap(), 0);
    assert_eq!(User::query(&db).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_joined_rows_keep_their_own_key() {
    let db = setup().await;
    user(&db, "Ada", 36).await;
    let bob = user(&db, "Bob", 17).await;
    post(&db, &bob, "Only post").await;

    let authors = User::query(&db)
        .join_on("posts", "posts.user_id", "users.id")
        .get()
        .await
        .unwrap();
    assert_eq!(authors.len(), 1);
    assert_eq!(authors[0].key(), bob.key());
    assert!(authors[0].attribute("title").is_none());
}

#[tokio::test]
async fn test_lifecycle_hooks_run_in_order() {
    let db = setup().await;
    let mut grace = Account::create(&db, attributes! { "name" => "Grace", "age" => 45 })
        .await
        .unwrap();
    assert!(grace.exists());
    assert_eq!(grace.get("email").unwrap(), &Value::from("unset@example.com"));
    let stored = Account::find_or_fail(&db, grace.key().cloned()).await.unwrap();
    assert_eq!(stored.get("email").unwrap(), &Value::from("unset@example.com"));

    grace.set("age", 46).unwrap();
    assert!(grace.save(&db).await.unwrap());
    assert!(grace.delete(&db).await.unwrap());

    assert_eq!(
        events_for("Grace"),
        vec![
            ModelEvent::Saving,
            ModelEvent::Creating,
            ModelEvent::Created,
            ModelEvent::Saved,
            ModelEvent::Saving,
            ModelEvent::Updating,
            ModelEvent::Updated,
            ModelEvent::Saved,
            ModelEvent::Deleting,
            ModelEvent::Deleted,
        ]
    );
}

#[tokio::test]
async fn test_cancelling_hooks_skip_the_statement() {
    let db = setup().await;
    let before = statements(&db).await;
    let blocked = Account::create(&db, attributes! { "name" => "blocked" })
        .await
        .unwrap();
    assert_eq!(blocked.state(), EntityState::Transient);
    assert_eq!(statements(&db).await, before);
    assert_eq!(
        events_for("blocked"),
        vec![ModelEvent::Saving, ModelEvent::Creating]
    );

    let mut keeper = Account::create(&db, attributes! { "name" => "Keeper", "age" => 99 })
        .await
        .unwrap();
    let before = statements(&db).await;
    assert!(!keeper.delete(&db).await.unwrap());
    assert_eq!(statements(&db).await, before);
    assert_eq!(keeper.state(), EntityState::Persisted);
    assert_eq!(Account::query(&db).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_first_or_create_and_update_or_create() {
    let db = setup().await;
    let first = User::first_or_create(
        &db,
        attributes! { "email" => "ada@example.com" },
        attributes! { "name" => "Ada" },
    )
    .await
    .unwrap();
    let again = User::first_or_create(
        &db,
        attributes! { "email" => "ada@example.com" },
        attributes! { "name" => "Someone else" },
    )
    .await
    .unwrap();
    assert_eq!(first.key(), again.key());
    assert_eq!(again.get("name").unwrap(), &Value::from("Ada"));

    let updated = User::update_or_create(
        &db,
        attributes! { "email" => "ada@example.com" },
        attributes! { "name" => "Ada L." },
    )
    .await
    .unwrap();
    assert_eq!(updated.key(), first.key());
    let created = User::update_or_create(
        &db,
        attributes! { "email" => "bob@example.com" },
        attributes! { "name" => "Bob" },
    )
    .await
    .unwrap();
    assert_ne!(created.key(), first.key());

    let names = User::query(&db).order_by_asc("id").pluck("name").await.unwrap();
    assert_eq!(names.into_vec(), vec![Value::from("Ada L."), Value::from("Bob")]);
}

#[tokio::test]
async fn test_aggregates() {
    let db = setup().await;
    for (name, age) in [("Ada", 36), ("Bob", 17), ("Cyd", 52)] {
        user(&db, name, age).await;
    }
    let users = User::query(&db);
    assert_eq!(users.count().await.unwrap(), 3);
    assert_eq!(users.max("age").await.unwrap(), Value::Int(52));
    assert_eq!(users.min("age").await.unwrap(), Value::Int(17));
    assert_eq!(users.sum("age").await.unwrap().as_i64(), Some(105));
    assert_eq!(users.avg("age").await.unwrap().as_f64(), Some(35.0));

    let adults = User::query(&db).filter("age", ">=", 18).unwrap().take(1);
    assert_eq!(adults.count().await.unwrap(), 2);
    assert_eq!(User::filter_eq(&db, "name", "Nobody").max("age").await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_value_pluck_and_exists() {
    let db = setup().await;
    user(&db, "Ada", 36).await;
    user(&db, "Bob", 17).await;

    let oldest = User::query(&db).latest("age").value("name").await.unwrap();
    assert_eq!(oldest, Some(Value::from("Ada")));
    assert_eq!(
        User::filter_eq(&db, "name", "Nobody").value("name").await.unwrap(),
        None
    );
    assert!(User::filter_eq(&db, "name", "Bob").exists().await.unwrap());
    assert!(!User::filter_eq(&db, "name", "Cyd").exists().await.unwrap());

    let ages = User::query(&db).oldest("age").pluck("age").await.unwrap();
    assert_eq!(ages.into_vec(), vec![Value::Int(17), Value::Int(36)]);
}

#[tokio::test]
async fn test_filters_against_stored_rows() {
    let db = setup().await;
    for (name, age) in [("Ada", 36), ("Bob", 17), ("Cyd", 52), ("Dee", 29)] {
        user(&db, name, age).await;
    }

    let grouped = User::query(&db)
        .filter("age", ">", 20)
        .unwrap()
        .filter_nested(|q| Ok(q.filter_eq("name", "Ada").or_filter_eq("name", "Bob")))
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(grouped.pluck("name").into_vec(), vec![Value::from("Ada")]);

    let listed = User::query(&db)
        .filter("name", "in", vec!["Bob", "Dee"])
        .unwrap()
        .order_by("age", "desc")
        .unwrap()
        .pluck("name")
        .await
        .unwrap();
    assert_eq!(listed.into_vec(), vec![Value::from("Dee"), Value::from("Bob")]);

    let none = User::query(&db)
        .filter_in("name", Vec::<Value>::new())
        .get()
        .await
        .unwrap();
    assert!(none.is_empty());

    let paged = User::query(&db)
        .order_by_asc("age")
        .skip(1)
        .take(2)
        .pluck("name")
        .await
        .unwrap();
    assert_eq!(paged.into_vec(), vec![Value::from("Dee"), Value::from("Ada")]);

    let like = User::query(&db)
        .filter("name", "like", "%y%")
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(like, 1);
}

#[tokio::test]
async fn test_hostile_values_stay_bound() {
    let db = setup().await;
    let hostile = "'; DROP TABLE users; --";
    user(&db, hostile, 1).await;
    let found = User::filter_eq(&db, "name", hostile).first().await.unwrap().unwrap();
    assert_eq!(found.get("name").unwrap(), &Value::from(hostile));
    assert_eq!(User::query(&db).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_hashed_password_and_hidden_serialization() {
    let db = setup().await;
    let ada = User::create(&db, attributes! { "name" => "Ada", "password" => "s3cret" })
        .await
        .unwrap();
    let stored = User::find_or_fail(&db, ada.key().cloned()).await.unwrap();
    assert_ne!(stored.get("password").unwrap(), &Value::from("s3cret"));
    assert!(stored.check_secret("password", "s3cret"));

    let json = serde_json::to_value(&stored).unwrap();
    assert!(json.get("password").is_none());
    assert_eq!(json["name"], "Ada");
}

#[tokio::test]
async fn test_resolve_prefers_relations_then_attributes() {
    let db = setup().await;
    let ada = user(&db, "Ada", 36).await;
    post(&db, &ada, "Notes").await;

    let mut loaded = User::find_or_fail(&db, ada.key().cloned()).await.unwrap();
    match loaded.resolve(&db, "posts").await.unwrap() {
        Property::Relation(related) => assert_eq!(related.as_many().unwrap().len(), 1),
        Property::Attribute(value) => panic!("expected relation, got {value:?}"),
    }
    assert!(loaded.relation_loaded("posts"));

    let before = statements(&db).await;
    loaded.resolve(&db, "posts").await.unwrap();
    assert_eq!(statements(&db).await, before);

    assert!(matches!(
        loaded.resolve(&db, "name").await.unwrap(),
        Property::Attribute(Value::Text(ref name)) if name == "Ada"
    ));
    assert!(matches!(
        loaded.resolve(&db, "nickname").await,
        Err(OrmError::PropertyNotFound { .. })
    ));
}

#[tokio::test]
async fn test_unknown_connection() {
    struct Archived;

    impl Model for Archived {
        const NAME: &'static str = "Archived";

        fn define(schema: &mut oxide_record::ModelSchema) {
            schema.connection("archive");
        }
    }

    let db = setup().await;
    let err = Archived::all(&db).await.unwrap_err();
    assert!(matches!(err, OrmError::ConnectionUnavailable { ref name, .. } if name == "archive"));
    assert_eq!(Post::query(&db).count().await.unwrap(), 0);
}
