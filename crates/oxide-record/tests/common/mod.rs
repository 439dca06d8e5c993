//! Shared fixtures for integration tests.

#![allow(dead_code)]

use oxide_record::{attributes, Cast, ConnectionRegistry, Entity, Model, ModelSchema};

pub struct User;

impl Model for User {
    const NAME: &'static str = "User";

    fn define(schema: &mut ModelSchema) {
        schema
            .fillable(&["name", "email", "age", "active", "password"])
            .hidden(&["password"])
            .cast("age", Cast::Integer)
            .cast("active", Cast::Boolean)
            .cast("password", Cast::Hashed);
        schema.has_one::<Profile>("profile");
        schema.has_many::<Post>("posts");
        schema.belongs_to_many::<Role>("roles", "role_user");
    }
}

pub struct Profile;

impl Model for Profile {
    const NAME: &'static str = "Profile";

    fn define(schema: &mut ModelSchema) {
        schema.fillable(&["user_id", "bio"]);
        schema.belongs_to::<User>("user");
    }
}

pub struct Post;

impl Model for Post {
    const NAME: &'static str = "Post";

    fn define(schema: &mut ModelSchema) {
        schema.fillable(&["user_id", "title", "views"]);
        schema.belongs_to::<User>("author").foreign_key("user_id");
    }
}

pub struct Role;

impl Model for Role {
    const NAME: &'static str = "Role";

    fn define(schema: &mut ModelSchema) {
        schema.fillable(&["name"]);
        schema.belongs_to_many::<User>("users", "role_user");
    }
}

pub const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT,
        age INTEGER,
        active BOOLEAN NOT NULL DEFAULT 1,
        password TEXT
    );
    CREATE TABLE profiles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        bio TEXT
    );
    CREATE TABLE posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER,
        title TEXT NOT NULL,
        views INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL
    );
    CREATE TABLE role_user (
        user_id INTEGER NOT NULL,
        role_id INTEGER NOT NULL
    );
";

/// A fresh in-memory database with the fixture tables.
pub async fn setup() -> ConnectionRegistry {
    let db = ConnectionRegistry::in_memory();
    db.connection("default")
        .await
        .unwrap()
        .execute_script(SCHEMA)
        .await
        .unwrap();
    db
}

/// Statements executed so far on the default connection.
pub async fn statements(db: &ConnectionRegistry) -> u64 {
    db.connection("default").await.unwrap().statement_count()
}

pub async fn user(db: &ConnectionRegistry, name: &str, age: i64) -> Entity {
    User::create(db, attributes! { "name" => name, "age" => age })
        .await
        .unwrap()
}

pub async fn post(db: &ConnectionRegistry, author: &Entity, title: &str) -> Entity {
    Post::create(
        db,
        attributes! { "user_id" => author.key().cloned(), "title" => title },
    )
    .await
    .unwrap()
}

/// Links `user` and `role` through the pivot table.
pub async fn attach(db: &ConnectionRegistry, user: &Entity, role: &Entity) {
    let pivot = db.connection("default").await.unwrap();
    let stmt = oxide_record::Query::new("role_user").compile_insert(&attributes! {
        "user_id" => user.key().cloned(),
        "role_id" => role.key().cloned(),
    });
    pivot.execute(&stmt).await.unwrap();
}
