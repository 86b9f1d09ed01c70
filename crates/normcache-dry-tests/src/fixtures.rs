// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Article/user/comment fixtures.
//!
//! `article.author` points at a `user`; `comment.parent` points at another
//! `comment`, so the registry contains a self-referential schema.

use normcache_core::{Resource, Schema, SchemaBuilder, SchemaError, SchemaRegistry, Shape};
use normcache_fetch::Endpoint;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Base URL all fixture endpoints live under.
pub const BASE_URL: &str = "http://test.com";

/// A user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Key.
    pub id: u64,
    /// Login name.
    pub username: String,
    /// Contact address, when the payload carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Admin flag, when the payload carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
}

impl Resource for User {
    const ENTITY_TYPE: &'static str = "user";

    fn schema() -> SchemaBuilder {
        Schema::builder(Self::ENTITY_TYPE).example(json!({"id": 1}))
    }
}

/// An article with an optional nested author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Key.
    pub id: u64,
    /// Headline.
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub content: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Author, nested as a full user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
}

impl Resource for Article {
    const ENTITY_TYPE: &'static str = "article";

    fn schema() -> SchemaBuilder {
        Schema::builder(Self::ENTITY_TYPE)
            .field("author", Shape::entity(User::ENTITY_TYPE))
            .example(json!({"id": 1, "title": ""}))
    }
}

/// A threaded comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Key.
    pub id: u64,
    /// Text.
    pub body: String,
    /// Comment being replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Comment>>,
}

impl Resource for Comment {
    const ENTITY_TYPE: &'static str = "comment";

    fn schema() -> SchemaBuilder {
        Schema::builder(Self::ENTITY_TYPE)
            .field("parent", Shape::entity(Self::ENTITY_TYPE))
            .example(json!({"id": 1}))
    }
}

/// Registry holding the `user`, `article` and `comment` schemas.
///
/// # Errors
///
/// Never in practice; propagated so tests can `?` or `unwrap` it.
pub fn registry() -> Result<SchemaRegistry, SchemaError> {
    let mut registry = SchemaRegistry::new();
    registry.register_resource::<User>()?;
    registry.register_resource::<Article>()?;
    registry.register_resource::<Comment>()?;
    registry.validate()?;
    Ok(registry)
}

/// `GET /article-cooler/{id}` returning one article.
pub fn article_detail() -> Endpoint {
    Endpoint::get(format!("{BASE_URL}/article-cooler/"), Shape::entity("article"))
}

/// `GET /article-cooler/` returning a list of articles.
pub fn article_list() -> Endpoint {
    Endpoint::get(
        format!("{BASE_URL}/article-cooler/"),
        Shape::array_of(Shape::entity("article")),
    )
}

/// `PUT /article-cooler/{id}` returning the updated article.
pub fn article_update() -> Endpoint {
    Endpoint::put(format!("{BASE_URL}/article-cooler/"), Shape::entity("article"))
}

/// `DELETE /article-cooler/{id}`.
pub fn article_delete() -> Endpoint {
    Endpoint::delete(format!("{BASE_URL}/article-cooler/"))
}

/// `GET /user/` returning a list of users.
pub fn user_list() -> Endpoint {
    Endpoint::get(format!("{BASE_URL}/user/"), Shape::array_of(Shape::entity("user")))
}

/// Article 5 as returned by its detail endpoint.
pub fn article_payload() -> Value {
    json!({
        "id": 5,
        "title": "hi ho",
        "content": "whatever",
        "tags": ["a", "best", "react"],
    })
}

/// Two users.
pub fn users_payload() -> Value {
    json!([
        {"id": 23, "username": "bob", "email": "bob@bob.com", "isAdmin": false},
        {"id": 7342, "username": "lindsey", "email": "lindsey@bob.com", "isAdmin": true},
    ])
}

/// Two articles whose authors are partial copies of user 23.
pub fn nested_articles_payload() -> Value {
    json!([
        {
            "id": 5,
            "title": "hi ho",
            "content": "whatever",
            "tags": ["a", "best", "react"],
            "author": {"id": 23, "username": "bob"},
        },
        {
            "id": 3,
            "title": "the next time",
            "content": "whatever",
            "author": {"id": 23, "username": "charles", "email": "bob@bob.com"},
        },
    ])
}

/// A three-deep comment thread (3 replies to 2, which replies to 1).
pub fn comment_thread_payload() -> Value {
    json!({
        "id": 3,
        "body": "me too",
        "parent": {
            "id": 2,
            "body": "agreed",
            "parent": {"id": 1, "body": "first"},
        },
    })
}
