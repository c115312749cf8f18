use dal_unit_of_work::Entity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sample Blog entity for testing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blog {
    pub id: Uuid,
    pub name: String,
    pub rating: i32,
}

impl Blog {
    pub fn new(name: &str, rating: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            rating,
        }
    }
}

impl Entity for Blog {
    type Key = Uuid;
    const SET: &'static str = "blogs";

    fn key(&self) -> Uuid {
        self.id
    }
}

/// Sample Post entity for testing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub blog_id: Uuid,
    pub title: String,
}

impl Post {
    pub fn new(blog_id: Uuid, title: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            blog_id,
            title: title.to_string(),
        }
    }
}

impl Entity for Post {
    type Key = Uuid;
    const SET: &'static str = "posts";

    fn key(&self) -> Uuid {
        self.id
    }
}
