use crate::model::{Id, location::Location};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

/// A post as stored in the search index and returned by searches.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Post {
    pub user: String,
    pub message: String,
    pub location: Location,
    pub url: String,
}

/// A post together with the id it was indexed under.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct IndexedPost {
    pub id: Id<PostMarker>,
    #[serde(flatten)]
    pub post: Post,
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        location::Location,
        post::{IndexedPost, Post},
    };
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn post_document_shape() {
        let post = Post {
            user: "alice".to_owned(),
            message: "hi".to_owned(),
            location: Location { lat: 37.0, lon: -122.0 },
            url: "https://example.com/image".to_owned(),
        };

        assert_eq!(
            serde_json::to_value(&post).unwrap(),
            json!({
                "user": "alice",
                "message": "hi",
                "location": { "lat": 37.0, "lon": -122.0 },
                "url": "https://example.com/image",
            })
        );
    }

    #[test]
    fn indexed_post_flattens_post() {
        let indexed = IndexedPost {
            id: Id::new(Uuid::nil()),
            post: Post::default(),
        };

        let value = serde_json::to_value(&indexed).unwrap();
        assert_eq!(value["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(value["user"], "");
        assert_eq!(value["location"], json!({ "lat": 0.0, "lon": 0.0 }));
    }
}
