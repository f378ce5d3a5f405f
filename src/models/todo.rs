use serde::{Deserialize, Serialize};

/// A record as held by the store. Owned by exactly one user; ownership is
/// enforced server-side, the client only ever sees its own records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    #[serde(rename = "imageKey", skip_serializing_if = "Option::is_none", default)]
    pub image_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTodo {
    pub content: String,
    #[serde(rename = "imageKey", skip_serializing_if = "Option::is_none", default)]
    pub image_key: Option<String>,
}

/// One live-query emission: the full current set of the caller's records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEmission {
    pub items: Vec<Todo>,
}

/// A [`Todo`] plus its display URL, recomputed on every emission. The URL is
/// empty when the record has no image or resolution failed; it is never
/// cached across emissions.
#[derive(Debug, Clone, PartialEq)]
pub struct TodoWithImageUrl {
    pub todo: Todo,
    pub image_url: String,
}

/// A file the user picked to attach to a new record.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}
