use serde::{Deserialize, Serialize};

/// Three-clause tag predicate: match if the question shares a tag with `any`
/// (vacuous when empty), carries every tag in `all`, and none from `exclude`.
///
/// Serialized form is the tag document stored in the subscriptions table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    #[serde(default, rename = "tags_any")]
    pub any: Vec<String>,
    #[serde(default, rename = "tags_all")]
    pub all: Vec<String>,
    #[serde(default, rename = "tags_exclude")]
    pub exclude: Vec<String>,
}

impl TagFilter {
    /// A subscription must constrain at least one clause at creation time.
    pub fn is_empty(&self) -> bool {
        self.any.is_empty() && self.all.is_empty() && self.exclude.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: i64,
    pub chat_id: i64,
    pub site_id: i64,
    pub filter: TagFilter,
}
