use serde::Deserialize;

/// An unanswered question as returned by the source API. Transient: questions
/// are matched and delivered within a single polling cycle, never persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct Question {
    pub question_id: i64,
    pub title: String,
    pub link: String,
    pub creation_date: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}
