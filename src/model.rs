use serde::Serialize;

/// One catalog entry. `link` is the identity key within a query scope;
/// everything else degrades to a documented default during extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Book {
    pub link: String,
    pub title: String,
    pub author: String,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    pub num_ratings: u64,
}

pub const UNKNOWN_AUTHOR: &str = "Unknown";
pub const UNKNOWN_FORMAT: &str = "Unknown";

impl Book {
    pub fn new(link: String, title: String) -> Self {
        Self {
            link,
            title,
            author: UNKNOWN_AUTHOR.to_owned(),
            format: UNKNOWN_FORMAT.to_owned(),
            pub_year: None,
            rating: None,
            num_ratings: 0,
        }
    }
}
