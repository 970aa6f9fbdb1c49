use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Missing and `null` fields are treated as empty and rejected by validation
#[derive(Deserialize, ToSchema)]
pub(crate) struct SimilarityRequest {
    #[serde(default)]
    #[schema(nullable = true, example = "What is Deep Learning?")]
    pub query: Option<String>,
    #[serde(default)]
    #[schema(nullable = true, example = json!(["Deep Learning is ...", "Pasta is ..."]))]
    pub documents: Option<Vec<String>>,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct Match {
    #[schema(example = "Deep Learning is ...")]
    pub document: String,
    #[schema(example = "0.87")]
    pub similarity: f32,
}

/// Documents ordered by descending similarity
#[derive(Serialize, ToSchema)]
pub(crate) struct SimilarityResponse {
    pub best_matches: Vec<Match>,
}
