use super::*;
use serde::Deserialize;

/// HTTP adapter for a jService-compatible trivia API (`GET {base}/api/random`)
pub struct JServiceSource {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl JServiceSource {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JServiceCategory {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JServiceClue {
    id: Option<i64>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    category: Option<JServiceCategory>,
}

impl From<JServiceClue> for CandidateEntry {
    fn from(clue: JServiceClue) -> Self {
        Self {
            id: clue.id,
            category: clue.category.and_then(|c| c.title),
            clue: clue.question.unwrap_or_default(),
            answer: clue.answer.unwrap_or_default(),
            value: clue.value,
        }
    }
}

/// The API answers with an array holding a single clue
fn parse_random_response(body: &str) -> SourceResult<CandidateEntry> {
    let clues: Vec<JServiceClue> =
        serde_json::from_str(body).map_err(|e| SourceError::Parse(e.to_string()))?;
    clues
        .into_iter()
        .next()
        .map(CandidateEntry::from)
        .ok_or(SourceError::Empty)
}

#[async_trait]
impl EntrySource for JServiceSource {
    async fn fetch_random_entry(&self) -> SourceResult<CandidateEntry> {
        let url = format!("{}/api/random", self.base_url);

        let response = tokio::time::timeout(self.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| SourceError::Timeout(self.timeout))?
            .map_err(|e| SourceError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;
        if body.trim().is_empty() {
            return Err(SourceError::Empty);
        }

        parse_random_response(&body)
    }

    fn name(&self) -> &str {
        "jservice"
    }
}
