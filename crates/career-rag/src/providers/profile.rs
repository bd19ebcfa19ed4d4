//! Career-assessment profile lookup used to enrich chat turns

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Supplies a short structured summary of the user for answer prompts
#[async_trait]
pub trait ProfileContextProvider: Send + Sync {
    /// Profile summary for a user, `None` when nothing is known
    async fn context_for(&self, user_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IloResult {
    #[serde(default)]
    pub top_domains: Vec<String>,
    #[serde(default)]
    pub suggested_careers: Vec<String>,
    #[serde(default)]
    pub scores: Vec<IloDomainScore>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IloDomainScore {
    pub domain_code: String,
    pub percent: f64,
}

impl IloResult {
    /// Render as "User ILO profile: Top domains: ... Suggested careers: ... Domain scores: ..."
    pub fn summary(&self) -> Option<String> {
        if self.top_domains.is_empty() && self.suggested_careers.is_empty() && self.scores.is_empty() {
            return None;
        }

        let mut out = String::from("User ILO profile: ");
        if !self.top_domains.is_empty() {
            out.push_str(&format!("Top domains: {}. ", self.top_domains.join(", ")));
        }
        if !self.suggested_careers.is_empty() {
            out.push_str(&format!(
                "Suggested careers: {}. ",
                self.suggested_careers.join(", ")
            ));
        }
        if !self.scores.is_empty() {
            let scores: Vec<String> = self
                .scores
                .iter()
                .map(|s| format!("{}:{:.0}%", s.domain_code, s.percent))
                .collect();
            out.push_str(&format!("Domain scores: {}. ", scores.join(", ")));
        }
        Some(out.trim_end().to_string())
    }
}

/// Fetches the latest ILO test result from the profile service
pub struct IloProfileClient {
    client: reqwest::Client,
    base_url: String,
}

impl IloProfileClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProfileContextProvider for IloProfileClient {
    async fn context_for(&self, user_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!("{}/api/v1/ilo/results", self.base_url))
            .query(&[("user_id", user_id)])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::internal(format!(
                "Profile lookup failed: HTTP {}",
                response.status()
            )));
        }

        let result: IloResult = response.json().await?;
        Ok(result.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_rendering() {
        let result: IloResult = serde_json::from_str(
            r#"{
                "topDomains": ["Investigative", "Realistic"],
                "suggestedCareers": ["Software Engineer"],
                "scores": [{"domainCode": "I", "percent": 80.4}, {"domainCode": "R", "percent": 65}]
            }"#,
        )
        .unwrap();

        assert_eq!(
            result.summary().unwrap(),
            "User ILO profile: Top domains: Investigative, Realistic. \
             Suggested careers: Software Engineer. Domain scores: I:80%, R:65%."
        );
    }

    #[test]
    fn test_empty_result_has_no_summary() {
        assert!(IloResult::default().summary().is_none());
    }
}
