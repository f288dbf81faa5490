// src/types/profile.rs
//! Relevance profile ("success persona") used to score postings

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceProfile {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub preferred_industries: Vec<String>,
    #[serde(default)]
    pub avoid_keywords: Vec<String>,
    #[serde(default)]
    pub experience_level: String,
    #[serde(default)]
    pub core_skills: Vec<String>,
    #[serde(default)]
    pub cultural_fit: String,
    pub scoring_rubric: String,
}

impl RelevanceProfile {
    /// A profile without a rubric cannot drive scoring
    pub fn validate(&self) -> Result<()> {
        if self.scoring_rubric.trim().is_empty() {
            anyhow::bail!("Relevance profile has an empty scoring rubric");
        }
        Ok(())
    }

    /// Pretty JSON embedded into scoring prompts
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.scoring_rubric.clone())
    }
}
