// src/pipeline/profile.rs
//! Current relevance profile and the builder that derives it from the
//! candidate's documents and past feedback

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::FsOps;
use crate::llm::{parse_payload, Completion};
use crate::types::{JobRecord, RelevanceProfile};

/// Per-document cap on the text sent for profile building
pub const MAX_DOCUMENT_CHARS: usize = 10_000;
pub const CV_DIR: &str = "cv";
pub const INTERVIEWS_DIR: &str = "interviews";

/// Holds the profile readers score against.
///
/// A rebuild swaps in a complete new profile; readers hold an `Arc` to
/// whichever version was current when they asked.
pub struct ProfileStore {
    path: Option<PathBuf>,
    current: RwLock<Option<Arc<RelevanceProfile>>>,
}

impl ProfileStore {
    pub fn in_memory(profile: Option<RelevanceProfile>) -> Self {
        Self {
            path: None,
            current: RwLock::new(profile.map(Arc::new)),
        }
    }

    /// Load the persisted profile, if any. An invalid file is ignored.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let profile = if path.exists() {
            let raw = FsOps::read_file_safe(&path).await?;
            match serde_json::from_str::<RelevanceProfile>(&raw)
                .map_err(anyhow::Error::from)
                .and_then(|p| p.validate().map(|_| p))
            {
                Ok(profile) => {
                    info!("Loaded relevance profile from {}", path.display());
                    Some(Arc::new(profile))
                }
                Err(e) => {
                    warn!(
                        "Ignoring invalid relevance profile at {}: {:#}",
                        path.display(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            path: Some(path),
            current: RwLock::new(profile),
        })
    }

    pub fn current(&self) -> Option<Arc<RelevanceProfile>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Persist and install a new profile
    pub async fn replace(&self, profile: RelevanceProfile) -> Result<Arc<RelevanceProfile>> {
        profile.validate()?;

        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(&profile)
                .context("Failed to serialize relevance profile")?;
            FsOps::write_file_atomic(path, &json).await?;
        }

        let profile = Arc::new(profile);
        match self.current.write() {
            Ok(mut guard) => *guard = Some(profile.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(profile.clone()),
        }
        Ok(profile)
    }

    /// Derive a fresh profile from `documents_dir` and user feedback, then
    /// install it. On any failure the previous profile stays current.
    pub async fn rebuild(
        &self,
        completion: &dyn Completion,
        documents_dir: &Path,
        feedback: &[JobRecord],
        timeout: Duration,
    ) -> Result<Arc<RelevanceProfile>> {
        let cv = FsOps::read_dir_texts(&documents_dir.join(CV_DIR)).await?;
        let interviews = FsOps::read_dir_texts(&documents_dir.join(INTERVIEWS_DIR)).await?;
        if cv.trim().is_empty() && interviews.trim().is_empty() {
            anyhow::bail!(
                "No candidate documents found under {}",
                documents_dir.display()
            );
        }

        let prompt = profile_prompt(&cv, &interviews, &feedback_digest(feedback));
        let response = tokio::time::timeout(timeout, completion.complete(&prompt))
            .await
            .with_context(|| format!("Profile request timed out after {}s", timeout.as_secs()))?
            .context("Profile request failed")?;

        let profile: RelevanceProfile =
            parse_payload(&response).context("Profile response was not valid JSON")?;
        let profile = self.replace(profile).await?;
        info!("Relevance profile rebuilt");
        Ok(profile)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Summary of user-labelled postings, one line each
pub fn feedback_digest(jobs: &[JobRecord]) -> String {
    jobs.iter()
        .filter_map(|job| {
            let feedback = job.user_feedback.as_deref().unwrap_or("").trim();
            let remarks = job.user_remarks.as_deref().unwrap_or("").trim();
            if feedback.is_empty() && remarks.is_empty() {
                return None;
            }

            let mut line = format!(
                "- Job: {} at {} (score {})",
                job.title, job.company, job.match_score
            );
            if !feedback.is_empty() {
                line.push_str(&format!(" | Feedback: {}", feedback));
            }
            if !remarks.is_empty() {
                line.push_str(&format!(" | Remarks: {}", remarks));
            }
            Some(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn profile_prompt(cv: &str, interviews: &str, feedback: &str) -> String {
    let feedback_section = if feedback.is_empty() {
        String::new()
    } else {
        format!(
            "\nUser Feedback on Past Job Matches (use this to refine the persona):\n{}\n",
            feedback
        )
    };

    format!(
        r#"Analyze the following CV and Job Interview history to create a "Success Persona" for job hunting.
Focus on identifying:
1. Core strengths and skills.
2. Industries where the candidate has high success probability.
3. Specific keywords that indicate a good match.
4. Red flags or things to avoid based on interview feedback.
5. A scoring rubric for evaluating new job postings.

CV Content:
{cv}

Interview History:
{interviews}
{feedback}
Return the persona as a JSON object with the following keys:
- keywords: List of strings
- preferred_industries: List of strings
- avoid_keywords: List of strings
- experience_level: String
- core_skills: List of strings
- cultural_fit: String
- scoring_rubric: String describing how to score a job from 0-100"#,
        cv = truncate_chars(cv, MAX_DOCUMENT_CHARS),
        interviews = truncate_chars(interviews, MAX_DOCUMENT_CHARS),
        feedback = feedback_section,
    )
}
