//! Multi-step analysis of the conversation corpus.
//!
//! An [`Analyzer`] answers one open-ended question in stages:
//!
//! 1. **Decompose** the question into search queries and an analysis prompt.
//! 2. **Gather** sessions, either the ones the caller named or those the
//!    search queries hit.
//! 3. **Plan** one [`AnalysisTask`] per chunk. Tasks never mix sessions.
//! 4. **Execute** tasks on a bounded worker pool. A failed task becomes a
//!    failed [`TaskFinding`]; the run continues with the rest.
//! 5. **Synthesize** the successful findings into one summary, keeping the
//!    per-session findings alongside it.
//!
//! Cancellation is observed at every stage boundary and at the start and end
//! of each task. A cancelled run returns [`Error::Cancelled`] carrying the
//! findings that had already completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunk;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::get;
use crate::models::Session;
use crate::pattern::ProjectPattern;
use crate::persistence;
use crate::progress::{AnalysisStage, ProgressEvent, ProgressReporter};
use crate::reasoning::{
    complete_with_retry, CompletionRequest, ReasoningService, RetryPolicy, ServiceError,
};
use crate::search::{self, SearchFilter};

const DECOMPOSE_SYSTEM: &str = r#"You are a query analyzer for a search system over coding-assistant conversation transcripts.

Given a user's question about their conversation history:
1. Generate 3-5 specific search queries (keywords or short phrases, not sentences; include synonyms).
2. Write a detailed analysis prompt capturing the user's intent.
3. Decide whether answering requires comparing sessions or projects.

Respond with JSON only, in exactly this shape:
{"search_queries": ["..."], "analysis_prompt": "...", "comparison_needed": false}"#;

const SPECIALIST_SYSTEM: &str = r#"You are an analyst of coding-assistant conversation transcripts.

You receive one excerpt of a single session and a question. Answer from the excerpt only:
cite concrete examples (files, commands, decisions, errors) and say plainly when the
excerpt holds nothing relevant."#;

const SYNTHESIS_SYSTEM: &str = r#"You combine findings produced independently from several conversation excerpts
into one coherent answer. Keep concrete examples, note where sessions agree or differ,
and do not invent details that no finding mentions."#;

const DECOMPOSE_MAX_TOKENS: u32 = 1024;
const SEARCH_LIMIT_PER_PROJECT: i64 = 20;
const SEARCH_LIMIT_GLOBAL: i64 = 30;

/// A question broken into search terms and an analysis prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomposedQuery {
    pub original_query: String,
    pub search_queries: Vec<String>,
    pub analysis_prompt: String,
    pub comparison_needed: bool,
}

impl DecomposedQuery {
    /// Used whenever the service cannot produce a usable decomposition.
    pub fn fallback(query: &str, projects: &[String]) -> Self {
        Self {
            original_query: query.to_string(),
            search_queries: vec![query.to_string()],
            analysis_prompt: query.to_string(),
            comparison_needed: projects.len() > 1,
        }
    }

    /// Parse the first JSON object embedded in a service reply.
    pub fn from_reply(query: &str, projects: &[String], reply: &str) -> Option<Self> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default)]
            search_queries: Vec<String>,
            #[serde(default)]
            analysis_prompt: Option<String>,
            #[serde(default)]
            comparison_needed: Option<bool>,
        }

        let start = reply.find('{')?;
        let end = reply.rfind('}')?;
        if end <= start {
            return None;
        }
        let parsed: Reply = serde_json::from_str(&reply[start..=end]).ok()?;

        let search_queries: Vec<String> = parsed
            .search_queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        Some(Self {
            original_query: query.to_string(),
            search_queries: if search_queries.is_empty() {
                vec![query.to_string()]
            } else {
                search_queries
            },
            analysis_prompt: parsed
                .analysis_prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| query.to_string()),
            comparison_needed: parsed.comparison_needed.unwrap_or(projects.len() > 1),
        })
    }
}

/// What the caller narrowed the analysis to. Empty means the whole index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisScope {
    /// Project patterns in any form [`ProjectPattern::compile`] accepts.
    pub projects: Vec<String>,
    /// Session ids or prefixes. When set, search is skipped.
    pub sessions: Vec<String>,
}

/// One unit of specialist work: a single chunk of a single session.
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    pub id: usize,
    pub session_id: String,
    pub project: String,
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub oversized: bool,
    pub prompt: String,
    pub context: String,
}

impl AnalysisTask {
    fn request(&self, max_tokens: u32) -> CompletionRequest {
        CompletionRequest::new(
            format!(
                "Question: {}\n\nConversation excerpt:\n\n{}\n\nAnswer the question using this excerpt.",
                self.prompt, self.context
            ),
            max_tokens,
        )
        .with_system(SPECIALIST_SYSTEM)
    }

    fn label(&self) -> String {
        format!(
            "session {} part {}/{}",
            short_id(&self.session_id),
            self.chunk_index + 1,
            self.chunk_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FindingStatus {
    Success { text: String },
    Failed { reason: String, transient: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFinding {
    pub task_id: usize,
    pub session_id: String,
    pub project: String,
    pub chunk_index: usize,
    pub chunk_count: usize,
    #[serde(flatten)]
    pub status: FindingStatus,
}

impl TaskFinding {
    pub fn is_success(&self) -> bool {
        matches!(self.status, FindingStatus::Success { .. })
    }

    fn from_task(task: &AnalysisTask, status: FindingStatus) -> Self {
        Self {
            task_id: task.id,
            session_id: task.session_id.clone(),
            project: task.project.clone(),
            chunk_index: task.chunk_index,
            chunk_count: task.chunk_count,
            status,
        }
    }
}

/// Successful findings of one session, in chunk order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFinding {
    pub session_id: String,
    pub project: String,
    pub text: String,
    pub failed_parts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub stage: AnalysisStage,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub query: String,
    pub scope: AnalysisScope,
    pub decomposed: DecomposedQuery,
    /// Sessions that were analyzed.
    pub sessions: Vec<String>,
    pub findings: Vec<TaskFinding>,
    pub session_findings: Vec<SessionFinding>,
    pub summary: String,
    pub log: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn succeeded(&self) -> usize {
        self.findings.iter().filter(|f| f.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.findings.len() - self.succeeded()
    }
}

/// Coordinates one analysis run against an index and a reasoning service.
pub struct Analyzer<'a> {
    pool: &'a SqlitePool,
    config: &'a Config,
    service: Arc<dyn ReasoningService>,
    progress: &'a dyn ProgressReporter,
    policy: RetryPolicy,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        pool: &'a SqlitePool,
        config: &'a Config,
        service: Arc<dyn ReasoningService>,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            pool,
            config,
            service,
            progress,
            policy: RetryPolicy::from_config(&config.analysis),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn log(&self, log: &mut Vec<LogEntry>, stage: AnalysisStage, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::info!(stage = stage.as_str(), "{}", detail);
        self.progress.report(ProgressEvent::Analysis {
            stage,
            detail: detail.clone(),
        });
        log.push(LogEntry {
            stage,
            detail,
            at: Utc::now(),
        });
    }

    /// Run the full pipeline.
    pub async fn analyze(
        &self,
        query: &str,
        scope: &AnalysisScope,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let created_at = Utc::now();
        let mut log = Vec::new();

        self.log(&mut log, AnalysisStage::Starting, format!("Analyzing: {}", query));
        if !scope.projects.is_empty() {
            self.log(
                &mut log,
                AnalysisStage::Starting,
                format!("Projects: {}", scope.projects.join(", ")),
            );
        }

        let decomposed = self.decompose(query, &scope.projects, cancel, &mut log).await?;
        ensure_live(cancel, &[])?;

        let sessions = self.gather_sessions(&decomposed, scope, &mut log).await?;
        ensure_live(cancel, &[])?;

        let mut result = AnalysisResult {
            id: persistence::analysis_id(query, created_at),
            query: query.to_string(),
            scope: scope.clone(),
            decomposed,
            sessions: sessions.iter().map(|s| s.id.clone()).collect(),
            findings: Vec::new(),
            session_findings: Vec::new(),
            summary: String::new(),
            log: Vec::new(),
            created_at,
        };

        if sessions.is_empty() {
            result.summary = "No relevant conversations found for this query.".to_string();
            self.log(&mut log, AnalysisStage::Complete, "No relevant sessions found");
            result.log = log;
            return Ok(result);
        }

        self.log(
            &mut log,
            AnalysisStage::Chunking,
            format!("Preparing {} session(s) for analysis", sessions.len()),
        );
        let tasks = plan_tasks(
            &sessions,
            &result.decomposed.analysis_prompt,
            self.config.chunking.max_tokens,
        );
        let oversized = tasks.iter().filter(|t| t.oversized).count();
        self.log(
            &mut log,
            AnalysisStage::Chunking,
            format!("Planned {} task(s), {} oversized", tasks.len(), oversized),
        );
        if tasks.is_empty() {
            result.summary = "The matching sessions contain no messages to analyze.".to_string();
            self.log(&mut log, AnalysisStage::Complete, "Nothing to analyze");
            result.log = log;
            return Ok(result);
        }

        let findings = self.execute(tasks, cancel, &mut log).await?;

        let reasons: Vec<String> = findings
            .iter()
            .filter_map(|f| match &f.status {
                FindingStatus::Failed { reason, .. } => Some(format!(
                    "session {} part {}/{}: {}",
                    short_id(&f.session_id),
                    f.chunk_index + 1,
                    f.chunk_count,
                    reason
                )),
                FindingStatus::Success { .. } => None,
            })
            .collect();
        if reasons.len() == findings.len() {
            self.log(&mut log, AnalysisStage::Complete, "All analysis tasks failed");
            return Err(Error::AnalysisFailure { reasons });
        }

        result.session_findings = group_by_session(&findings);
        result.summary = self
            .synthesize(&result.decomposed, &findings, &result.session_findings, cancel, &mut log)
            .await?;
        result.findings = findings;

        self.log(
            &mut log,
            AnalysisStage::Complete,
            format!(
                "Analysis complete: {} succeeded, {} failed",
                result.succeeded(),
                result.failed()
            ),
        );
        result.log = log;
        Ok(result)
    }

    /// Ask the service to break the question down. Any failure other than
    /// cancellation falls back to searching for the question itself.
    pub async fn decompose(
        &self,
        query: &str,
        projects: &[String],
        cancel: &CancellationToken,
        log: &mut Vec<LogEntry>,
    ) -> Result<DecomposedQuery> {
        self.log(log, AnalysisStage::Decomposing, "Breaking down the question");

        let mut prompt = format!("User question: {}", query);
        if !projects.is_empty() {
            prompt.push_str(&format!("\n\nProjects to analyze: {}", projects.join(", ")));
        }
        let request = CompletionRequest::new(prompt, DECOMPOSE_MAX_TOKENS).with_system(DECOMPOSE_SYSTEM);

        let decomposed =
            match complete_with_retry(self.service.as_ref(), &request, &self.policy, cancel).await {
                Ok(reply) => DecomposedQuery::from_reply(query, projects, &reply).unwrap_or_else(|| {
                    tracing::warn!("decomposition reply was not valid JSON, using the raw query");
                    DecomposedQuery::fallback(query, projects)
                }),
                Err(ServiceError::Cancelled) => return Err(Error::Cancelled { completed: Vec::new() }),
                Err(e) => {
                    tracing::warn!(error = %e, "decomposition failed, using the raw query");
                    DecomposedQuery::fallback(query, projects)
                }
            };

        self.log(
            log,
            AnalysisStage::Decomposing,
            format!("Generated {} search queries", decomposed.search_queries.len()),
        );
        for q in &decomposed.search_queries {
            self.log(log, AnalysisStage::Decomposing, format!("  - {}", q));
        }
        Ok(decomposed)
    }

    /// Load the sessions to analyze: the explicitly scoped ones, or the
    /// distinct sessions hit by each search query.
    pub async fn gather_sessions(
        &self,
        decomposed: &DecomposedQuery,
        scope: &AnalysisScope,
        log: &mut Vec<LogEntry>,
    ) -> Result<Vec<Session>> {
        let mut ids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        if !scope.sessions.is_empty() {
            for raw in &scope.sessions {
                let id =
                    search::resolve_session_id(self.pool, raw, self.config.search.min_prefix_len)
                        .await?;
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        } else {
            let patterns = scope
                .projects
                .iter()
                .map(|p| ProjectPattern::compile(p))
                .collect::<Result<Vec<_>>>()?;

            for query in &decomposed.search_queries {
                self.log(log, AnalysisStage::Searching, format!("Searching for: '{}'", query));

                let filters: Vec<SearchFilter> = if patterns.is_empty() {
                    vec![SearchFilter {
                        limit: Some(SEARCH_LIMIT_GLOBAL),
                        ..SearchFilter::default()
                    }]
                } else {
                    patterns
                        .iter()
                        .map(|p| SearchFilter {
                            project: Some(p.clone()),
                            limit: Some(SEARCH_LIMIT_PER_PROJECT),
                            ..SearchFilter::default()
                        })
                        .collect()
                };

                for filter in &filters {
                    let hits = match search::search(self.pool, &self.config.search, query, filter).await {
                        Ok(hits) => hits,
                        Err(Error::InvalidQuery { reason, .. }) => {
                            self.log(log, AnalysisStage::Searching, format!("  Skipped: {}", reason));
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let mut taken = 0;
                    for hit in hits {
                        if taken >= self.config.analysis.max_sessions_per_query {
                            break;
                        }
                        if seen.insert(hit.session_id.clone()) {
                            taken += 1;
                            self.log(
                                log,
                                AnalysisStage::Searching,
                                format!("  Found: {} in {}", short_id(&hit.session_id), hit.project),
                            );
                            ids.push(hit.session_id);
                        }
                    }
                }
            }
        }

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match get::load_session(self.pool, &self.config.search, &id).await {
                Ok(detail) => sessions.push(detail.session),
                Err(Error::NotFound { .. }) => {
                    self.log(
                        log,
                        AnalysisStage::Searching,
                        format!("  Skipped {}: transcript no longer on disk", short_id(&id)),
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.log(
            log,
            AnalysisStage::Searching,
            format!("Total unique sessions: {}", sessions.len()),
        );
        Ok(sessions)
    }

    /// Run every task on a pool of `analysis.max_concurrency` workers and
    /// wait for all of them. Results come back in task order.
    async fn execute(
        &self,
        tasks: Vec<AnalysisTask>,
        cancel: &CancellationToken,
        log: &mut Vec<LogEntry>,
    ) -> Result<Vec<TaskFinding>> {
        let total = tasks.len();
        self.log(
            log,
            AnalysisStage::Analyzing,
            format!(
                "Running {} task(s), {} at a time",
                total, self.config.analysis.max_concurrency
            ),
        );

        let semaphore = Arc::new(Semaphore::new(self.config.analysis.max_concurrency));
        let mut set = JoinSet::new();

        for task in &tasks {
            let task = task.clone();
            let semaphore = Arc::clone(&semaphore);
            let service = Arc::clone(&self.service);
            let policy = self.policy.clone();
            let cancel = cancel.clone();
            let max_tokens = self.config.analysis.max_output_tokens;

            set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (task.id, None),
                    permit = semaphore.acquire_owned() => permit,
                };
                let Ok(_permit) = permit else {
                    return (task.id, None);
                };
                if cancel.is_cancelled() {
                    return (task.id, None);
                }

                let outcome =
                    complete_with_retry(service.as_ref(), &task.request(max_tokens), &policy, &cancel)
                        .await;
                let status = match outcome {
                    Ok(text) => FindingStatus::Success { text },
                    Err(ServiceError::Cancelled) => return (task.id, None),
                    Err(e) => FindingStatus::Failed {
                        transient: e.is_transient(),
                        reason: e.to_string(),
                    },
                };
                (task.id, Some(TaskFinding::from_task(&task, status)))
            });
        }

        let mut slots: Vec<Option<TaskFinding>> = vec![None; total];
        let mut done = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, Some(finding))) => {
                    done += 1;
                    let verdict = match &finding.status {
                        FindingStatus::Success { .. } => "done".to_string(),
                        FindingStatus::Failed { reason, .. } => format!("failed: {}", reason),
                    };
                    self.log(
                        log,
                        AnalysisStage::Analyzing,
                        format!("[{}/{}] {} {}", done, total, tasks[id].label(), verdict),
                    );
                    slots[id] = Some(finding);
                }
                Ok((_, None)) => {}
                Err(e) => tracing::error!(error = %e, "analysis task aborted"),
            }
        }

        if cancel.is_cancelled() {
            let completed: Vec<TaskFinding> = slots.into_iter().flatten().collect();
            self.log(
                log,
                AnalysisStage::Complete,
                format!("Cancelled after {} completed task(s)", completed.len()),
            );
            return Err(Error::Cancelled { completed });
        }

        Ok(slots
            .into_iter()
            .zip(&tasks)
            .map(|(slot, task)| {
                slot.unwrap_or_else(|| {
                    TaskFinding::from_task(
                        task,
                        FindingStatus::Failed {
                            reason: "task aborted before completing".to_string(),
                            transient: false,
                        },
                    )
                })
            })
            .collect())
    }

    async fn synthesize(
        &self,
        decomposed: &DecomposedQuery,
        findings: &[TaskFinding],
        per_session: &[SessionFinding],
        cancel: &CancellationToken,
        log: &mut Vec<LogEntry>,
    ) -> Result<String> {
        let successes: Vec<&str> = findings
            .iter()
            .filter_map(|f| match &f.status {
                FindingStatus::Success { text } => Some(text.as_str()),
                FindingStatus::Failed { .. } => None,
            })
            .collect();
        if let [only] = successes.as_slice() {
            return Ok(only.to_string());
        }

        self.log(
            log,
            AnalysisStage::Synthesizing,
            format!("Combining findings from {} session(s)", per_session.len()),
        );

        let combined = render_session_findings(per_session);
        let instruction = if decomposed.comparison_needed && per_session.len() > 1 {
            "Compare and contrast the findings below across sessions and projects to answer"
        } else {
            "Combine the findings below into one answer to"
        };
        let request = CompletionRequest::new(
            format!(
                "{}:\n\nQuestion: {}\n\n{}",
                instruction, decomposed.analysis_prompt, combined
            ),
            self.config.analysis.max_output_tokens,
        )
        .with_system(SYNTHESIS_SYSTEM);

        match complete_with_retry(self.service.as_ref(), &request, &self.policy, cancel).await {
            Ok(summary) => Ok(summary),
            Err(ServiceError::Cancelled) => Err(Error::Cancelled {
                completed: findings.to_vec(),
            }),
            Err(e) => {
                self.log(
                    log,
                    AnalysisStage::Synthesizing,
                    format!("Synthesis failed ({}), returning per-session findings", e),
                );
                Ok(combined)
            }
        }
    }
}

/// One task per chunk, in session order then chunk order.
pub fn plan_tasks(sessions: &[Session], prompt: &str, budget: usize) -> Vec<AnalysisTask> {
    let mut tasks = Vec::new();
    for session in sessions {
        let chunks = chunk::chunk_session(session, budget);
        let count = chunks.len();
        for chunk in &chunks {
            tasks.push(AnalysisTask {
                id: tasks.len(),
                session_id: session.id.clone(),
                project: session.project.clone(),
                chunk_index: chunk.index,
                chunk_count: count,
                oversized: chunk.oversized,
                prompt: prompt.to_string(),
                context: chunk.to_text(count),
            });
        }
    }
    tasks
}

fn group_by_session(findings: &[TaskFinding]) -> Vec<SessionFinding> {
    let mut grouped: Vec<SessionFinding> = Vec::new();
    for finding in findings {
        let idx = match grouped.iter().position(|g| g.session_id == finding.session_id) {
            Some(idx) => idx,
            None => {
                grouped.push(SessionFinding {
                    session_id: finding.session_id.clone(),
                    project: finding.project.clone(),
                    text: String::new(),
                    failed_parts: 0,
                });
                grouped.len() - 1
            }
        };
        let entry = &mut grouped[idx];
        match &finding.status {
            FindingStatus::Success { text } => {
                if !entry.text.is_empty() {
                    entry.text.push_str("\n\n");
                }
                if finding.chunk_count > 1 {
                    entry.text.push_str(&format!(
                        "(part {}/{})\n",
                        finding.chunk_index + 1,
                        finding.chunk_count
                    ));
                }
                entry.text.push_str(text);
            }
            FindingStatus::Failed { .. } => entry.failed_parts += 1,
        }
    }
    grouped.retain(|g| !g.text.is_empty());
    grouped
}

fn render_session_findings(per_session: &[SessionFinding]) -> String {
    per_session
        .iter()
        .map(|s| format!("## Session {} ({})\n\n{}", short_id(&s.session_id), s.project, s.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn ensure_live(cancel: &CancellationToken, completed: &[TaskFinding]) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled {
            completed: completed.to_vec(),
        });
    }
    Ok(())
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
