//! Project pattern compiler.
//!
//! Users filter projects with three surface syntaxes. All of them compile to
//! one [`ProjectPattern`], which the search engine turns into a SQL predicate:
//!
//! | Surface form | Kind | Evaluated as |
//! |---|---|---|
//! | `foo` | substring | `instr(lower(project), lower(?)) > 0` |
//! | `foo-*`, `api-?`, `[ab]*` | glob | `project GLOB ?` |
//! | `re:^foo$`, `/^foo$/` | regex | in memory over distinct project names, then `project IN (...)` |

use regex::Regex;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum ProjectPattern {
    Substring(String),
    Glob(String),
    Regex(Regex),
}

/// A pattern lowered to something SQLite can evaluate.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectPredicate {
    Substring(String),
    Glob(String),
    AnyOf(Vec<String>),
}

impl ProjectPattern {
    pub fn compile(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Pattern {
                pattern: raw.to_string(),
                reason: "empty pattern".to_string(),
            });
        }

        let regex_src = raw.strip_prefix("re:").or_else(|| {
            (raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/'))
                .then(|| &raw[1..raw.len() - 1])
        });
        if let Some(src) = regex_src {
            return Regex::new(src)
                .map(ProjectPattern::Regex)
                .map_err(|e| Error::Pattern {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                });
        }

        if raw.contains(['*', '?', '[']) {
            return Ok(ProjectPattern::Glob(raw.to_string()));
        }

        Ok(ProjectPattern::Substring(raw.to_string()))
    }

    /// Lower to a SQL predicate. Regex patterns are expanded to the list of
    /// indexed project names they match.
    pub async fn resolve(&self, pool: &SqlitePool) -> Result<ProjectPredicate> {
        Ok(match self {
            ProjectPattern::Substring(s) => ProjectPredicate::Substring(s.clone()),
            ProjectPattern::Glob(g) => ProjectPredicate::Glob(g.clone()),
            ProjectPattern::Regex(re) => {
                let projects: Vec<String> =
                    sqlx::query_scalar("SELECT DISTINCT project FROM sessions ORDER BY project")
                        .fetch_all(pool)
                        .await?;
                ProjectPredicate::AnyOf(projects.into_iter().filter(|p| re.is_match(p)).collect())
            }
        })
    }
}

impl ProjectPredicate {
    /// Append ` AND <predicate on column>` to a query under construction.
    pub fn push_and(&self, qb: &mut QueryBuilder<'_, Sqlite>, column: &str) {
        match self {
            ProjectPredicate::Substring(s) => {
                qb.push(format!(" AND instr(lower({}), lower(", column));
                qb.push_bind(s.clone());
                qb.push(")) > 0");
            }
            ProjectPredicate::Glob(g) => {
                qb.push(format!(" AND {} GLOB ", column));
                qb.push_bind(g.clone());
            }
            ProjectPredicate::AnyOf(names) if names.is_empty() => {
                qb.push(" AND 0");
            }
            ProjectPredicate::AnyOf(names) => {
                qb.push(format!(" AND {} IN (", column));
                let mut separated = qb.separated(", ");
                for name in names {
                    separated.push_bind(name.clone());
                }
                separated.push_unseparated(")");
            }
        }
    }
}
