//! Configuration: database, lock directory, tuner settings and the task list.
//!
//! Loaded with figment: defaults, then `garbo.toml` (or an explicit file),
//! then `GARBO__*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::domain::{KeyColumn, SqlQuery, SqlValue, TargetTable, TaskName, TaskSet};
use crate::error::GarboError;
use crate::pruner::PruneJob;
use crate::tuner::{ChunkBounds, DEFAULT_GOAL};

pub const DEFAULT_CONFIG_FILE: &str = "garbo.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GarboConfig {
    /// SQLite database holding the tables to prune and the job state.
    pub database: PathBuf,
    pub lock_dir: PathBuf,
    /// Target duration of one chunk.
    #[serde(with = "humantime_serde")]
    pub goal: Duration,
    #[serde(with = "humantime_serde")]
    pub cooldown: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub grace: Duration,
    #[serde(with = "humantime_serde")]
    pub requeue_threshold: Duration,
    #[serde(with = "humantime_serde")]
    pub requeue_pause: Duration,
    pub tasks: Vec<TaskConfig>,
}

impl Default for GarboConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("garbo.db"),
            lock_dir: std::env::temp_dir().join("garbo-locks"),
            goal: DEFAULT_GOAL,
            cooldown: None,
            grace: Duration::from_secs(60),
            requeue_threshold: Duration::from_secs(60),
            requeue_pause: Duration::from_millis(300),
            tasks: Vec::new(),
        }
    }
}

impl GarboConfig {
    /// Load from `path`, or from `garbo.toml` in the working directory if it
    /// exists. An explicit `path` must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, GarboError> {
        let file = match path {
            Some(path) if !path.is_file() => {
                return Err(GarboError::Config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            Some(path) => Toml::file(path),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };
        Self::from_figment(
            Figment::from(Serialized::defaults(GarboConfig::default()))
                .merge(file)
                .merge(Env::prefixed("GARBO__").split("__")),
        )
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml(toml: &str) -> Result<Self, GarboError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(GarboConfig::default())).merge(Toml::string(toml)),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, GarboError> {
        let config: GarboConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), GarboError> {
        if self.goal.is_zero() {
            return Err(GarboError::Config("goal must be positive".into()));
        }
        for task in &self.tasks {
            task.prune_job()?;
            task.chunk_bounds()?;
        }
        Ok(())
    }
}

/// One configured task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: TaskName,
    pub sets: Vec<TaskSet>,
    /// Only run with `--experimental`.
    #[serde(default)]
    pub experimental: bool,
    /// Target table of the prune kinds; `update` tasks name theirs in the
    /// statement.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_key")]
    pub key: Vec<KeyColumn>,
    #[serde(default)]
    pub min_chunk_size: Option<f64>,
    #[serde(default)]
    pub max_chunk_size: Option<f64>,
    #[serde(flatten)]
    pub kind: TaskKind,
}

fn default_key() -> Vec<KeyColumn> {
    vec![KeyColumn {
        name: "id".into(),
        key_type: crate::domain::KeyType::Integer,
    }]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// `query` selects the key columns of the rows to delete.
    BulkPrune {
        query: String,
        #[serde(default)]
        params: Vec<SqlValue>,
    },
    LimitedPrune {
        query: String,
        #[serde(default)]
        params: Vec<SqlValue>,
    },
    /// `predicate` is a boolean expression over the table's columns.
    ResumablePrune {
        predicate: String,
        #[serde(default)]
        params: Vec<SqlValue>,
    },
    /// `statement` binds the chunk size to `:limit` and is repeated until it
    /// affects no rows (or, for a query, returns 0).
    Update {
        statement: String,
        #[serde(default)]
        params: Vec<SqlValue>,
    },
}

impl TaskConfig {
    pub fn prune_job(&self) -> Result<PruneJob, GarboError> {
        let table = || match &self.table {
            Some(table) => TargetTable::new(table.clone(), self.key.clone()),
            None => Err(GarboError::Config(format!("{}: no table to prune", self.name))),
        };
        let query = |sql: &str, params: &[SqlValue]| SqlQuery {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        Ok(match &self.kind {
            TaskKind::BulkPrune { query: sql, params } => PruneJob::Bulk {
                table: table()?,
                query: query(sql, params),
            },
            TaskKind::LimitedPrune { query: sql, params } => PruneJob::Limited {
                table: table()?,
                query: query(sql, params),
            },
            TaskKind::ResumablePrune { predicate, params } => PruneJob::Resumable {
                table: table()?,
                predicate: query(predicate, params),
            },
            TaskKind::Update { statement, params } => {
                if !statement.contains(":limit") {
                    return Err(GarboError::Config(format!(
                        "{}: statement has no :limit parameter",
                        self.name
                    )));
                }
                PruneJob::Statement {
                    statement: query(statement, params),
                }
            }
        })
    }

    /// `None` keeps the pruner's own bounds.
    pub fn chunk_bounds(&self) -> Result<Option<ChunkBounds>, GarboError> {
        match (self.min_chunk_size, self.max_chunk_size) {
            (None, None) => Ok(None),
            (minimum, maximum) => ChunkBounds::new(
                minimum.unwrap_or(ChunkBounds::DEFAULT_MINIMUM),
                maximum.unwrap_or(crate::pruner::BulkPruner::MAXIMUM_CHUNK_SIZE),
            )
            .map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = r#"
        database = "/var/lib/garbo/launchpad.db"
        goal = "500ms"
        cooldown = "50ms"

        [[tasks]]
        name = "login-token-pruner"
        sets = ["daily"]
        kind = "bulk_prune"
        table = "login_token"
        query = "SELECT id FROM login_token WHERE date_created < ?"
        params = [1700000000]

        [[tasks]]
        name = "oauth-nonce-pruner"
        sets = ["frequent"]
        kind = "bulk_prune"
        table = "oauth_nonce"
        key = [{ name = "access_token" }, { name = "nonce", type = "text" }]
        query = "SELECT access_token, nonce FROM oauth_nonce WHERE request_timestamp < ?"
        params = [1700000000]
        max_chunk_size = 500

        [[tasks]]
        name = "openid-association-pruner"
        sets = ["frequent", "hourly"]
        kind = "limited_prune"
        table = "openid_association"
        key = [{ name = "handle", type = "text" }]
        query = "SELECT handle FROM openid_association WHERE expires < ?"
        params = [1700000000]

        [[tasks]]
        name = "revision-cache-pruner"
        sets = ["daily"]
        experimental = true
        kind = "resumable_prune"
        table = "revision_cache"
        predicate = "stale = 1"

        [[tasks]]
        name = "bug-heat-updater"
        sets = ["hourly"]
        kind = "update"
        statement = """
            UPDATE bug SET heat = ?
            WHERE id IN (SELECT id FROM bug WHERE heat_stale LIMIT :limit)"""
        params = [0]
        max_chunk_size = 1000
    "#;

    #[test]
    fn defaults_need_no_file() {
        let config = GarboConfig::from_toml("").unwrap();
        assert_eq!(config, GarboConfig::default());
        assert_eq!(config.goal, Duration::from_secs(2));
        assert_eq!(config.requeue_pause, Duration::from_millis(300));
    }

    #[test]
    fn parses_every_task_kind() {
        let config = GarboConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.database, PathBuf::from("/var/lib/garbo/launchpad.db"));
        assert_eq!(config.goal, Duration::from_millis(500));
        assert_eq!(config.cooldown, Some(Duration::from_millis(50)));
        assert_eq!(config.tasks.len(), 5);

        let nonce = &config.tasks[1];
        assert!(matches!(nonce.kind, TaskKind::BulkPrune { .. }));
        let PruneJob::Bulk { table, query } = nonce.prune_job().unwrap() else {
            panic!("expected a bulk prune job");
        };
        assert_eq!(table.key_arity(), 2);
        assert_eq!(query.params, vec![SqlValue::Integer(1_700_000_000)]);
        assert_eq!(
            nonce.chunk_bounds().unwrap(),
            Some(ChunkBounds::new(1.0, 500.0).unwrap())
        );

        let revision = &config.tasks[3];
        assert!(revision.experimental);
        assert!(matches!(
            revision.prune_job().unwrap(),
            PruneJob::Resumable { .. }
        ));
        assert_eq!(revision.chunk_bounds().unwrap(), None);

        let heat = &config.tasks[4];
        assert_eq!(heat.table, None);
        let PruneJob::Statement { statement } = heat.prune_job().unwrap() else {
            panic!("expected a statement job");
        };
        assert!(statement.sql.ends_with("LIMIT :limit)"));
        assert_eq!(statement.params, vec![SqlValue::Integer(0)]);
    }

    #[rstest]
    #[case::prune_without_table(
        r#"
        [[tasks]]
        name = "x"
        sets = ["daily"]
        kind = "limited_prune"
        query = "SELECT id FROM t"
        "#
    )]
    #[case::update_without_limit(
        r#"
        [[tasks]]
        name = "x"
        sets = ["daily"]
        kind = "update"
        statement = "UPDATE bug SET heat = 0"
        "#
    )]
    fn rejects_incomplete_tasks(#[case] toml: &str) {
        assert!(matches!(GarboConfig::from_toml(toml), Err(GarboError::Config(_))));
    }

    #[test]
    fn rejects_bad_identifiers_at_load() {
        let err = GarboConfig::from_toml(
            r#"
            [[tasks]]
            name = "bad"
            sets = ["daily"]
            kind = "limited_prune"
            table = "t; DROP TABLE person"
            query = "SELECT id FROM t"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, GarboError::InvalidName { kind: "table", .. }));
    }

    #[test]
    fn rejects_unknown_kind() {
        let result = GarboConfig::from_toml(
            r#"
            [[tasks]]
            name = "x"
            sets = ["daily"]
            kind = "vacuum"
            table = "t"
            "#,
        );
        assert!(matches!(result, Err(GarboError::Config(_))));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = GarboConfig::load(Some(dir.path().join("missing.toml").as_path()));
        assert!(matches!(result, Err(GarboError::Config(_))));
    }

    #[test]
    fn loads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbo.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = GarboConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.tasks.len(), 5);
    }
}
