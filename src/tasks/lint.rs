//! Linting of scripts and stylesheets through external linters.
//!
//! Every issue is reported through the policy. Outside interactive sessions
//! a run that reported any error fails the task, so that CI stops on it.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::cache::Fingerprints;
use crate::core::{Environment, Hash32};
use crate::error::TaskError;
use crate::globs::{Category, is_partial};
use crate::pipeline::{Pipeline, Step};
use crate::policy::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub message: String,
    pub rule: Option<String>,
}

/// A source linter.
pub trait Linter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lints one file. An `Err` means the linter itself couldn't run.
    fn lint(&self, path: &Utf8Path, source: &str) -> anyhow::Result<Vec<Issue>>;
}

/// Runs a [`Linter`] over one source category.
pub struct LintTask {
    linter: Arc<dyn Linter>,
    category: Category,
    /// Partials are linted through the files importing them.
    skip_partials: bool,
    /// Clean files, skipped for the rest of the process.
    clean: Mutex<Fingerprints>,
}

impl LintTask {
    pub fn new(linter: Arc<dyn Linter>, category: Category) -> Self {
        Self {
            linter,
            category,
            skip_partials: category == Category::Styles,
            clean: Mutex::new(Fingerprints::memory()),
        }
    }

    fn clean(&self) -> MutexGuard<'_, Fingerprints> {
        self.clean.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run(&self, env: &Environment) -> Result<(), TaskError> {
        let name = self.linter.name();
        let skip_partials = self.skip_partials;

        let report = Pipeline::from_selector(env, name, env.globs.get(self.category))?
            .filter(|path| !(skip_partials && is_partial(path)))
            .run(|file| {
                let hash = Hash32::hash(&file.data);
                if self.clean().is_fresh(&file.path, hash) {
                    return Ok(Step::Skip);
                }

                let issues = self.linter.lint(&env.path(&file.path), file.text()?)?;
                let mut errors = 0;

                for issue in &issues {
                    let rule = issue.rule.as_deref().map(|r| format!(" ({r})")).unwrap_or_default();
                    let message = format!(
                        "{}:{}:{} {}{}",
                        file.path, issue.line, issue.column, issue.message, rule
                    );

                    match issue.severity {
                        Severity::Error => {
                            errors += 1;
                            env.policy.notify(Notification::error(message));
                        }
                        Severity::Warning => env.policy.notify(Notification::info(message)),
                    }
                }

                if errors == 0 {
                    self.clean().record(&file.path, hash);
                } else {
                    self.clean().forget(&file.path);
                }

                Ok(Step::Emit(errors))
            });

        let count = report.outputs.iter().sum::<usize>() + report.failed;

        if count > 0 {
            if !env.is_interactive() {
                return Err(TaskError::Lint {
                    linter: name,
                    count,
                });
            }
            tracing::warn!(linter = name, count, "lint problems reported");
        }

        Ok(())
    }
}

/// ESLint with the Google style guide and a few relaxed rules.
pub struct EsLint {
    config_dir: Utf8PathBuf,
    config: OnceLock<Result<Utf8PathBuf, String>>,
}

const ESLINT_CONFIG: &str = r#"{
  "root": true,
  "extends": "google",
  "env": { "browser": true, "jquery": true },
  "parserOptions": { "ecmaVersion": 2015 },
  "rules": {
    "eqeqeq": 1,
    "max-len": 0,
    "require-jsdoc": 0
  }
}
"#;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EsLintFile {
    messages: Vec<EsLintMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EsLintMessage {
    rule_id: Option<String>,
    severity: u8,
    message: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    column: u32,
}

impl EsLint {
    /// The generated config file is written to `config_dir` on first use.
    pub fn new(config_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            config: OnceLock::new(),
        }
    }

    fn config(&self) -> anyhow::Result<&Utf8Path> {
        let config = self.config.get_or_init(|| {
            let path = self.config_dir.join("eslintrc.json");
            crate::io::write_file(&path, ESLINT_CONFIG)
                .map(|()| path)
                .map_err(|e| e.to_string())
        });

        match config {
            Ok(path) => Ok(path.as_path()),
            Err(e) => anyhow::bail!("couldn't write eslint config: {e}"),
        }
    }

    fn parse(stdout: &[u8]) -> anyhow::Result<Vec<Issue>> {
        let files: Vec<EsLintFile> = serde_json::from_slice(stdout)?;

        Ok(files
            .into_iter()
            .flat_map(|f| f.messages)
            .map(|m| Issue {
                line: m.line,
                column: m.column,
                severity: if m.severity >= 2 {
                    Severity::Error
                } else {
                    Severity::Warning
                },
                message: m.message,
                rule: m.rule_id,
            })
            .collect())
    }
}

impl Linter for EsLint {
    fn name(&self) -> &'static str {
        "eslint"
    }

    fn lint(&self, path: &Utf8Path, source: &str) -> anyhow::Result<Vec<Issue>> {
        let mut child = Command::new("eslint")
            .env("ESLINT_USE_FLAT_CONFIG", "false")
            .arg("--no-eslintrc")
            .arg("--config")
            .arg(self.config()?)
            .arg("--format")
            .arg("json")
            .arg("--stdin")
            .arg("--stdin-filename")
            .arg(path.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("stdin not piped"))?;
            stdin.write_all(source.as_bytes())?;
        }

        let output = child.wait_with_output()?;

        // 1 means problems were found, anything else is a crash
        match output.status.code() {
            Some(0 | 1) => Self::parse(&output.stdout),
            _ => anyhow::bail!(
                "eslint failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }
}

/// `scss-lint`, configured by `lint.yml` in the project root when present.
pub struct ScssLint {
    config: Option<Utf8PathBuf>,
}

#[derive(Deserialize)]
struct ScssLintIssue {
    line: u32,
    #[serde(default)]
    column: u32,
    severity: String,
    reason: String,
    linter: Option<String>,
}

impl ScssLint {
    pub fn new(root: &Utf8Path) -> Self {
        let config = root.join("lint.yml");
        Self {
            config: config.is_file().then_some(config),
        }
    }

    fn parse(stdout: &[u8]) -> anyhow::Result<Vec<Issue>> {
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let files: BTreeMap<String, Vec<ScssLintIssue>> = serde_json::from_slice(stdout)?;

        Ok(files
            .into_values()
            .flatten()
            .map(|i| Issue {
                line: i.line,
                column: i.column,
                severity: if i.severity == "error" {
                    Severity::Error
                } else {
                    Severity::Warning
                },
                message: i.reason,
                rule: i.linter,
            })
            .collect())
    }
}

impl Linter for ScssLint {
    fn name(&self) -> &'static str {
        "scss-lint"
    }

    fn lint(&self, path: &Utf8Path, _: &str) -> anyhow::Result<Vec<Issue>> {
        let mut cmd = Command::new("scss-lint");
        cmd.arg("--format").arg("JSON");
        if let Some(config) = &self.config {
            cmd.arg("--config").arg(config);
        }

        let output = cmd.arg(path).stderr(Stdio::piped()).output()?;

        // 1 and 2 report warnings and errors, higher codes are usage errors
        match output.status.code() {
            Some(0..=2) => Self::parse(&output.stdout),
            _ => anyhow::bail!(
                "scss-lint failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }
}
