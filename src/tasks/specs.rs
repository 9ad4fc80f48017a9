use std::process::Command;

use crate::core::Environment;
use crate::error::TaskError;
use crate::policy::Notification;

/// Runs the Jasmine suite found at the profile's test entry.
#[derive(Debug, Clone)]
pub struct Jasmine {
    program: String,
}

impl Default for Jasmine {
    fn default() -> Self {
        Self {
            program: "jasmine".into(),
        }
    }
}

impl Jasmine {
    /// Uses another test runner binary, called as `<program> <entry>`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn run(&self, env: &Environment) -> Result<(), TaskError> {
        let entry = env.path(env.profile.test_entry());

        if !entry.is_file() {
            tracing::warn!(%entry, "no test entry point, skipping unit tests");
            return Ok(());
        }

        let output = Command::new(&self.program)
            .arg(&entry)
            .current_dir(&env.root)
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::info!("{line}");
        }

        if output.status.success() {
            return Ok(());
        }

        let summary = stdout
            .lines()
            .rev()
            .find(|line| line.contains("spec"))
            .map(str::trim)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{} exited with {}", self.program, output.status));

        if !env.is_interactive() {
            return Err(TaskError::Test(summary));
        }

        env.policy
            .notify(Notification::error(format!("Unit tests failed: {summary}")));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8Path;

    use super::*;
    use crate::manifest::Manifest;
    use crate::policy::{ConsoleSink, Policy};

    fn project(with_entry: bool) -> (tempfile::TempDir, Environment) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        let env = Environment::new(root, Manifest::default()).with_policy(Policy::new(ConsoleSink));

        if with_entry {
            let entry = env.path(env.profile.test_entry());
            fs::create_dir_all(entry.parent().unwrap()).unwrap();
            fs::write(entry, "describe('x', () => {});").unwrap();
        }

        (dir, env)
    }

    #[test]
    fn test_missing_entry_is_skipped() {
        let (_dir, env) = project(false);
        Jasmine::with_program("false").run(&env).unwrap();
        assert_eq!(env.policy.error_count(), 0);
    }

    #[test]
    fn test_failures_escalate_when_not_interactive() {
        let (_dir, env) = project(true);

        let err = Jasmine::with_program("false").run(&env).unwrap_err();
        assert!(matches!(err, TaskError::Test(_)));

        env.set_server_active(true);
        Jasmine::with_program("false").run(&env).unwrap();
        assert_eq!(env.policy.error_count(), 1);
    }

    #[test]
    fn test_passing_suite() {
        let (_dir, env) = project(true);
        Jasmine::with_program("true").run(&env).unwrap();
    }
}
