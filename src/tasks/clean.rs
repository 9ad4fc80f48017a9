use crate::core::Environment;
use crate::error::TaskError;

/// Scratch directory used by the dev server.
pub const TMP_DIR: &str = ".tmp";

/// Deletes `.tmp` and empties the dist root, keeping its `.git`.
pub fn clean(env: &Environment) -> Result<usize, TaskError> {
    let tmp = crate::io::remove_dir(&env.path(TMP_DIR))?;
    let removed = crate::io::empty_dir(&env.path(&env.profile.dist_root), &[".git"])?;

    tracing::info!(tmp, removed, dist = %env.profile.dist_root, "cleaned");
    Ok(removed + usize::from(tmp))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8Path;

    use super::*;
    use crate::manifest::Manifest;

    #[test]
    fn test_clean() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::create_dir_all(root.join(".tmp/css")).unwrap();
        fs::create_dir_all(root.join("dist/.git")).unwrap();
        fs::write(root.join("dist/index.html"), "").unwrap();

        let env = Environment::new(root, Manifest::default());

        assert_eq!(clean(&env).unwrap(), 2);
        assert!(!root.join(".tmp").exists());
        assert!(root.join("dist/.git").exists());
        assert!(!root.join("dist/index.html").exists());

        assert_eq!(clean(&env).unwrap(), 0);
    }
}
