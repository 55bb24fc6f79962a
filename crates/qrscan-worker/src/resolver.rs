//! Source file resolution across shared volumes.

use std::path::{Path, PathBuf};

/// Finds the local copy of an uploaded video.
///
/// Candidates, in order: the path as given, then for each root the path
/// re-rooted under it, then the bare file name under it.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    roots: Vec<PathBuf>,
}

impl PathResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn candidates(&self, file_path: &str) -> Vec<PathBuf> {
        let original = PathBuf::from(file_path);
        let mut candidates = vec![original.clone()];

        let relative = file_path.trim_start_matches('/');
        let file_name = original.file_name().map(PathBuf::from);

        for root in &self.roots {
            if !relative.is_empty() {
                candidates.push(root.join(relative));
            }
            if let Some(name) = &file_name {
                let flat = root.join(name);
                if !candidates.contains(&flat) {
                    candidates.push(flat);
                }
            }
        }
        candidates
    }

    /// First existing candidate, if any.
    pub fn resolve(&self, file_path: &str) -> Option<PathBuf> {
        if file_path.trim().is_empty() {
            return None;
        }
        self.candidates(file_path)
            .into_iter()
            .find(|candidate| is_file(candidate))
    }
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
