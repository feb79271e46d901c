//! Repository inventory used by the code analysis role

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directories never worth scanning
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    "vendor",
    "dist",
];

/// Build and deployment files recognized at the project root
const MANIFESTS: &[&str] = &[
    "package.json",
    "requirements.txt",
    "Pipfile",
    "pyproject.toml",
    "poetry.lock",
    "pom.xml",
    "build.gradle",
    "Cargo.toml",
    "go.mod",
    "composer.json",
    "Gemfile",
    "Dockerfile",
    "docker-compose.yml",
    "kubernetes.yaml",
    "main.tf",
];

fn language_for(extension: &str) -> Option<&'static str> {
    Some(match extension {
        "py" => "Python",
        "js" | "jsx" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "java" => "Java",
        "go" => "Go",
        "rs" => "Rust",
        "cpp" | "cc" | "hpp" => "C++",
        "c" | "h" => "C",
        "php" => "PHP",
        "rb" => "Ruby",
        "cs" => "C#",
        "kt" => "Kotlin",
        _ => return None,
    })
}

/// File and language inventory of a local checkout
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepositorySnapshot {
    pub root: PathBuf,
    pub total_files: usize,
    pub total_bytes: u64,
    /// Source file count per language
    pub languages: BTreeMap<String, usize>,
    pub primary_language: Option<String>,
    /// Recognized manifests found at the root
    pub manifests: Vec<String>,
    pub has_dockerfile: bool,
}

impl RepositorySnapshot {
    /// Walk `root` and collect the inventory. Blocking; call from
    /// `spawn_blocking` inside async code.
    pub fn scan(root: &Path) -> std::io::Result<Self> {
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("project path {} is not a directory", root.display()),
            ));
        }

        let mut snapshot = RepositorySnapshot {
            root: root.to_path_buf(),
            ..Default::default()
        };

        let entries = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.depth() > 0
                    && e.file_name().to_str().is_some_and(|name| SKIP_DIRS.contains(&name)))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        for entry in entries {
            snapshot.total_files += 1;
            snapshot.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);

            if let Some(lang) = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .and_then(language_for)
            {
                *snapshot.languages.entry(lang.to_string()).or_insert(0) += 1;
            }
        }

        snapshot.primary_language = snapshot
            .languages
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(lang, _)| lang.clone());

        snapshot.manifests = MANIFESTS
            .iter()
            .filter(|m| root.join(m).exists())
            .map(|m| m.to_string())
            .collect();
        snapshot.has_dockerfile = root.join("Dockerfile").exists();

        Ok(snapshot)
    }

    /// Short human-readable summary for prompts
    pub fn summary(&self) -> String {
        let languages = if self.languages.is_empty() {
            "none detected".to_string()
        } else {
            self.languages
                .iter()
                .map(|(lang, count)| format!("{} ({} files)", lang, count))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "Files: {} ({} bytes)\nLanguages: {}\nPrimary language: {}\nManifests: {}\nDockerfile present: {}",
            self.total_files,
            self.total_bytes,
            languages,
            self.primary_language.as_deref().unwrap_or("unknown"),
            if self.manifests.is_empty() {
                "none".to_string()
            } else {
                self.manifests.join(", ")
            },
            if self.has_dockerfile { "yes" } else { "no" }
        )
    }
}
