//! Project discovery -- scan a root directory for test-enabled projects.
//!
//! A project is any immediate subdirectory holding a Playwright config file.
//! An optional manifest next to it overrides the display name, target URL,
//! port and whether the dashboard may trigger runs. Discovery is never
//! cached; callers scan again for every triggered run.

pub mod validate;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProjectsConfig;

/// Config files that mark a directory as a test-enabled project.
const MARKER_FILES: &[&str] = &[
    "playwright.config.ts",
    "playwright.config.js",
    "playwright.config.mjs",
    "playwright.config.cjs",
];

/// A discovered project. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub base_url: Option<String>,
    pub port: Option<u16>,
    #[serde(rename = "canRunFromUI")]
    pub can_run_from_ui: bool,
}

/// Optional per-project manifest.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectManifest {
    name: Option<String>,
    base_url: Option<String>,
    port: Option<u16>,
    can_run_from_ui: Option<bool>,
}

/// Read-only lookup of projects on this host.
#[derive(Debug, Clone)]
pub struct ProjectCatalog {
    root: PathBuf,
    manifest_name: String,
}

impl ProjectCatalog {
    pub fn new(config: &ProjectsConfig) -> Self {
        Self {
            root: config.root.clone(),
            manifest_name: config.manifest_name.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the root directory. A missing root yields an empty catalog.
    pub fn discover(&self) -> Result<BTreeMap<String, ProjectDescriptor>> {
        let mut projects = BTreeMap::new();

        if !self.root.is_dir() {
            warn!(root = %self.root.display(), "project root does not exist");
            return Ok(projects);
        }

        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("failed to read project root: {}", self.root.display()))?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || !has_marker(&path) {
                continue;
            }

            let id = entry.file_name().to_string_lossy().into_owned();
            if let Err(e) = validate::validate_project_id(&id) {
                warn!(path = %path.display(), error = %e, "skipping project with unsafe id");
                continue;
            }

            match self.describe(&id, &path) {
                Ok(descriptor) => {
                    debug!(project_id = %id, "discovered project");
                    projects.insert(id, descriptor);
                }
                Err(e) => {
                    warn!(project_id = %id, error = %e, "skipping project with unreadable manifest");
                }
            }
        }

        Ok(projects)
    }

    /// Discover and return a single project.
    pub fn find(&self, project_id: &str) -> Result<Option<ProjectDescriptor>> {
        Ok(self.discover()?.remove(project_id))
    }

    fn describe(&self, id: &str, path: &Path) -> Result<ProjectDescriptor> {
        let manifest_path = path.join(&self.manifest_name);
        let manifest = if manifest_path.is_file() {
            let content = std::fs::read_to_string(&manifest_path)
                .with_context(|| format!("failed to read {}", manifest_path.display()))?;
            toml::from_str::<ProjectManifest>(&content)
                .with_context(|| format!("failed to parse {}", manifest_path.display()))?
        } else {
            ProjectManifest::default()
        };

        let base_url = manifest
            .base_url
            .or_else(|| manifest.port.map(|p| format!("http://localhost:{}", p)));

        Ok(ProjectDescriptor {
            id: id.to_string(),
            name: manifest.name.unwrap_or_else(|| id.to_string()),
            path: path.to_path_buf(),
            base_url,
            port: manifest.port,
            can_run_from_ui: manifest.can_run_from_ui.unwrap_or(true),
        })
    }
}

fn has_marker(dir: &Path) -> bool {
    MARKER_FILES.iter().any(|name| dir.join(name).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(root: &Path) -> ProjectCatalog {
        ProjectCatalog::new(&ProjectsConfig {
            root: root.to_path_buf(),
            manifest_name: "testdash.toml".to_string(),
        })
    }

    fn make_project(root: &Path, name: &str, manifest: Option<&str>) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("playwright.config.ts"), "export default {};\n").unwrap();
        if let Some(m) = manifest {
            std::fs::write(dir.join("testdash.toml"), m).unwrap();
        }
    }

    #[test]
    fn test_discover_finds_marked_directories_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        make_project(tmp.path(), "shop", None);
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();

        let projects = catalog(tmp.path()).discover().unwrap();
        assert_eq!(projects.len(), 1);

        let shop = &projects["shop"];
        assert_eq!(shop.name, "shop");
        assert!(shop.can_run_from_ui);
        assert_eq!(shop.base_url, None);
    }

    #[test]
    fn test_manifest_overrides_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        make_project(
            tmp.path(),
            "admin",
            Some("name = \"Admin Portal\"\nport = 4200\ncan_run_from_ui = false\n"),
        );

        let admin = catalog(tmp.path()).find("admin").unwrap().unwrap();
        assert_eq!(admin.name, "Admin Portal");
        assert_eq!(admin.port, Some(4200));
        assert_eq!(admin.base_url.as_deref(), Some("http://localhost:4200"));
        assert!(!admin.can_run_from_ui);
    }

    #[test]
    fn test_unsafe_directory_names_are_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        make_project(tmp.path(), "bad name;", None);
        make_project(tmp.path(), "good", None);

        let projects = catalog(tmp.path()).discover().unwrap();
        assert_eq!(projects.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let projects = catalog(Path::new("/nonexistent/testdash-root")).discover().unwrap();
        assert!(projects.is_empty());
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let descriptor = ProjectDescriptor {
            id: "shop".into(),
            name: "Shop".into(),
            path: PathBuf::from("/srv/shop"),
            base_url: Some("http://localhost:3000".into()),
            port: Some(3000),
            can_run_from_ui: true,
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["baseUrl"], "http://localhost:3000");
        assert_eq!(json["canRunFromUI"], true);
    }
}
