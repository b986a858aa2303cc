use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

/// External asset-database view: which files are transitively reachable from a given file.
///
/// Implementations must exclude `path` itself and keep answers stable for one scan run.
pub trait DependencyGraph: Send + Sync {
    fn dependency_paths(&self, path: &Path) -> Vec<PathBuf>;

    fn has_dependencies(&self, path: &Path) -> bool {
        !self.dependency_paths(path).is_empty()
    }
}

/// Graph for callers without an asset database.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDependencies;

impl DependencyGraph for NoDependencies {
    fn dependency_paths(&self, _path: &Path) -> Vec<PathBuf> {
        Vec::new()
    }

    fn has_dependencies(&self, _path: &Path) -> bool {
        false
    }
}

/// In-memory adjacency map, typically exported from an editor's asset database.
#[derive(Debug, Default, Clone)]
pub struct StaticDependencyGraph {
    edges: HashMap<PathBuf, Vec<PathBuf>>,
}

#[derive(Deserialize)]
#[serde(transparent)]
struct GraphFile(HashMap<PathBuf, Vec<PathBuf>>);

impl StaticDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `deps` for `path`, dropping self references and duplicates while keeping order.
    pub fn insert(&mut self, path: impl Into<PathBuf>, deps: impl IntoIterator<Item = PathBuf>) {
        let path = path.into();
        let mut unique: Vec<PathBuf> = Vec::new();
        for dep in deps {
            if dep != path && !unique.contains(&dep) {
                unique.push(dep);
            }
        }
        self.edges.insert(path, unique);
    }

    /// Load a `{ "path": ["dep", ...] }` map from a JSON or YAML file (by extension).
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read dependency map at {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        let GraphFile(edges) = if is_yaml {
            serde_yaml::from_str(&raw).with_context(|| {
                format!("invalid YAML dependency map at {}", path.display())
            })?
        } else {
            serde_json::from_str(&raw).with_context(|| {
                format!("invalid JSON dependency map at {}", path.display())
            })?
        };
        let mut graph = Self::new();
        for (source, deps) in edges {
            graph.insert(source, deps);
        }
        Ok(graph)
    }
}

impl DependencyGraph for StaticDependencyGraph {
    fn dependency_paths(&self, path: &Path) -> Vec<PathBuf> {
        self.edges.get(path).cloned().unwrap_or_default()
    }

    fn has_dependencies(&self, path: &Path) -> bool {
        self.edges.get(path).is_some_and(|deps| !deps.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_excludes_self_and_duplicates() {
        let mut graph = StaticDependencyGraph::new();
        graph.insert(
            "Assets/Menu.prefab",
            vec![
                PathBuf::from("Assets/Menu.cs"),
                PathBuf::from("Assets/Menu.prefab"),
                PathBuf::from("Assets/Menu.cs"),
                PathBuf::from("Assets/Click.wav"),
            ],
        );
        assert_eq!(
            graph.dependency_paths(Path::new("Assets/Menu.prefab")),
            vec![
                PathBuf::from("Assets/Menu.cs"),
                PathBuf::from("Assets/Click.wav")
            ]
        );
        assert!(graph.has_dependencies(Path::new("Assets/Menu.prefab")));
        assert!(!graph.has_dependencies(Path::new("Assets/Other.cs")));
    }

    #[test]
    fn loads_yaml_and_json_maps() {
        let temp = tempfile::tempdir().unwrap();
        let yaml = temp.path().join("deps.yaml");
        fs::write(&yaml, "Assets/Hud.prefab:\n  - Assets/Hud.cs\n").unwrap();
        let json = temp.path().join("deps.json");
        fs::write(&json, r#"{"Assets/Hud.prefab": ["Assets/Hud.uss"]}"#).unwrap();

        let from_yaml = StaticDependencyGraph::from_file(&yaml).unwrap();
        let from_json = StaticDependencyGraph::from_file(&json).unwrap();
        assert_eq!(
            from_yaml.dependency_paths(Path::new("Assets/Hud.prefab")),
            vec![PathBuf::from("Assets/Hud.cs")]
        );
        assert_eq!(
            from_json.dependency_paths(Path::new("Assets/Hud.prefab")),
            vec![PathBuf::from("Assets/Hud.uss")]
        );
    }

    #[test]
    fn no_dependencies_is_empty() {
        assert!(NoDependencies
            .dependency_paths(Path::new("a.cs"))
            .is_empty());
    }
}
