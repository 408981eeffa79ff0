//! Saved filter trees.
//!
//! A [`TreeState`] mirrors the forest and its stashes as plain data. Each
//! node carries the [`FilterState`] its filter wrote; the tree never looks
//! inside a filter's properties, it only hands them back to `read_state`.
//!
//! Both JSON and TOML are accepted. The format follows the file extension
//! (`.toml` for TOML, anything else is JSON).

use crate::pipeline::cache::{CacheBudget, FilterCache};
use crate::pipeline::error::TreeError;
use crate::pipeline::filter::Filter;
use crate::pipeline::filter_type::{FilterFactory, FilterType};
use crate::pipeline::id::FilterId;
use crate::pipeline::property::{PropertyError, PropertyValue};
use crate::pipeline::stash::{Stash, StashNode};
use crate::pipeline::tree::FilterTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Current state file version.
pub const STATE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("'{0}' is not a built-in filter and cannot be saved")]
    NotPersistable(&'static str),

    #[error("Filter '{0}' has no type")]
    MissingType(String),

    #[error("Unsupported state version {0}")]
    UnsupportedVersion(u32),

    #[error("Filter '{label}': {source}")]
    Property {
        label: String,
        #[source]
        source: PropertyError,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// On-disk encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFormat {
    Json,
    Toml,
}

impl StateFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => StateFormat::Toml,
            _ => StateFormat::Json,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_state_version() -> u32 {
    STATE_VERSION
}

/// What one filter chooses to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub filter_type: Option<FilterType>,

    #[serde(default)]
    pub label: String,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl FilterState {
    /// Label, cache switch and every listed property of `filter`.
    pub fn from_filter<F: Filter + ?Sized>(filter: &F) -> Self {
        Self {
            filter_type: filter.filter_type(),
            label: filter.label().to_string(),
            cache_enabled: filter.base().cache().is_enabled(),
            properties: filter
                .properties()
                .into_iter()
                .map(|p| (p.key.to_string(), p.value))
                .collect(),
        }
    }

    /// Apply label, cache switch and properties to a freshly created filter.
    ///
    /// Unknown property keys are skipped with a warning so files written by
    /// newer versions still load.
    pub fn apply_common<F: Filter + ?Sized>(&self, filter: &mut F) -> Result<(), StateError> {
        if !self.label.is_empty() {
            filter.set_label(&self.label);
        }
        filter.base_mut().cache = FilterCache::new(self.cache_enabled);
        for (key, value) in &self.properties {
            match filter.set_property(key, value) {
                Ok(_) => {}
                Err(PropertyError::UnknownKey(key)) => {
                    tracing::warn!("{}: ignoring unknown property '{}'", filter.label(), key);
                }
                Err(source) => {
                    return Err(StateError::Property {
                        label: filter.label().to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    fn create(&self, base_dir: &Path) -> Result<Box<dyn Filter>, StateError> {
        let ty = self
            .filter_type
            .ok_or_else(|| StateError::MissingType(self.label.clone()))?;
        let mut filter = FilterFactory::create(ty);
        filter.read_state(self, base_dir)?;
        Ok(filter)
    }

    fn is_hazardous(&self) -> bool {
        self.filter_type.is_some_and(|t| t.is_hazardous())
    }
}

/// A filter and its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub filter: FilterState,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeState>,
}

impl NodeState {
    fn from_filter(filter: &dyn Filter) -> Result<FilterState, StateError> {
        if filter.filter_type().is_none() {
            return Err(StateError::NotPersistable(filter.type_name()));
        }
        Ok(filter.write_state())
    }

    fn capture(tree: &FilterTree, id: FilterId) -> Result<Self, StateError> {
        let filter = tree.get(id).ok_or(TreeError::InvalidHandle(id))?;
        Ok(Self {
            filter: Self::from_filter(filter)?,
            children: tree
                .children(id)
                .iter()
                .map(|&child| Self::capture(tree, child))
                .collect::<Result<_, _>>()?,
        })
    }

    fn capture_stash(node: &StashNode) -> Result<Self, StateError> {
        Ok(Self {
            filter: Self::from_filter(node.filter())?,
            children: node
                .children()
                .iter()
                .map(Self::capture_stash)
                .collect::<Result<_, _>>()?,
        })
    }

    fn build(
        &self,
        tree: &mut FilterTree,
        parent: Option<FilterId>,
        base_dir: &Path,
    ) -> Result<(), StateError> {
        let id = tree.add_filter(self.filter.create(base_dir)?, parent)?;
        for child in &self.children {
            child.build(tree, Some(id), base_dir)?;
        }
        Ok(())
    }

    fn build_stash(&self, base_dir: &Path) -> Result<StashNode, StateError> {
        let children = self
            .children
            .iter()
            .map(|c| c.build_stash(base_dir))
            .collect::<Result<_, _>>()?;
        Ok(StashNode::new(self.filter.create(base_dir)?, children))
    }

    fn has_hazardous(&self) -> bool {
        self.filter.is_hazardous() || self.children.iter().any(NodeState::has_hazardous)
    }

    /// Drop hazardous children with their subtrees; returns how many nodes went.
    fn strip_hazardous_children(&mut self) -> usize {
        let before = self.count();
        self.children.retain(|c| !c.filter.is_hazardous());
        let mut removed = before - 1 - self.children.iter().map(NodeState::count).sum::<usize>();
        for child in &mut self.children {
            removed += child.strip_hazardous_children();
        }
        removed
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(NodeState::count).sum::<usize>()
    }
}

/// A named stash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashState {
    pub name: String,
    pub root: NodeState,
}

/// A whole saved tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeState {
    #[serde(default = "default_state_version")]
    pub version: u32,

    #[serde(default)]
    pub roots: Vec<NodeState>,

    #[serde(default)]
    pub stashes: Vec<StashState>,
}

impl Default for TreeState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            roots: Vec::new(),
            stashes: Vec::new(),
        }
    }
}

impl TreeState {
    /// Snapshot the configuration of `tree`. Fails on filters defined outside
    /// this crate.
    pub fn capture(tree: &FilterTree) -> Result<Self, StateError> {
        let roots = tree
            .roots()
            .iter()
            .map(|&id| NodeState::capture(tree, id))
            .collect::<Result<_, _>>()?;
        let stashes = tree
            .stashes()
            .iter()
            .map(|stash| {
                Ok(StashState {
                    name: stash.name().to_string(),
                    root: NodeState::capture_stash(stash.root())?,
                })
            })
            .collect::<Result<_, StateError>>()?;
        Ok(Self {
            version: STATE_VERSION,
            roots,
            stashes,
        })
    }

    /// Recreate the tree. Relative paths in filter state resolve against
    /// `base_dir`. The new tree starts with empty undo history.
    pub fn build(&self, budget: Arc<CacheBudget>, base_dir: &Path) -> Result<FilterTree, StateError> {
        if self.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion(self.version));
        }
        let mut tree = FilterTree::new(budget);
        for root in &self.roots {
            root.build(&mut tree, None, base_dir)?;
        }
        for stash in &self.stashes {
            let root = stash.root.build_stash(base_dir)?;
            tree.insert_stash(Stash::new(stash.name.clone(), root))?;
        }
        tree.clear_history();
        Ok(tree)
    }

    /// Any filter, including stashed ones, that can run external code.
    pub fn has_hazardous(&self) -> bool {
        self.roots.iter().any(NodeState::has_hazardous)
            || self.stashes.iter().any(|s| s.root.has_hazardous())
    }

    /// Remove hazardous filters and everything below them. Stashes whose
    /// root is hazardous are dropped. Returns the number of filters removed.
    pub fn strip_hazardous(&mut self) -> usize {
        let mut removed = 0;
        let total: usize = self.roots.iter().map(NodeState::count).sum();
        self.roots.retain(|r| !r.filter.is_hazardous());
        removed += total - self.roots.iter().map(NodeState::count).sum::<usize>();
        for root in &mut self.roots {
            removed += root.strip_hazardous_children();
        }

        let total: usize = self.stashes.iter().map(|s| s.root.count()).sum();
        self.stashes.retain(|s| !s.root.filter.is_hazardous());
        removed += total - self.stashes.iter().map(|s| s.root.count()).sum::<usize>();
        for stash in &mut self.stashes {
            removed += stash.root.strip_hazardous_children();
        }

        if removed > 0 {
            tracing::info!("Stripped {} hazardous filter(s) from state", removed);
        }
        removed
    }

    pub fn to_string(&self, format: StateFormat) -> Result<String, StateError> {
        Ok(match format {
            StateFormat::Json => serde_json::to_string_pretty(self)?,
            StateFormat::Toml => toml::to_string_pretty(self)?,
        })
    }

    pub fn from_str(text: &str, format: StateFormat) -> Result<Self, StateError> {
        Ok(match format {
            StateFormat::Json => serde_json::from_str(text)?,
            StateFormat::Toml => toml::from_str(text)?,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = self.to_string(StateFormat::from_path(path))?;
        std::fs::write(path, content)?;
        tracing::info!("Saved filter tree to {:?}", path);
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content, StateFormat::from_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filters::{DataLoadFilter, ExternalProgramFilter, RangeFilter};

    fn node(ty: FilterType, children: Vec<NodeState>) -> NodeState {
        NodeState {
            filter: FilterFactory::create(ty).write_state(),
            children,
        }
    }

    fn sample_tree() -> FilterTree {
        let mut tree = FilterTree::new(CacheBudget::unlimited().shared());
        let src = tree
            .add_filter(Box::new(DataLoadFilter::synthetic(100)), None)
            .unwrap();
        let range = tree.add_filter(Box::new(RangeFilter::new()), Some(src)).unwrap();
        tree.set_filter_property(
            range,
            "ranges",
            &PropertyValue::from("Bl:0..9;Pl:20..33"),
        )
        .unwrap();
        tree.set_filter_string(src, "Synthetic").unwrap();
        tree
    }

    #[test]
    fn test_filter_state_roundtrip_keeps_properties() {
        let mut filter = DataLoadFilter::synthetic(42);
        filter.set_label("Mine");
        let state = filter.write_state();
        assert_eq!(state.filter_type, Some(FilterType::DataLoad));
        assert_eq!(state.properties["synthetic_count"], PropertyValue::Int(42));

        let rebuilt = state.create(Path::new(".")).unwrap();
        assert_eq!(rebuilt.label(), "Mine");
        assert_eq!(rebuilt.write_state(), state);
    }

    #[test]
    fn test_capture_and_build() {
        let tree = sample_tree();
        let state = TreeState::capture(&tree).unwrap();
        assert_eq!(state.roots.len(), 1);
        assert_eq!(state.roots[0].filter.label, "Synthetic");
        assert_eq!(state.roots[0].children.len(), 1);

        let rebuilt = state
            .build(CacheBudget::unlimited().shared(), Path::new("."))
            .unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert!(!rebuilt.can_undo());
        assert_eq!(TreeState::capture(&rebuilt).unwrap(), state);
    }

    #[test]
    fn test_text_formats() {
        let state = TreeState::capture(&sample_tree()).unwrap();
        for format in [StateFormat::Json, StateFormat::Toml] {
            let text = state.to_string(format).unwrap();
            assert_eq!(TreeState::from_str(&text, format).unwrap(), state);
        }
    }

    #[test]
    fn test_strip_hazardous() {
        let mut state = TreeState {
            roots: vec![node(
                FilterType::DataLoad,
                vec![
                    node(
                        FilterType::ExternalProgram,
                        vec![node(FilterType::SpectrumPlot, vec![])],
                    ),
                    node(FilterType::BoundingBox, vec![]),
                ],
            )],
            stashes: vec![StashState {
                name: "ext".into(),
                root: node(FilterType::ExternalProgram, vec![]),
            }],
            ..Default::default()
        };
        assert!(state.has_hazardous());
        assert_eq!(state.strip_hazardous(), 3);
        assert!(!state.has_hazardous());
        assert_eq!(state.roots[0].children.len(), 1);
        assert!(state.stashes.is_empty());
    }

    #[test]
    fn test_missing_type_and_bad_property() {
        let mut state = TreeState::default();
        let mut root = node(FilterType::DataLoad, vec![]);
        root.filter.filter_type = None;
        state.roots.push(root);
        assert!(matches!(
            state.build(CacheBudget::unlimited().shared(), Path::new(".")),
            Err(StateError::MissingType(_))
        ));

        let mut root = node(FilterType::DataLoad, vec![]);
        root.filter
            .properties
            .insert("synthetic_count".into(), PropertyValue::from("many"));
        state.roots = vec![root];
        assert!(matches!(
            state.build(CacheBudget::unlimited().shared(), Path::new(".")),
            Err(StateError::Property { .. })
        ));
    }

    #[test]
    fn test_non_source_root_rejected() {
        let state = TreeState {
            roots: vec![node(FilterType::SpectrumPlot, vec![])],
            ..Default::default()
        };
        assert!(matches!(
            state.build(CacheBudget::unlimited().shared(), Path::new(".")),
            Err(StateError::Tree(TreeError::RootNotDataSource(_)))
        ));
    }

    #[test]
    fn test_unknown_property_is_skipped() {
        let mut fs = ExternalProgramFilter::new().write_state();
        fs.properties
            .insert("from_the_future".into(), PropertyValue::Bool(true));
        let mut filter = ExternalProgramFilter::new();
        assert!(fs.apply_common(&mut filter).is_ok());
    }

    #[test]
    fn test_save_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let state = TreeState::capture(&sample_tree()).unwrap();
        for name in ["tree.json", "nested/tree.toml"] {
            let path = dir.path().join(name);
            state.save(&path).unwrap();
            assert_eq!(TreeState::load(&path).unwrap(), state);
        }
        let toml_text = std::fs::read_to_string(dir.path().join("nested/tree.toml")).unwrap();
        assert!(toml_text.contains("[[roots]]"));
    }
}
