//! Test data builders for creating filter trees

use ionflow::pipeline::filters::{DataLoadFilter, RangeFilter};
use ionflow::pipeline::{CacheBudget, Filter, FilterId, FilterTree, PropertyValue};
use ionflow::IonHit;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Ranges splitting the synthetic `0..100` values into 10 and 14 ions
pub const SPLIT_RANGES: &str = "Bl:0..9;Pl:20..33";

/// Builder for filter trees hanging off one synthetic source
pub struct TreeBuilder {
    tree: FilterTree,
    source: FilterId,
}

impl TreeBuilder {
    /// `count` synthetic ions with values `0..count`, unlimited cache
    pub fn synthetic(count: usize) -> Self {
        Self::with_budget(count, CacheBudget::unlimited())
    }

    pub fn with_budget(count: usize, budget: CacheBudget) -> Self {
        let mut tree = FilterTree::new(budget.shared());
        let source = tree
            .add_filter(Box::new(DataLoadFilter::synthetic(count)), None)
            .unwrap();
        Self { tree, source }
    }

    pub fn source(&self) -> FilterId {
        self.source
    }

    /// Add `filter` below `parent` (the source when `None`)
    pub fn add(&mut self, filter: impl Filter + 'static, parent: Option<FilterId>) -> FilterId {
        self.tree
            .add_filter(Box::new(filter), Some(parent.unwrap_or(self.source)))
            .unwrap()
    }

    /// Set a property, panicking on rejection
    pub fn set(&mut self, id: FilterId, key: &str, value: impl Into<PropertyValue>) -> &mut Self {
        self.tree
            .set_filter_property(id, key, &value.into())
            .unwrap();
        self
    }

    /// Finish with an empty undo history
    pub fn build(mut self) -> FilterTree {
        self.tree.clear_history();
        self.tree
    }
}

/// 100 synthetic ions split by [`SPLIT_RANGES`]: `(tree, source, range)`
pub fn range_split_tree() -> (FilterTree, FilterId, FilterId) {
    let mut builder = TreeBuilder::synthetic(100);
    let range = builder.add(RangeFilter::new(), None);
    builder.set(range, "ranges", SPLIT_RANGES);
    let source = builder.source();
    (builder.build(), source, range)
}

/// Write hits in the `x y z value` text format
pub fn write_ion_file(dir: &Path, name: &str, hits: &[IonHit]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "# x y z value").unwrap();
    for hit in hits {
        writeln!(
            file,
            "{} {} {} {}",
            hit.pos[0], hit.pos[1], hit.pos[2], hit.value
        )
        .unwrap();
    }
    path
}

/// `count` hits along the x axis with value equal to the index
pub fn line_of_hits(count: usize) -> Vec<IonHit> {
    (0..count)
        .map(|i| IonHit::new(i as f32, 0.0, 0.0, i as f32))
        .collect()
}
