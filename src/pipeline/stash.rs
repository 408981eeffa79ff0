//! Named copies of filter subtrees kept aside for later reuse.

use crate::pipeline::filter::Filter;

/// A filter with its configured children, outside any tree.
#[derive(Debug)]
pub struct StashNode {
    filter: Box<dyn Filter>,
    children: Vec<StashNode>,
}

impl StashNode {
    pub(crate) fn new(filter: Box<dyn Filter>, children: Vec<StashNode>) -> Self {
        Self { filter, children }
    }

    pub fn filter(&self) -> &dyn Filter {
        self.filter.as_ref()
    }

    pub fn children(&self) -> &[StashNode] {
        &self.children
    }

    /// Filters in this subtree.
    pub fn num_filters(&self) -> usize {
        1 + self.children.iter().map(StashNode::num_filters).sum::<usize>()
    }

    /// Configuration-only deep copy.
    pub fn clone_config(&self) -> StashNode {
        StashNode {
            filter: self.filter.clone_config(),
            children: self.children.iter().map(StashNode::clone_config).collect(),
        }
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Filter>, Vec<StashNode>) {
        (self.filter, self.children)
    }

    /// Remove hazardous descendants; returns how many filters went.
    pub(crate) fn strip_hazardous_children(&mut self) -> usize {
        let mut removed = 0;
        self.children.retain(|c| {
            if c.filter.can_be_hazardous() {
                removed += c.num_filters();
                false
            } else {
                true
            }
        });
        for child in &mut self.children {
            removed += child.strip_hazardous_children();
        }
        removed
    }

    pub(crate) fn has_hazardous(&self) -> bool {
        self.filter.can_be_hazardous() || self.children.iter().any(StashNode::has_hazardous)
    }
}

#[derive(Debug)]
pub struct Stash {
    name: String,
    root: StashNode,
}

impl Stash {
    pub(crate) fn new(name: String, root: StashNode) -> Self {
        Self { name, root }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &StashNode {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut StashNode {
        &mut self.root
    }
}
