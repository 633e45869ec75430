//! Pseudo-tree views consumed by the protocol
//!
//! Every variable learns its place in the DFS pseudo-tree through one
//! [`DfsView`]. Building the pseudo-tree is not part of the protocol; the
//! [`PseudoTree::generate`] helper computes a deterministic one so the
//! in-process solver and the tests have something to feed the agents.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::{problem::Problem, DuctError, Result};

/// The neighbourhood of one variable in the pseudo-tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DfsView {
    /// Tree parent, `None` for the root of a component
    pub parent: Option<String>,

    /// Tree children
    pub children: Vec<String>,

    /// Ancestors (other than the parent) sharing a constraint with the variable
    pub pseudo_parents: Vec<String>,

    /// Descendants (other than the children) sharing a constraint with the variable
    pub pseudo_children: Vec<String>,
}

impl DfsView {
    /// Returns true if the variable is the root of its component
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns true if the variable has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns the separator: pseudo-parents and parent
    pub fn separator(&self) -> BTreeSet<String> {
        self.pseudo_parents
            .iter()
            .chain(self.parent.iter())
            .cloned()
            .collect()
    }

    /// Returns children and pseudo-children
    pub fn below(&self) -> HashSet<String> {
        self.children
            .iter()
            .chain(self.pseudo_children.iter())
            .cloned()
            .collect()
    }
}

/// A DFS pseudo-tree over the constraint graph of a problem
#[derive(Debug, Clone, Default)]
pub struct PseudoTree {
    views: BTreeMap<String, DfsView>,
    roots: Vec<String>,
}

impl PseudoTree {
    /// Builds a pseudo-tree from explicit views
    ///
    /// Checks that parent and child links agree.
    pub fn from_views(views: BTreeMap<String, DfsView>) -> Result<Self> {
        for (var, view) in &views {
            for child in &view.children {
                let child_view = views
                    .get(child)
                    .ok_or_else(|| DuctError::UnknownVariable(child.clone()))?;
                if child_view.parent.as_deref() != Some(var.as_str()) {
                    return Err(DuctError::InvalidProblem(format!(
                        "{} lists {} as a child but its parent is {:?}",
                        var, child, child_view.parent
                    )));
                }
            }
        }
        let roots = views
            .iter()
            .filter(|(_, v)| v.is_root())
            .map(|(k, _)| k.clone())
            .collect();
        Ok(PseudoTree { views, roots })
    }

    /// Computes a DFS pseudo-tree of the constraint graph
    ///
    /// Components are rooted at their smallest variable name and neighbours
    /// are explored in name order, so the result is deterministic.
    pub fn generate(problem: &Problem) -> Self {
        let mut views: BTreeMap<String, DfsView> = problem
            .variables()
            .map(|v| (v.name.clone(), DfsView::default()))
            .collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut roots = Vec::new();

        let names: Vec<String> = views.keys().cloned().collect();
        for root in names {
            if visited.contains(&root) {
                continue;
            }
            roots.push(root.clone());
            visited.insert(root.clone());

            // explicit stack of (variable, remaining neighbours)
            let mut path: Vec<String> = vec![root.clone()];
            let mut pending: Vec<Vec<String>> =
                vec![problem.neighbours(&root).into_iter().rev().collect()];

            while let Some(next) = pending.last_mut().and_then(|n| n.pop()) {
                let current = path[path.len() - 1].clone();
                if !visited.contains(&next) {
                    visited.insert(next.clone());
                    if let Some(view) = views.get_mut(&current) {
                        view.children.push(next.clone());
                    }
                    if let Some(view) = views.get_mut(&next) {
                        view.parent = Some(current.clone());
                    }
                    pending.push(problem.neighbours(&next).into_iter().rev().collect());
                    path.push(next);
                } else {
                    let is_parent = views
                        .get(&current)
                        .and_then(|v| v.parent.as_ref())
                        .map_or(false, |p| p == &next);
                    let is_ancestor = path[..path.len() - 1].contains(&next);
                    if is_ancestor && !is_parent {
                        if let Some(view) = views.get_mut(&current) {
                            view.pseudo_parents.push(next.clone());
                        }
                        if let Some(view) = views.get_mut(&next) {
                            view.pseudo_children.push(current.clone());
                        }
                    }
                }
                while pending.last().map_or(false, Vec::is_empty) {
                    pending.pop();
                    path.pop();
                }
            }
        }

        PseudoTree { views, roots }
    }

    /// Returns the view of a variable
    pub fn view(&self, variable: &str) -> Result<&DfsView> {
        self.views
            .get(variable)
            .ok_or_else(|| DuctError::UnknownVariable(variable.to_string()))
    }

    /// Returns all views, keyed by variable name
    pub fn views(&self) -> &BTreeMap<String, DfsView> {
        &self.views
    }

    /// Returns the roots, one per connected component
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Returns the variables of each connected component
    pub fn components(&self) -> Vec<Vec<String>> {
        self.roots
            .iter()
            .map(|root| {
                let mut component = Vec::new();
                let mut stack = vec![root.clone()];
                while let Some(var) = stack.pop() {
                    if let Some(view) = self.views.get(&var) {
                        stack.extend(view.children.iter().cloned());
                    }
                    component.push(var);
                }
                component
            })
            .collect()
    }
}
