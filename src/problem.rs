//! Problem description for distributed constraint optimization.
//!
//! A [`Problem`] is a set of [`Variable`]s, each owned by one agent, and a set
//! of [`CostSpace`]s: hypercube tables mapping every assignment of their scope
//! to a cost (when minimizing) or a utility (when maximizing). Infeasible
//! assignments carry the sentinel returned by
//! [`infeasible_utility`](crate::utils::infeasible_utility).

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::{utils, DuctError, Result};

/// The type used for domain values
pub type Value = i64;

/// A decision variable owned by exactly one agent
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Unique name of the variable
    pub name: String,

    /// Name of the agent that owns the variable
    pub owner: String,

    /// Finite, ordered domain
    pub domain: Vec<Value>,
}

/// A cost (or utility) table over a set of variables
///
/// Utilities are stored row-major: the last variable of the scope varies
/// fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct CostSpace {
    name: String,
    scope: Vec<String>,
    domains: Vec<Vec<Value>>,
    utilities: Vec<f64>,
}

impl CostSpace {
    /// Creates a cost space from an explicit table
    ///
    /// Returns an error when the table size does not match the product of
    /// the domain sizes, or when scope and domains disagree in length.
    pub fn new(
        name: impl Into<String>,
        scope: Vec<String>,
        domains: Vec<Vec<Value>>,
        utilities: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        if scope.len() != domains.len() {
            return Err(DuctError::InvalidProblem(format!(
                "space {} has {} variables but {} domains",
                name,
                scope.len(),
                domains.len()
            )));
        }
        let expected: usize = domains.iter().map(Vec::len).product();
        if expected != utilities.len() {
            return Err(DuctError::InvalidProblem(format!(
                "space {} expects {} utilities, got {}",
                name,
                expected,
                utilities.len()
            )));
        }
        let distinct: HashSet<&String> = scope.iter().collect();
        if distinct.len() != scope.len() {
            return Err(DuctError::InvalidProblem(format!(
                "space {} has a repeated variable in its scope",
                name
            )));
        }
        Ok(CostSpace {
            name,
            scope,
            domains,
            utilities,
        })
    }

    /// Creates a cost space by evaluating `f` on every assignment of the scope
    ///
    /// `f` receives the values in scope order.
    pub fn from_fn<F>(
        name: impl Into<String>,
        scope: Vec<String>,
        domains: Vec<Vec<Value>>,
        mut f: F,
    ) -> Result<Self>
    where
        F: FnMut(&[Value]) -> f64,
    {
        let size: usize = domains.iter().map(Vec::len).product();
        let mut utilities = Vec::with_capacity(size);
        let mut indices = vec![0usize; domains.len()];
        let mut values: Vec<Value> = Vec::with_capacity(domains.len());
        for _ in 0..size {
            values.clear();
            values.extend(indices.iter().zip(&domains).map(|(&i, d)| d[i]));
            utilities.push(f(&values));
            // odometer increment, last variable fastest
            for pos in (0..indices.len()).rev() {
                indices[pos] += 1;
                if indices[pos] < domains[pos].len() {
                    break;
                }
                indices[pos] = 0;
            }
        }
        CostSpace::new(name, scope, domains, utilities)
    }

    /// Returns the name of the space
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the variables the space is defined over
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    /// Returns true if `variable` is in the scope of this space
    pub fn involves(&self, variable: &str) -> bool {
        self.scope.iter().any(|v| v == variable)
    }

    /// Returns the number of entries in the table
    pub fn len(&self) -> usize {
        self.utilities.len()
    }

    /// Returns true if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.utilities.is_empty()
    }

    /// Returns the raw table
    pub fn utilities(&self) -> &[f64] {
        &self.utilities
    }

    /// Looks up the utility of the assignment given as parallel slices
    ///
    /// `variables` may contain more variables than the scope. Returns `None`
    /// if a scope variable is missing or its value is not in its domain.
    pub fn utility(&self, variables: &[String], values: &[Value]) -> Option<f64> {
        let mut index = 0usize;
        for (var, domain) in self.scope.iter().zip(&self.domains) {
            let pos = variables.iter().position(|v| v == var)?;
            let value = *values.get(pos)?;
            let value_index = domain.iter().position(|&d| d == value)?;
            index = index * domain.len() + value_index;
        }
        self.utilities.get(index).copied()
    }

    /// Looks up the utility of a complete assignment held in a map
    pub fn utility_of(&self, assignment: &BTreeMap<String, Value>) -> Option<f64> {
        let mut index = 0usize;
        for (var, domain) in self.scope.iter().zip(&self.domains) {
            let value = assignment.get(var)?;
            let value_index = domain.iter().position(|d| d == value)?;
            index = index * domain.len() + value_index;
        }
        self.utilities.get(index).copied()
    }

    /// Blind projection: the best or worst entry of the table
    ///
    /// With `maximum` the largest entry is returned, otherwise the smallest.
    /// When `feasible_only` is set, infeasible entries are skipped and `None`
    /// is returned if no feasible entry exists; otherwise an infeasible
    /// extremum is returned as is.
    pub fn blind_project(&self, maximum: bool, feasible_only: bool) -> Option<f64> {
        self.utilities
            .iter()
            .copied()
            .filter(|u| !feasible_only || !utils::is_infeasible(*u))
            .fold(None, |acc: Option<f64>, u| match acc {
                None => Some(u),
                Some(best) if maximum && u > best => Some(u),
                Some(best) if !maximum && u < best => Some(u),
                keep => keep,
            })
    }

    /// Rescales every entry in place as `(u - shift) / divide`
    ///
    /// Infeasible entries are replaced by `(substitute - shift) / divide`
    /// when a substitute is given, and left infeasible otherwise.
    pub fn rescale(&mut self, shift: f64, divide: f64, substitute: Option<f64>) {
        for u in self.utilities.iter_mut() {
            if utils::is_infeasible(*u) {
                if let Some(penalty) = substitute {
                    *u = (penalty - shift) / divide;
                }
            } else {
                *u = (*u - shift) / divide;
            }
        }
    }
}

/// A complete DCOP instance: variables, their owners and the cost spaces
#[derive(Debug, Clone, Default)]
pub struct Problem {
    maximize: bool,
    variables: BTreeMap<String, Variable>,
    spaces: Vec<CostSpace>,
}

impl Problem {
    /// Creates an empty problem
    ///
    /// When `maximize` is true the spaces hold utilities to maximize,
    /// otherwise costs to minimize.
    pub fn new(maximize: bool) -> Self {
        Problem {
            maximize,
            variables: BTreeMap::new(),
            spaces: Vec::new(),
        }
    }

    /// Adds a variable owned by `owner`
    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        owner: impl Into<String>,
        domain: Vec<Value>,
    ) -> Result<()> {
        let name = name.into();
        if domain.is_empty() {
            return Err(DuctError::InvalidProblem(format!(
                "variable {} has an empty domain",
                name
            )));
        }
        if self.variables.contains_key(&name) {
            return Err(DuctError::InvalidProblem(format!(
                "variable {} declared twice",
                name
            )));
        }
        self.variables.insert(
            name.clone(),
            Variable {
                name,
                owner: owner.into(),
                domain,
            },
        );
        Ok(())
    }

    /// Adds a cost space; every variable of its scope must already exist
    pub fn add_space(&mut self, space: CostSpace) -> Result<()> {
        for (var, domain) in space.scope.iter().zip(&space.domains) {
            let variable = self
                .variables
                .get(var)
                .ok_or_else(|| DuctError::UnknownVariable(var.clone()))?;
            if &variable.domain != domain {
                return Err(DuctError::InvalidProblem(format!(
                    "space {} uses a domain for {} that differs from its declaration",
                    space.name, var
                )));
            }
        }
        self.spaces.push(space);
        Ok(())
    }

    /// Adds a binary cost space between two existing variables
    pub fn add_binary<F>(&mut self, name: impl Into<String>, x: &str, y: &str, f: F) -> Result<()>
    where
        F: Fn(Value, Value) -> f64,
    {
        let dx = self.domain(x)?.to_vec();
        let dy = self.domain(y)?.to_vec();
        let space = CostSpace::from_fn(
            name,
            vec![x.to_string(), y.to_string()],
            vec![dx, dy],
            |vals| f(vals[0], vals[1]),
        )?;
        self.add_space(space)
    }

    /// Adds a unary cost space on an existing variable
    pub fn add_unary<F>(&mut self, name: impl Into<String>, x: &str, f: F) -> Result<()>
    where
        F: Fn(Value) -> f64,
    {
        let dx = self.domain(x)?.to_vec();
        let space = CostSpace::from_fn(name, vec![x.to_string()], vec![dx], |vals| f(vals[0]))?;
        self.add_space(space)
    }

    /// Returns true when the problem is a maximization problem
    pub fn maximize(&self) -> bool {
        self.maximize
    }

    /// Returns all variables in name order
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// Returns the number of variables
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Returns all cost spaces
    pub fn spaces(&self) -> &[CostSpace] {
        &self.spaces
    }

    /// Returns a variable by name
    pub fn variable(&self, name: &str) -> Result<&Variable> {
        self.variables
            .get(name)
            .ok_or_else(|| DuctError::UnknownVariable(name.to_string()))
    }

    /// Returns the domain of a variable
    pub fn domain(&self, name: &str) -> Result<&[Value]> {
        Ok(&self.variable(name)?.domain)
    }

    /// Returns the agent owning a variable
    pub fn owner(&self, name: &str) -> Result<&str> {
        Ok(&self.variable(name)?.owner)
    }

    /// Returns the names of all agents, sorted
    pub fn agents(&self) -> Vec<String> {
        let agents: BTreeSet<&String> = self.variables.values().map(|v| &v.owner).collect();
        agents.into_iter().cloned().collect()
    }

    /// Returns the names of the variables owned by `agent`, sorted
    pub fn variables_of(&self, agent: &str) -> Vec<String> {
        self.variables
            .values()
            .filter(|v| v.owner == agent)
            .map(|v| v.name.clone())
            .collect()
    }

    /// Returns the names of the neighbours of a variable in the constraint graph, sorted
    pub fn neighbours(&self, name: &str) -> BTreeSet<String> {
        self.spaces
            .iter()
            .filter(|s| s.involves(name))
            .flat_map(|s| s.scope.iter())
            .filter(|v| v.as_str() != name)
            .cloned()
            .collect()
    }

    /// Returns the spaces `variable` is responsible for enforcing
    ///
    /// A variable enforces the spaces that involve it and none of the
    /// variables in `below` (its children and pseudo-children).
    pub fn spaces_enforced_by(&self, variable: &str, below: &HashSet<String>) -> Vec<CostSpace> {
        self.spaces
            .iter()
            .filter(|s| s.involves(variable) && !s.scope.iter().any(|v| below.contains(v)))
            .cloned()
            .collect()
    }

    /// Evaluates the total cost of a complete assignment on the original spaces
    ///
    /// Returns `None` if a variable of some space is not assigned.
    pub fn evaluate(&self, assignment: &BTreeMap<String, Value>) -> Option<f64> {
        self.spaces
            .iter()
            .map(|s| s.utility_of(assignment))
            .sum::<Option<f64>>()
    }
}
