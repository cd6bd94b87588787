// Dependency Graph Builder
// Builds the operation DAG from references and explicit dependencies, plus the group-level view

use crate::reference::ParameterBuilder;
use crate::request::models::{ErrorKind, ExecutionMode, OpKey, TransactionsRequest, Verb};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// `depends_on` names an operation that is not in the request
    UnknownDependency,
    /// Duplicate or otherwise unusable ids
    InvalidStructure,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::CyclicDependency,
        }
    }

    pub fn unknown_dependency(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownDependency,
        }
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidStructure,
        }
    }

    pub fn error_kind(&self) -> ErrorKind {
        match self.kind {
            GraphErrorKind::CyclicDependency => ErrorKind::CyclicDependency,
            GraphErrorKind::UnknownDependency => ErrorKind::UnknownDependency,
            GraphErrorKind::InvalidStructure => ErrorKind::DuplicateId,
        }
    }
}

/// Dependency graph over every operation of one request
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Groups in request order
    pub groups: Vec<GroupNode>,
    group_indices: HashMap<String, usize>,
    /// Operations flattened in request order
    pub operations: Vec<OperationNode>,
    operation_indices: HashMap<OpKey, usize>,
}

#[derive(Debug, Clone)]
pub struct GroupNode {
    pub id: String,
    /// Position in the request
    pub index: usize,
    pub execution_mode: ExecutionMode,
    /// Indices into `DependencyGraph::operations`
    pub operations: Vec<usize>,
    /// Groups holding operations this group references
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OperationNode {
    pub key: OpKey,
    /// Position in the flattened request, used as the stable tie-break
    pub index: usize,
    /// Index of the owning group
    pub group: usize,
    pub verb: Verb,
    /// Operations that must complete first, in request order
    pub dependencies: Vec<OpKey>,
}

impl DependencyGraph {
    /// Build and validate the graph for a request
    pub fn from_request(request: &TransactionsRequest) -> Result<Self, GraphError> {
        let mut groups = Vec::with_capacity(request.transactions.len());
        let mut group_indices = HashMap::new();
        let mut operations = Vec::with_capacity(request.operation_count());
        let mut operation_indices = HashMap::new();

        for (gi, group) in request.transactions.iter().enumerate() {
            if group_indices.insert(group.id.clone(), gi).is_some() {
                return Err(GraphError::invalid_structure(format!(
                    "duplicate transaction id '{}'",
                    group.id
                )));
            }

            let mut members = Vec::with_capacity(group.operations.len());
            for op in &group.operations {
                let key = OpKey::new(&group.id, &op.id);
                let index = operations.len();
                if operation_indices.insert(key.clone(), index).is_some() {
                    return Err(GraphError::invalid_structure(format!(
                        "duplicate operation id '{}'",
                        key
                    )));
                }
                members.push(index);
                operations.push(OperationNode {
                    key,
                    index,
                    group: gi,
                    verb: op.verb,
                    dependencies: Vec::new(),
                });
            }

            groups.push(GroupNode {
                id: group.id.clone(),
                index: gi,
                execution_mode: group.execution_mode,
                operations: members,
                dependencies: Vec::new(),
            });
        }

        // Edges from references and depends_on
        for group in &request.transactions {
            for op in &group.operations {
                let key = OpKey::new(&group.id, &op.id);
                let mut dependencies = Self::calculate_dependencies(
                    op.depends_on.as_slice(),
                    &op.params,
                    &key,
                    &operation_indices,
                )?;
                dependencies.sort_by_key(|dep| operation_indices[dep]);
                dependencies.dedup();

                let index = operation_indices[&key];
                operations[index].dependencies = dependencies;
            }
        }

        // Group-level edges from cross-group dependencies
        for group in groups.iter_mut() {
            let mut deps: Vec<usize> = group
                .operations
                .iter()
                .flat_map(|&i| operations[i].dependencies.iter())
                .filter(|dep| dep.tx_id != group.id)
                .map(|dep| group_indices[&dep.tx_id])
                .collect();
            deps.sort_unstable();
            deps.dedup();
            group.dependencies = deps
                .into_iter()
                .map(|gi| request.transactions[gi].id.clone())
                .collect();
        }

        let graph = Self {
            groups,
            group_indices,
            operations,
            operation_indices,
        };

        graph.validate()?;

        Ok(graph)
    }

    /// References to operations outside the request are not edges; they fail
    /// at resolution time as unresolved references
    fn calculate_dependencies(
        depends_on: &[String],
        params: &serde_json::Value,
        key: &OpKey,
        known: &HashMap<OpKey, usize>,
    ) -> Result<Vec<OpKey>, GraphError> {
        let mut deps: Vec<OpKey> = ParameterBuilder::extract(params)
            .iter()
            .map(|reference| reference.target(&key.tx_id))
            .filter(|target| known.contains_key(target))
            .collect();

        for dependency in depends_on {
            match OpKey::parse_dependency(dependency, &key.tx_id) {
                Some(target) if known.contains_key(&target) => deps.push(target),
                _ => {
                    return Err(GraphError::unknown_dependency(format!(
                        "operation '{}' depends on unknown operation '{}'",
                        key, dependency
                    )))
                }
            }
        }

        Ok(deps)
    }

    /// Validate the graph (cycles between operations, then between groups)
    pub fn validate(&self) -> Result<(), GraphError> {
        self.detect_operation_cycles()?;
        self.detect_group_cycles()?;
        Ok(())
    }

    /// Detect cycles in operation dependencies using DFS
    fn detect_operation_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for node in &self.operations {
            if !visited.contains(&node.index) {
                if let Some(cycle) = self.dfs_operation_cycle(node, &mut visited, &mut rec_stack) {
                    return Err(GraphError::cyclic(format!(
                        "circular dependency detected between operations: {}",
                        cycle.join(" -> ")
                    )));
                }
            }
        }

        Ok(())
    }

    fn dfs_operation_cycle(
        &self,
        node: &OperationNode,
        visited: &mut HashSet<usize>,
        rec_stack: &mut HashSet<usize>,
    ) -> Option<Vec<String>> {
        visited.insert(node.index);
        rec_stack.insert(node.index);

        for dep in &node.dependencies {
            let dep_index = self.operation_indices[dep];
            if !visited.contains(&dep_index) {
                if let Some(mut cycle) =
                    self.dfs_operation_cycle(&self.operations[dep_index], visited, rec_stack)
                {
                    cycle.insert(0, node.key.to_string());
                    return Some(cycle);
                }
            } else if rec_stack.contains(&dep_index) {
                return Some(vec![node.key.to_string(), dep.to_string()]);
            }
        }

        rec_stack.remove(&node.index);
        None
    }

    /// Groups wait for the commit of the groups they reference, so a cycle
    /// between groups would deadlock even when the operations are acyclic
    fn detect_group_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for group in &self.groups {
            if !visited.contains(&group.index) {
                if let Some(cycle) = self.dfs_group_cycle(group, &mut visited, &mut rec_stack) {
                    return Err(GraphError::cyclic(format!(
                        "circular dependency detected between transaction groups: {}",
                        cycle.join(" -> ")
                    )));
                }
            }
        }

        Ok(())
    }

    fn dfs_group_cycle(
        &self,
        group: &GroupNode,
        visited: &mut HashSet<usize>,
        rec_stack: &mut HashSet<usize>,
    ) -> Option<Vec<String>> {
        visited.insert(group.index);
        rec_stack.insert(group.index);

        for dep in &group.dependencies {
            let dep_index = self.group_indices[dep];
            if !visited.contains(&dep_index) {
                if let Some(mut cycle) =
                    self.dfs_group_cycle(&self.groups[dep_index], visited, rec_stack)
                {
                    cycle.insert(0, group.id.clone());
                    return Some(cycle);
                }
            } else if rec_stack.contains(&dep_index) {
                return Some(vec![group.id.clone(), dep.clone()]);
            }
        }

        rec_stack.remove(&group.index);
        None
    }

    /// Get a group by id
    pub fn group(&self, id: &str) -> Option<&GroupNode> {
        self.group_indices.get(id).map(|&idx| &self.groups[idx])
    }

    /// Get an operation by key
    pub fn operation(&self, key: &OpKey) -> Option<&OperationNode> {
        self.operation_indices.get(key).map(|&idx| &self.operations[idx])
    }

    /// Groups in dependency order, ties broken by request order
    pub fn group_order(&self) -> Vec<&GroupNode> {
        let members: Vec<usize> = (0..self.groups.len()).collect();
        stable_topological(&members, |gi| {
            self.groups[gi]
                .dependencies
                .iter()
                .map(|dep| self.group_indices[dep])
                .collect()
        })
        .into_iter()
        .map(|gi| &self.groups[gi])
        .collect()
    }

    /// Operations of one group in dependency order, ties broken by request order
    pub fn operation_order(&self, group: &GroupNode) -> Vec<&OperationNode> {
        stable_topological(&group.operations, |i| self.dependency_indices(i))
            .into_iter()
            .map(|i| &self.operations[i])
            .collect()
    }

    /// Operations of one group bucketed into levels that may run together
    pub fn parallel_operations(&self, group: &GroupNode) -> Vec<Vec<&OperationNode>> {
        let mut levels: Vec<Vec<&OperationNode>> = Vec::new();
        let mut assigned: HashMap<usize, usize> = HashMap::new();

        for node in self.operation_order(group) {
            let level = self
                .dependency_indices(node.index)
                .iter()
                .filter_map(|dep| assigned.get(dep))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);

            assigned.insert(node.index, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(node);
        }

        levels
    }

    fn dependency_indices(&self, index: usize) -> Vec<usize> {
        self.operations[index]
            .dependencies
            .iter()
            .map(|dep| self.operation_indices[dep])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Kahn's algorithm restricted to `members`, always releasing the lowest index first
fn stable_topological(members: &[usize], dependencies: impl Fn(usize) -> Vec<usize>) -> Vec<usize> {
    let member_set: HashSet<usize> = members.iter().copied().collect();
    let mut in_degree: HashMap<usize, usize> = members.iter().map(|&m| (m, 0)).collect();
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();

    for &member in members {
        for dep in dependencies(member) {
            if member_set.contains(&dep) {
                dependents.entry(dep).or_default().push(member);
                *in_degree.entry(member).or_insert(0) += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&member, _)| Reverse(member))
        .collect();

    let mut order = Vec::with_capacity(members.len());
    while let Some(Reverse(member)) = ready.pop() {
        order.push(member);
        if let Some(next) = dependents.get(&member) {
            for &dependent in next {
                if let Some(deg) = in_degree.get_mut(&dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }
    }

    order
}
