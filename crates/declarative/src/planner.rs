//! Execution planner - turns a declared task list into dependency layers

use std::collections::HashMap;

use crate::error::GraphError;
use crate::types::{DependsOn, Task, TaskKind};

/// An immutable plan: tasks in declaration order, grouped into layers
///
/// Layer 0 holds tasks without dependencies; layer k holds tasks whose
/// dependencies all live in layers below k. Within a layer, indices are
/// kept in declaration order.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    tasks: Vec<Task>,
    layers: Vec<Vec<usize>>,
}

/// Build an execution plan, validating names, references and acyclicity
pub fn build(tasks: Vec<Task>) -> Result<ExecutionPlan, GraphError> {
    ExecutionPlan::build(tasks)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl ExecutionPlan {
    pub fn build(tasks: Vec<Task>) -> Result<Self, GraphError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.name.as_str(), i).is_some() {
                return Err(GraphError::DuplicateTask {
                    name: task.name.clone(),
                });
            }
        }

        let edges = resolve_edges(&tasks, &index)?;
        let order = topological_order(&tasks, &edges)?;

        let mut depth = vec![0usize; tasks.len()];
        for &i in &order {
            depth[i] = edges[i].iter().map(|&d| depth[d] + 1).max().unwrap_or(0);
        }

        let layer_count = depth.iter().max().map_or(0, |d| d + 1);
        let mut layers = vec![Vec::new(); layer_count];
        for (i, &d) in depth.iter().enumerate() {
            layers[d].push(i);
        }

        log::debug!(
            "Planned {} tasks into {} layers",
            tasks.len(),
            layers.len()
        );

        Ok(Self { tasks, layers })
    }

    /// Tasks in declaration order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Layers as indices into [`tasks`](Self::tasks)
    pub fn layers(&self) -> &[Vec<usize>] {
        &self.layers
    }

    /// Layers as task names
    pub fn layer_names(&self) -> Vec<Vec<&str>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&i| self.tasks[i].name.as_str()).collect())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pairs of tasks in the same layer that touch the same resource
    ///
    /// Not enforced by the engine: whoever declares dependencies must keep
    /// such tasks in different layers. Callers use this to warn.
    pub fn shared_resource_conflicts(&self) -> Vec<(String, String, String)> {
        let mut conflicts = Vec::new();
        for layer in &self.layers {
            let mut seen: HashMap<String, usize> = HashMap::new();
            for &i in layer {
                let Some(key) = resource_key(&self.tasks[i]) else {
                    continue;
                };
                if let Some(&first) = seen.get(&key) {
                    conflicts.push((
                        self.tasks[first].name.clone(),
                        self.tasks[i].name.clone(),
                        key,
                    ));
                } else {
                    seen.insert(key, i);
                }
            }
        }
        conflicts
    }
}

/// Resolve each task's dependencies to indices; implicit tasks follow
/// their predecessor in declaration order
fn resolve_edges(
    tasks: &[Task],
    index: &HashMap<&str, usize>,
) -> Result<Vec<Vec<usize>>, GraphError> {
    tasks
        .iter()
        .enumerate()
        .map(|(i, task)| match &task.depends_on {
            DependsOn::Implicit => Ok(i.checked_sub(1).into_iter().collect()),
            DependsOn::Explicit(names) => names
                .iter()
                .map(|name| {
                    index
                        .get(name.as_str())
                        .copied()
                        .ok_or_else(|| GraphError::UnknownDependency {
                            task: task.name.clone(),
                            missing: name.clone(),
                        })
                })
                .collect(),
        })
        .collect()
}

/// Depth-first traversal with three-colour marking; a back-edge to an
/// in-progress node is a cycle. Returns dependencies-first order.
fn topological_order(tasks: &[Task], edges: &[Vec<usize>]) -> Result<Vec<usize>, GraphError> {
    let mut marks = vec![Mark::Unvisited; tasks.len()];
    let mut order = Vec::with_capacity(tasks.len());
    let mut path = Vec::new();

    for root in 0..tasks.len() {
        if marks[root] == Mark::Unvisited {
            visit(root, tasks, edges, &mut marks, &mut path, &mut order)?;
        }
    }

    Ok(order)
}

fn visit(
    node: usize,
    tasks: &[Task],
    edges: &[Vec<usize>],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), GraphError> {
    marks[node] = Mark::InProgress;
    path.push(node);

    for &dep in &edges[node] {
        match marks[dep] {
            Mark::Done => {}
            Mark::Unvisited => visit(dep, tasks, edges, marks, path, order)?,
            Mark::InProgress => {
                let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                return Err(GraphError::CyclicDependency {
                    involved_tasks: path[start..]
                        .iter()
                        .map(|&n| tasks[n].name.clone())
                        .collect(),
                });
            }
        }
    }

    path.pop();
    marks[node] = Mark::Done;
    order.push(node);
    Ok(())
}

/// Identity of the underlying resource a task touches, if known
fn resource_key(task: &Task) -> Option<String> {
    let p = &task.parameters;
    let get = |key: &str| p.opt_str(key).ok().flatten();
    match task.kind {
        TaskKind::FileFromTemplate => get("dest").map(|d| format!("file:{d}")),
        TaskKind::LineInFile => get("path").map(|d| format!("file:{d}")),
        TaskKind::CommandIfAbsent => get("creates").map(|d| format!("file:{d}")),
        TaskKind::Package => get("name").map(|n| format!("package:{n}")),
        TaskKind::Service => get("name").map(|n| format!("service:{n}")),
        TaskKind::DbCreate => get("name").map(|n| format!("database:{n}")),
        TaskKind::DbUserGrant => {
            let user = get("user")?;
            let host = get("host_pattern").unwrap_or_else(|| "localhost".to_string());
            Some(format!("db-user:{user}@{host}"))
        }
    }
}
