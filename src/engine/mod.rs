//! The task graph.
//!
//! A [`TaskDef`] is a named unit of work with an ordered list of
//! dependencies. Task definitions are collected in a [`Blueprint`] and frozen
//! into a [`TaskGraph`]. Running a task first *plans* it: the subgraph
//! reachable from the requested task is laid out as a `petgraph` DAG, and
//! any cycle (a task naming itself included) is reported as a
//! [`ConfigError`] before a single task body executes.
//!
//! ## Dependencies
//!
//! * `depends_on` lists prerequisites that may run side by side.
//! * `series` lists prerequisites that run one after another, after all of
//!   the `depends_on` ones have finished.
//!
//! The task's own work starts once every prerequisite is done.

mod runner;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::Environment;
use crate::error::{ConfigError, TaskError};

pub use runner::{Diagnostics, Runner, TaskExecution};

#[cfg(feature = "server")]
pub(crate) use runner::http::{self, Site};
#[cfg(feature = "live")]
pub use runner::reload::ReloadBridge;
#[cfg(feature = "live")]
pub use runner::watch::{WatchRule, watch};

/// Task body.
pub type TaskFn = Arc<dyn Fn(&TaskContext<'_>) -> Result<Work, TaskError> + Send + Sync>;

/// Long running work handed back to the runner.
pub type DaemonFn = Box<dyn FnOnce() -> Result<(), TaskError> + Send>;

/// What a task body leaves behind once it returns.
pub enum Work {
    /// The task is complete.
    Done,
    /// The task keeps running (a watcher, a server). The runner moves it to
    /// its own thread, lets dependents proceed, and waits on it at the end.
    Daemon(DaemonFn),
}

impl Work {
    pub fn daemon<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        Work::Daemon(Box::new(f))
    }
}

/// The context passed to every task body.
pub struct TaskContext<'a> {
    /// Profile, globs, manifest and the failure policy.
    pub env: &'a Arc<Environment>,
    /// The runner executing this task, for tasks that trigger other tasks.
    pub runner: &'a Runner,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl TaskContext<'_> {
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

type Name = Cow<'static, str>;

/// A task descriptor.
pub struct TaskDef {
    pub(crate) name: Name,
    pub(crate) about: Option<&'static str>,
    pub(crate) parallel: Vec<Name>,
    pub(crate) series: Vec<Name>,
    pub(crate) func: Option<TaskFn>,
}

impl TaskDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn about(&self) -> Option<&'static str> {
        self.about
    }

    /// Every dependency, parallel ones first.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.parallel.iter().chain(&self.series).map(|n| n.as_ref())
    }
}

/// Collects task definitions.
#[derive(Default)]
pub struct Blueprint {
    defs: Vec<TaskDef>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts defining a task.
    pub fn task(&mut self, name: impl Into<Name>) -> TaskBuilder<'_> {
        TaskBuilder {
            blueprint: self,
            def: TaskDef {
                name: name.into(),
                about: None,
                parallel: Vec::new(),
                series: Vec::new(),
                func: None,
            },
        }
    }

    /// Freezes the definitions. Duplicate names and references to undefined
    /// tasks are rejected here; cycles are rejected when a task is planned.
    pub fn finish(self) -> Result<TaskGraph, ConfigError> {
        let mut index = HashMap::new();

        for (i, def) in self.defs.iter().enumerate() {
            if index.insert(def.name.to_string(), i).is_some() {
                return Err(ConfigError::DuplicateTask(def.name.to_string()));
            }
        }

        for def in &self.defs {
            for dependency in def.dependencies() {
                if !index.contains_key(dependency) {
                    return Err(ConfigError::MissingDependency {
                        task: def.name.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }
        }

        Ok(TaskGraph {
            defs: self.defs,
            index,
        })
    }
}

pub struct TaskBuilder<'a> {
    blueprint: &'a mut Blueprint,
    def: TaskDef,
}

impl TaskBuilder<'_> {
    /// One line description shown by `--list`.
    pub fn about(mut self, about: &'static str) -> Self {
        self.def.about = Some(about);
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Name>,
    {
        self.def.parallel.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn series<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Name>,
    {
        self.def.series.extend(names.into_iter().map(Into::into));
        self
    }

    /// Registers the task with a body.
    pub fn run<F>(mut self, func: F)
    where
        F: Fn(&TaskContext<'_>) -> Result<Work, TaskError> + Send + Sync + 'static,
    {
        self.def.func = Some(Arc::new(func));
        self.blueprint.defs.push(self.def);
    }

    /// Registers a task that only aggregates its dependencies.
    pub fn group(self) {
        self.blueprint.defs.push(self.def);
    }
}

/// Frozen set of task definitions.
pub struct TaskGraph {
    defs: Vec<TaskDef>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    pub fn get(&self, name: &str) -> Option<&TaskDef> {
        self.index.get(name).map(|&i| &self.defs[i])
    }

    /// Definitions in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDef> {
        self.defs.iter()
    }

    fn lookup(&self, name: &str) -> Result<usize, ConfigError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownTask(name.to_string()))
    }

    /// Lays out everything `name` needs as an acyclic execution graph.
    pub fn plan(&self, name: &str) -> Result<Plan, ConfigError> {
        let root = self.lookup(name)?;

        let mut graph: Graph<usize, ()> = Graph::new();
        let mut nodes: HashMap<usize, NodeIndex> = HashMap::new();
        let mut stack = vec![root];

        while let Some(task) = stack.pop() {
            if nodes.contains_key(&task) {
                continue;
            }
            nodes.insert(task, graph.add_node(task));

            for dependency in self.defs[task].dependencies() {
                stack.push(self.lookup(dependency)?);
            }
        }

        for (&task, &node) in &nodes {
            let def = &self.defs[task];
            let parallel: Vec<_> = def
                .parallel
                .iter()
                .map(|n| self.lookup(n).map(|i| nodes[&i]))
                .collect::<Result<_, _>>()?;
            let series: Vec<_> = def
                .series
                .iter()
                .map(|n| self.lookup(n).map(|i| nodes[&i]))
                .collect::<Result<_, _>>()?;

            for &dependency in parallel.iter().chain(&series) {
                graph.update_edge(dependency, node, ());
            }

            // series steps wait for every parallel step and for their predecessor
            if let Some(&first) = series.first() {
                for &dependency in &parallel {
                    graph.update_edge(dependency, first, ());
                }
            }
            for pair in series.windows(2) {
                graph.update_edge(pair[0], pair[1], ());
            }
        }

        let order = petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| ConfigError::Cycle(self.defs[graph[cycle.node_id()]].name.to_string()))?;

        Ok(Plan {
            graph,
            order,
            root: nodes[&root],
        })
    }

    /// Plans every task and returns the ones that can't be planned.
    pub fn validate(&self) -> Vec<(String, ConfigError)> {
        self.defs
            .iter()
            .filter_map(|def| {
                self.plan(&def.name)
                    .err()
                    .map(|e| (def.name.to_string(), e))
            })
            .collect()
    }

    pub(crate) fn def(&self, index: usize) -> &TaskDef {
        &self.defs[index]
    }
}

/// The execution graph of one invocation. Nodes hold indices into the
/// [`TaskGraph`], edges point from a prerequisite to its dependent.
pub struct Plan {
    pub(crate) graph: Graph<usize, ()>,
    pub(crate) order: Vec<NodeIndex>,
    pub(crate) root: NodeIndex,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Task names in a valid execution order.
    pub fn names<'g>(&'g self, tasks: &'g TaskGraph) -> impl Iterator<Item = &'g str> {
        self.order
            .iter()
            .map(move |&node| tasks.def(self.graph[node]).name())
    }

    /// Renders the plan as a Mermaid diagram.
    pub fn display<'g>(&'g self, tasks: &'g TaskGraph) -> impl Display + 'g {
        PlanDisplay { plan: self, tasks }
    }
}

struct PlanDisplay<'g> {
    plan: &'g Plan,
    tasks: &'g TaskGraph,
}

impl Display for PlanDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = &self.plan.graph;
        writeln!(f, "graph LR")?;

        for &index in &self.plan.order {
            let name = self.tasks.def(graph[index]).name().replace('"', "\\\"");
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;

            if index == self.plan.root {
                writeln!(f, "    style {:?} stroke-width:3px", index.index())?;
            }
        }

        for edge in graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(bp: &mut Blueprint, name: &'static str, deps: &[&'static str]) {
        bp.task(name)
            .depends_on(deps.iter().copied())
            .run(|_| Ok(Work::Done));
    }

    fn position(plan: &Plan, graph: &TaskGraph, name: &str) -> usize {
        plan.names(graph).position(|n| n == name).unwrap()
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut bp = Blueprint::new();
        noop(&mut bp, "clean", &[]);
        noop(&mut bp, "copy", &[]);
        bp.task("build").depends_on(["clean", "build", "copy"]).group();
        let graph = bp.finish().unwrap();

        match graph.plan("build") {
            Err(ConfigError::Cycle(name)) => assert_eq!(name, "build"),
            other => panic!("expected a cycle, got {:?}", other.err()),
        }

        // unrelated tasks still plan
        assert!(graph.plan("copy").is_ok());
        assert_eq!(graph.validate().len(), 1);
    }

    #[test]
    fn test_indirect_cycle() {
        let mut bp = Blueprint::new();
        noop(&mut bp, "a", &["b"]);
        noop(&mut bp, "b", &["c"]);
        noop(&mut bp, "c", &["a"]);
        let graph = bp.finish().unwrap();

        assert!(matches!(graph.plan("a"), Err(ConfigError::Cycle(_))));
    }

    #[test]
    fn test_unknown_and_missing() {
        let mut bp = Blueprint::new();
        noop(&mut bp, "a", &[]);
        let graph = bp.finish().unwrap();
        assert!(matches!(graph.plan("nope"), Err(ConfigError::UnknownTask(_))));

        let mut bp = Blueprint::new();
        noop(&mut bp, "a", &["ghost"]);
        assert!(matches!(
            bp.finish(),
            Err(ConfigError::MissingDependency { .. })
        ));

        let mut bp = Blueprint::new();
        noop(&mut bp, "a", &[]);
        noop(&mut bp, "a", &[]);
        assert!(matches!(bp.finish(), Err(ConfigError::DuplicateTask(_))));
    }

    #[test]
    fn test_series_ordering() {
        let mut bp = Blueprint::new();
        noop(&mut bp, "greet", &[]);
        noop(&mut bp, "sass", &[]);
        noop(&mut bp, "watchers", &[]);
        bp.task("default")
            .depends_on(["greet"])
            .series(["sass", "watchers"])
            .group();
        let graph = bp.finish().unwrap();

        let plan = graph.plan("default").unwrap();
        assert_eq!(plan.len(), 4);
        assert!(position(&plan, &graph, "greet") < position(&plan, &graph, "sass"));
        assert!(position(&plan, &graph, "sass") < position(&plan, &graph, "watchers"));
        assert_eq!(position(&plan, &graph, "default"), 3);
    }

    #[test]
    fn test_plan_only_reachable() {
        let mut bp = Blueprint::new();
        noop(&mut bp, "sass", &[]);
        noop(&mut bp, "jsmin", &[]);
        noop(&mut bp, "serve", &["sass", "jsmin"]);
        noop(&mut bp, "images", &[]);
        let graph = bp.finish().unwrap();

        let plan = graph.plan("serve").unwrap();
        let names: Vec<_> = plan.names(&graph).collect();
        assert_eq!(names.len(), 3);
        assert!(!names.contains(&"images"));

        let rendered = plan.display(&graph).to_string();
        assert!(rendered.starts_with("graph LR"));
        assert!(rendered.contains("[\"serve\"]"));
    }
}
