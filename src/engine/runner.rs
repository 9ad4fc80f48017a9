mod diagnostics;
#[cfg(feature = "server")]
pub(crate) mod http;
#[cfg(feature = "live")]
pub(crate) mod reload;
#[cfg(feature = "live")]
pub(crate) mod watch;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Environment;
use crate::engine::{Plan, TaskContext, TaskGraph, Work};
use crate::error::{GantryError, TaskError};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

type DaemonHandle = (String, JoinHandle<Result<(), TaskError>>);

/// Result of a single task body as seen by the scheduler.
type Outcome = Result<Option<DaemonHandle>, GantryError>;

/// Executes task plans.
///
/// Cloning is cheap; long running tasks clone the runner to trigger other
/// tasks from their own threads.
#[derive(Clone)]
pub struct Runner {
    graph: Arc<TaskGraph>,
    env: Arc<Environment>,
}

impl Runner {
    pub fn new(graph: TaskGraph, env: Environment) -> Self {
        Self {
            graph: Arc::new(graph),
            env: Arc::new(env),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn env(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Runs a single task with everything it depends on.
    pub fn run(&self, name: &str) -> Result<Diagnostics, GantryError> {
        self.run_all([name])
    }

    /// Runs the given tasks one after another. Every plan is checked before
    /// anything executes, then each finite part runs in turn; the call
    /// returns once all daemons started along the way have exited. A failing
    /// plan returns its error at once and leaves the daemons detached.
    pub fn run_all<'n>(
        &self,
        names: impl IntoIterator<Item = &'n str>,
    ) -> Result<Diagnostics, GantryError> {
        let plans = names
            .into_iter()
            .map(|name| self.graph.plan(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut diagnostics = Diagnostics::default();
        let mut daemons = Vec::new();

        for plan in &plans {
            match self.execute(plan, &mut daemons) {
                Ok(partial) => diagnostics.merge(partial),
                Err(e) => {
                    if !daemons.is_empty() {
                        // daemons never return on their own
                        tracing::warn!(daemons = daemons.len(), "abandoning running daemons");
                    }
                    return Err(e);
                }
            }
        }

        join_daemons(daemons)?;
        Ok(diagnostics)
    }

    /// This function executes a plan, one scoped thread per task body. Tasks
    /// are started as soon as every task they depend on has completed. Bodies
    /// use the rayon pool for their own work; the scheduler never holds a
    /// pool worker.
    ///
    /// The algorithm works as follows:
    /// 1. The dependency count of each node is its number of incoming edges.
    /// 2. Nodes with a count of zero are spawned.
    /// 3. The calling thread waits for results on a channel. Each completed
    ///    task decrements the counts of its dependents, and nodes reaching
    ///    zero are spawned right away.
    /// 4. A failure stops the spawning of new tasks. Tasks already in flight
    ///    are waited for, then the first error is returned.
    fn execute(
        &self,
        plan: &Plan,
        daemons: &mut Vec<DaemonHandle>,
    ) -> Result<Diagnostics, GantryError> {
        let graph = &plan.graph;

        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for edge in graph.raw_edges() {
            dependents
                .entry(edge.source())
                .or_default()
                .push(edge.target());
        }

        let mut dependency_counts: HashMap<NodeIndex, usize> = graph
            .node_indices()
            .map(|i| {
                (
                    i,
                    graph
                        .neighbors_directed(i, petgraph::Direction::Incoming)
                        .count(),
                )
            })
            .collect();

        let total_tasks = graph.node_count();
        if total_tasks == 0 {
            return Ok(Diagnostics::default());
        }

        let root_name = self.graph.def(graph[plan.root]).name();
        let root_span = tracing::span!(Level::INFO, "running", task = root_name);
        root_span.pb_set_length(total_tasks as u64);
        root_span.pb_set_style(&crate::io::PROGRESS_STYLE);
        root_span.pb_set_message(&format!("Running {root_name}..."));
        let _enter = root_span.enter();
        let root_span = &root_span;

        let started = Instant::now();
        let mut execution_times = HashMap::new();
        let mut failure: Option<GantryError> = None;

        std::thread::scope(|s| {
            let (result_sender, result_receiver) =
                channel::<(NodeIndex, Outcome, Instant, Duration)>();

            let spawn_task = |index: NodeIndex| {
                let def = self.graph.def(graph[index]);
                let sender = result_sender.clone();

                s.spawn(move || {
                    let span =
                        tracing::span!(parent: root_span, Level::INFO, "task", name = def.name());
                    span.pb_set_style(&crate::io::TASK_STYLE);
                    span.pb_set_message(&format!("Running {}", def.name()));
                    let _enter = span.enter();

                    let start_time = Instant::now();

                    let outcome = match &def.func {
                        None => Ok(None),
                        Some(func) => {
                            let context = TaskContext {
                                env: &self.env,
                                runner: self,
                                span: span.clone(),
                            };

                            // The context only hands out shared references.
                            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                                func(&context)
                            })) {
                                Ok(Ok(Work::Done)) => Ok(None),
                                Ok(Ok(Work::Daemon(daemon))) => spawn_daemon(def.name(), daemon)
                                    .map(Some)
                                    .map_err(|e| GantryError::Task(def.name().into(), e.into())),
                                Ok(Err(e)) => Err(GantryError::Task(def.name().into(), e)),
                                Err(panic) => {
                                    Err(GantryError::Panic(def.name().into(), panic_message(panic)))
                                }
                            }
                        }
                    };

                    let elapsed = start_time.elapsed();

                    // A closed channel means the scheduler stopped listening.
                    let _ = sender.send((index, outcome, start_time, elapsed));
                });
            };

            let mut in_flight = 0;
            let mut completed_tasks = 0;

            for index in graph.node_indices() {
                if dependency_counts[&index] == 0 {
                    spawn_task(index);
                    in_flight += 1;
                }
            }

            // The calling thread sits here while the task threads run.
            while in_flight > 0 {
                let Ok((completed_index, outcome, start, duration)) = result_receiver.recv()
                else {
                    break;
                };
                in_flight -= 1;

                let name = self.graph.def(graph[completed_index]).name();
                execution_times.insert(name.to_string(), TaskExecution { start, duration });

                match outcome {
                    Ok(daemon) => {
                        tracing::debug!(task = name, ?duration, "task finished");
                        daemons.extend(daemon);
                    }
                    Err(e) => {
                        tracing::error!(task = name, "task failed");
                        failure.get_or_insert(e);
                    }
                }

                completed_tasks += 1;
                root_span.pb_inc(1);

                if failure.is_some() {
                    continue;
                }

                if let Some(dependents_of_completed) = dependents.get(&completed_index) {
                    for &index in dependents_of_completed {
                        if let Some(count) = dependency_counts.get_mut(&index) {
                            *count -= 1;
                            if *count == 0 {
                                spawn_task(index);
                                in_flight += 1;
                            }
                        }
                    }
                }
            }

            tracing::debug!(completed_tasks, total_tasks, "plan drained");
        });

        if let Some(e) = failure {
            return Err(e);
        }

        tracing::info!(task = root_name, "finished {}", crate::io::as_overhead(started));

        Ok(Diagnostics { execution_times })
    }
}

fn spawn_daemon(
    name: &str,
    daemon: super::DaemonFn,
) -> std::io::Result<DaemonHandle> {
    let handle = std::thread::Builder::new()
        .name(format!("gantry:{name}"))
        .spawn(daemon)?;

    tracing::debug!(task = name, "daemon started");
    Ok((name.to_string(), handle))
}

fn join_daemons(daemons: Vec<DaemonHandle>) -> Result<(), GantryError> {
    let mut first = None;

    for (name, handle) in daemons {
        let result = match handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GantryError::Task(name, e)),
            Err(panic) => Err(GantryError::Panic(name, panic_message(panic))),
        };

        if let Err(e) = result {
            tracing::error!("{e}");
            first.get_or_insert(e);
        }
    }

    first.map_or(Ok(()), Err)
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown payload")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::engine::Blueprint;
    use crate::error::ConfigError;
    use crate::manifest::Manifest;

    fn env() -> Environment {
        Environment::new("/tmp/gantry-runner-test", Manifest::default())
    }

    #[test]
    fn test_self_dependency_never_runs() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut bp = Blueprint::new();

        for name in ["clean", "copy"] {
            let ran = ran.clone();
            bp.task(name).run(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(Work::Done)
            });
        }
        bp.task("build").depends_on(["clean", "build", "copy"]).group();

        let runner = Runner::new(bp.finish().unwrap(), env());
        let err = runner.run("build").unwrap_err();

        assert!(err.is_config());
        assert!(matches!(err, GantryError::Config(ConfigError::Cycle(ref n)) if n == "build"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dependencies_run_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bp = Blueprint::new();

        for (name, deps) in [("greet", &[][..]), ("sass", &[][..]), ("serve", &["greet", "sass"][..])] {
            let log = log.clone();
            bp.task(name)
                .depends_on(deps.iter().copied())
                .run(move |_| {
                    log.lock().unwrap().push(name);
                    Ok(Work::Done)
                });
        }

        let runner = Runner::new(bp.finish().unwrap(), env());
        let diagnostics = runner.run("serve").unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2], "serve");
        assert_eq!(diagnostics.execution_times.len(), 3);
    }

    #[test]
    fn test_failure_stops_dependents() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut bp = Blueprint::new();

        bp.task("broken")
            .run(|_| Err(anyhow::anyhow!("boom").into()));
        {
            let ran = ran.clone();
            bp.task("after").depends_on(["broken"]).run(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(Work::Done)
            });
        }

        let runner = Runner::new(bp.finish().unwrap(), env());
        let err = runner.run("after").unwrap_err();

        assert!(matches!(err, GantryError::Task(ref n, _) if n == "broken"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_is_reported() {
        let mut bp = Blueprint::new();
        bp.task("oops").run(|_| panic!("bad state"));

        let runner = Runner::new(bp.finish().unwrap(), env());
        match runner.run("oops") {
            Err(GantryError::Panic(name, msg)) => {
                assert_eq!(name, "oops");
                assert_eq!(msg, "bad state");
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_daemon_does_not_block_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bp = Blueprint::new();

        {
            let log = log.clone();
            bp.task("watch").run(move |_| {
                let log = log.clone();
                Ok(Work::daemon(move || {
                    log.lock().unwrap().push("daemon");
                    Ok(())
                }))
            });
        }
        {
            let log = log.clone();
            bp.task("after").depends_on(["watch"]).run(move |_| {
                log.lock().unwrap().push("after");
                Ok(Work::Done)
            });
        }

        let runner = Runner::new(bp.finish().unwrap(), env());
        runner.run("after").unwrap();

        let log = log.lock().unwrap();
        assert!(log.contains(&"daemon"));
        assert!(log.contains(&"after"));
    }

    #[test]
    fn test_tasks_can_trigger_tasks() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut bp = Blueprint::new();

        {
            let ran = ran.clone();
            bp.task("sass").run(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(Work::Done)
            });
        }
        bp.task("watchers").run(|ctx| {
            let runner = ctx.runner.clone();
            Ok(Work::daemon(move || {
                runner.run("sass").map_err(|e| anyhow::anyhow!("{e}"))?;
                Ok(())
            }))
        });

        let runner = Runner::new(bp.finish().unwrap(), env());
        runner.run("watchers").unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    fn within<T: Send + 'static>(
        timeout: Duration,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Option<T> {
        let (tx, rx) = channel();
        std::thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(timeout).ok()
    }

    #[test]
    fn test_single_worker_pool() {
        let mut bp = Blueprint::new();
        bp.task("sum").run(|_| {
            use rayon::prelude::*;
            let total: u32 = (1..=10u32).into_par_iter().sum();
            assert_eq!(total, 55);
            Ok(Work::Done)
        });
        bp.task("after").depends_on(["sum"]).run(|_| Ok(Work::Done));

        let runner = Runner::new(bp.finish().unwrap(), env());
        let result = within(Duration::from_secs(10), move || {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(1)
                .build()
                .unwrap();
            pool.install(|| runner.run("after").map(|d| d.execution_times.len()))
        });

        assert_eq!(result.expect("runner hung").unwrap(), 2);
    }

    #[test]
    fn test_failure_after_daemon_is_returned() {
        let mut bp = Blueprint::new();
        bp.task("watchers").run(|_| {
            Ok(Work::daemon(|| loop {
                std::thread::park();
            }))
        });
        bp.task("jslint")
            .run(|_| Err(TaskError::Lint { linter: "eslint", count: 2 }));

        let runner = Runner::new(bp.finish().unwrap(), env());
        let result = within(Duration::from_secs(10), move || {
            runner.run_all(["watchers", "jslint"]).map(|_| ())
        });

        let err = result.expect("runner hung").unwrap_err();
        assert!(matches!(err, GantryError::Task(ref n, _) if n == "jslint"));
    }
}
