//! Work done away from the script thread: optimized compilation and
//! ahead-of-time delazification of function bodies.
//!
//! Compile jobs own a `MirInput` snapshot and never see the realm. Their
//! results are handed back over a channel and installed by the VM at its
//! next safepoint; until then the snapshot's object references are traced
//! as roots.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::runner::config::DelazificationStrategy;
use crate::runner::ds::object::ObjectId;
use crate::runner::jit::bytecode::FunctionTemplate;
use crate::runner::jit::opt::{self, CompileFailure, MirInput, OptimizedCode};
use crate::runner::jit::tiering::ScriptId;

/// A compilation that has come back from a worker.
pub struct Finished {
    pub code_id: u64,
    pub script_id: ScriptId,
    pub global_generation: u32,
    pub result: Result<OptimizedCode, CompileFailure>,
}

pub struct OffThreadCompiler {
    jobs: Option<Sender<Arc<MirInput>>>,
    results: Receiver<Finished>,
    workers: Vec<JoinHandle<()>>,
    in_flight: HashMap<u64, Arc<MirInput>>,
    ready: Vec<Finished>,
}

impl OffThreadCompiler {
    pub fn new(workers: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Arc<MirInput>>();
        let (result_tx, result_rx) = unbounded();
        let workers = (0..workers.max(1))
            .map(|n| {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                std::thread::Builder::new()
                    .name(format!("tierjs-ion-{}", n))
                    .spawn(move || {
                        for input in jobs.iter() {
                            let result = opt::compile(&input);
                            let finished = Finished {
                                code_id: input.code_id,
                                script_id: input.root.script_id,
                                global_generation: input.global_generation,
                                result,
                            };
                            if results.send(finished).is_err() {
                                break;
                            }
                        }
                    })
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "could not start compile worker");
                    None
                }
            })
            .collect();
        OffThreadCompiler {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
            in_flight: HashMap::new(),
            ready: Vec::new(),
        }
    }

    /// Queues a compilation. Without a running worker the input is compiled
    /// on the spot and the result delivered on the next `drain`.
    pub fn submit(&mut self, input: MirInput) {
        let input = Arc::new(input);
        self.in_flight.insert(input.code_id, input.clone());
        let sent = match (&self.jobs, self.workers.is_empty()) {
            (Some(jobs), false) => jobs.send(input.clone()).is_ok(),
            _ => false,
        };
        if !sent {
            self.compile_here(&input);
        }
    }

    fn compile_here(&mut self, input: &MirInput) {
        let finished = Finished {
            code_id: input.code_id,
            script_id: input.root.script_id,
            global_generation: input.global_generation,
            result: opt::compile(input),
        };
        self.in_flight.remove(&finished.code_id);
        self.ready.push(finished);
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Results that are ready now.
    pub fn drain(&mut self) -> Vec<Finished> {
        let mut done = std::mem::take(&mut self.ready);
        done.extend(self.results.try_iter());
        for finished in &done {
            self.in_flight.remove(&finished.code_id);
        }
        done
    }

    /// Blocks until every queued compilation has come back.
    pub fn wait(&mut self) -> Vec<Finished> {
        let mut done = self.drain();
        while !self.in_flight.is_empty() {
            match self.results.recv() {
                Ok(finished) => {
                    self.in_flight.remove(&finished.code_id);
                    done.push(finished);
                }
                Err(_) => break,
            }
        }
        done
    }

    pub fn trace(&self, mut visit: impl FnMut(ObjectId)) {
        for input in self.in_flight.values() {
            input.trace(&mut visit);
        }
    }
}

impl Drop for OffThreadCompiler {
    fn drop(&mut self) {
        self.jobs = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

// ── Delazification ───────────────────────────────────────────

struct BySize(Arc<FunctionTemplate>);

impl PartialEq for BySize {
    fn eq(&self, other: &Self) -> bool {
        self.0.source_len() == other.0.source_len()
    }
}

impl Eq for BySize {}

impl PartialOrd for BySize {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BySize {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.source_len().cmp(&other.0.source_len())
    }
}

/// Compiles every function reachable from `roots` in the order the
/// strategy asks for. Returns the number of bodies compiled; bodies that
/// fail to compile are left for the first call to report.
pub fn delazify(roots: Vec<Arc<FunctionTemplate>>, strategy: DelazificationStrategy) -> usize {
    let mut compiled = 0;
    let mut visit = |template: &Arc<FunctionTemplate>| -> Vec<Arc<FunctionTemplate>> {
        match template.script() {
            Ok(script) => {
                compiled += 1;
                script.templates.clone()
            }
            Err(_) => Vec::new(),
        }
    };
    match strategy {
        DelazificationStrategy::OnDemand => {}
        DelazificationStrategy::Eager | DelazificationStrategy::ConcurrentDepthFirst => {
            let mut stack: Vec<_> = roots.into_iter().rev().collect();
            while let Some(template) = stack.pop() {
                stack.extend(visit(&template).into_iter().rev());
            }
        }
        DelazificationStrategy::ConcurrentLargeFirst => {
            let mut heap: BinaryHeap<BySize> = roots.into_iter().map(BySize).collect();
            while let Some(BySize(template)) = heap.pop() {
                heap.extend(visit(&template).into_iter().map(BySize));
            }
        }
    }
    compiled
}

/// Runs the concurrent strategies on a helper thread; the others run
/// before returning.
pub fn start_delazification(
    roots: Vec<Arc<FunctionTemplate>>,
    strategy: DelazificationStrategy,
) -> Option<JoinHandle<usize>> {
    match strategy {
        DelazificationStrategy::OnDemand => None,
        DelazificationStrategy::Eager => {
            let count = delazify(roots, strategy);
            tracing::debug!(functions = count, "eager delazification done");
            None
        }
        DelazificationStrategy::ConcurrentDepthFirst | DelazificationStrategy::ConcurrentLargeFirst => {
            let spawned = std::thread::Builder::new()
                .name("tierjs-delazify".to_string())
                .spawn(move || delazify(roots, strategy));
            match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "could not start delazification thread");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;
    use crate::runner::config::EngineOptions;
    use crate::runner::ds::realm::Realm;
    use crate::runner::jit::compiler::compile_script;

    fn templates(source: &str) -> Vec<Arc<FunctionTemplate>> {
        let program = JsParser::parse_to_ast_from_str(source).unwrap();
        let name: Arc<str> = Arc::from("lazy.js");
        compile_script(&program, &name, 0, false).unwrap().templates.clone()
    }

    #[test]
    fn depth_first_compiles_nested_functions() {
        let roots = templates("function a() { function b() { return 1; } return b; } function c() {}");
        assert!(!roots[0].is_compiled());
        let count = delazify(roots.clone(), DelazificationStrategy::ConcurrentDepthFirst);
        assert_eq!(count, 3);
        assert!(roots.iter().all(|t| t.is_compiled()));
    }

    #[test]
    fn on_demand_compiles_nothing() {
        let roots = templates("function a() {} function b() {}");
        assert_eq!(delazify(roots.clone(), DelazificationStrategy::OnDemand), 0);
        assert!(!roots[0].is_compiled());
    }

    #[test]
    fn concurrent_delazification_joins() {
        let roots = templates("function a() { return 1; } function big() { var x = 1; x = x + 2; return x; }");
        let handle = start_delazification(roots.clone(), DelazificationStrategy::ConcurrentLargeFirst).unwrap();
        assert_eq!(handle.join().unwrap(), 2);
        assert!(roots.iter().all(|t| t.is_compiled()));
    }

    #[test]
    fn workers_return_results() {
        let program = JsParser::parse_to_ast_from_str("var a = 1; a + 1;").unwrap();
        let name: Arc<str> = Arc::from("bg.js");
        let script = Arc::new(compile_script(&program, &name, 0, false).unwrap());
        let mut realm = Realm::new();
        let id = realm.runtime_for(&script);
        let input = opt::snapshot(&mut realm, id, 11, &EngineOptions::default());

        let mut compiler = OffThreadCompiler::new(2);
        compiler.submit(input);
        let done = compiler.wait();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].code_id, 11);
        assert!(done[0].result.is_ok());
        assert_eq!(compiler.pending(), 0);
    }
}
