//! Runs chains of stages and enforces fail-fast cancellation.

use crate::cancel::CancelToken;
use crate::clock::MonotonicClock;
use crate::error::PipelineFault;
use crate::stage::{Stage, StageEnv};
use crate::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use thread_priority::ThreadPriority;
use tracing::{debug, error, info, warn};

/// An ordered list of stages that share one cancellation scope.
#[derive(Debug)]
pub struct Chain {
    name: String,
    stages: Vec<Stage>,
}

impl Chain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Outcome of one run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub stages: usize,
    pub faults: Vec<PipelineFault>,
}

impl RunReport {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    /// Fails with the first fault's error, if any.
    pub fn into_result(self) -> Result<()> {
        match self.faults.into_iter().next() {
            Some(fault) => Err(fault.error),
            None => Ok(()),
        }
    }
}

struct StageExit {
    chain_index: usize,
    chain: String,
    stage: String,
    result: Result<()>,
}

/// Starts every stage of every chain on its own thread and waits for them.
///
/// The first fault in a chain cancels that chain; sibling chains keep
/// running unless [`Orchestrator::link_chains`] is set, in which case any
/// fault cancels the whole run.
pub struct Orchestrator {
    chains: Vec<Chain>,
    linked: bool,
    clock: MonotonicClock,
}

impl Orchestrator {
    pub fn new(clock: MonotonicClock) -> Self {
        Self {
            chains: Vec::new(),
            linked: false,
            clock,
        }
    }

    pub fn chain(mut self, chain: Chain) -> Self {
        self.chains.push(chain);
        self
    }

    pub fn add_chain(&mut self, chain: Chain) {
        self.chains.push(chain);
    }

    pub fn link_chains(mut self, linked: bool) -> Self {
        self.linked = linked;
        self
    }

    /// Runs to completion on the calling thread. Returns once every stage
    /// has exited, which happens after `token` is cancelled or a fault
    /// cancels the affected chains.
    pub fn run(self, token: &CancelToken) -> RunReport {
        let run_token = token.child();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<StageExit>();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let mut chain_tokens = Vec::with_capacity(self.chains.len());
        let mut faults = Vec::new();
        let mut stages = 0usize;

        for (chain_index, chain) in self.chains.into_iter().enumerate() {
            let chain_token = if self.linked {
                run_token.clone()
            } else {
                run_token.child()
            };
            chain_tokens.push(chain_token.clone());
            info!(chain = %chain.name, stages = chain.stages.len(), "Starting chain");

            for stage in chain.stages {
                stages += 1;
                let (name, pacer, body) = stage.into_parts();
                let paced = pacer.is_some();
                let mut env = StageEnv {
                    chain: chain.name.clone(),
                    name: name.clone(),
                    token: chain_token.clone(),
                    clock: self.clock,
                    pacer,
                };
                let done = done_tx.clone();

                let spawned = thread::Builder::new()
                    .name(format!("onair-{}-{}", chain.name, name))
                    .spawn(move || {
                        if paced {
                            let _ = thread_priority::set_current_thread_priority(
                                ThreadPriority::Max,
                            );
                        }
                        let result = catch_unwind(AssertUnwindSafe(|| body(&mut env)))
                            .unwrap_or_else(|_| Err(Error::StagePanicked(env.name.clone())));
                        let _ = done.send(StageExit {
                            chain_index,
                            chain: env.chain.clone(),
                            stage: env.name.clone(),
                            result,
                        });
                    });

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        stages -= 1;
                        error!(chain = %chain.name, stage = %name, error = %e, "Failed to spawn stage");
                        chain_token.cancel();
                        faults.push(PipelineFault {
                            chain: chain.name.clone(),
                            stage: name,
                            error: Error::Io(e),
                        });
                    }
                }
            }
        }
        drop(done_tx);

        for _ in 0..handles.len() {
            let Ok(exit) = done_rx.recv() else { break };
            match exit.result {
                Ok(()) => debug!(chain = %exit.chain, stage = %exit.stage, "Stage exited"),
                Err(e) => {
                    error!(chain = %exit.chain, stage = %exit.stage, error = %e, "Stage faulted");
                    chain_tokens[exit.chain_index].cancel();
                    faults.push(PipelineFault {
                        chain: exit.chain,
                        stage: exit.stage,
                        error: e,
                    });
                }
            }
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("Stage thread panicked after reporting");
            }
        }
        // Make sure nothing outlives the run.
        run_token.cancel();

        info!(stages, faults = faults.len(), "Run finished");
        RunReport { stages, faults }
    }

    /// Runs on a background thread. The returned handle stops and joins it.
    pub fn spawn(self, token: &CancelToken) -> Result<RunHandle> {
        let token = token.clone();
        let run_token = token.clone();
        let thread = thread::Builder::new()
            .name("onair-orchestrator".into())
            .spawn(move || self.run(&run_token))?;
        Ok(RunHandle {
            token,
            thread: Some(thread),
        })
    }
}

/// Handle to a run started with [`Orchestrator::spawn`].
pub struct RunHandle {
    token: CancelToken,
    thread: Option<JoinHandle<RunReport>>,
}

impl RunHandle {
    #[inline]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancels the run and waits for every stage to exit.
    pub fn stop(self) -> RunReport {
        self.token.cancel();
        self.join()
    }

    /// Waits for the run to finish on its own.
    pub fn join(mut self) -> RunReport {
        let Some(thread) = self.thread.take() else {
            return RunReport::default();
        };
        thread.join().unwrap_or_else(|_| RunReport {
            stages: 0,
            faults: vec![PipelineFault {
                chain: String::new(),
                stage: "orchestrator".into(),
                error: Error::StagePanicked("orchestrator".into()),
            }],
        })
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.token.cancel();
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BufferPool, StageQueue};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_cancel_stops_clean_run() {
        let clock = MonotonicClock::new();
        let pool: Arc<BufferPool<u32>> = Arc::new(BufferPool::new("src", 2, || 0));
        let queue = Arc::new(StageQueue::<u32>::new("mid"));
        let echo = Arc::new(StageQueue::<u32>::new("echo"));
        pool.link_to(echo.clone());

        let chain = Chain::new("loop")
            .stage(Stage::transform(
                "inc",
                echo.clone(),
                pool.clone(),
                queue.clone(),
                |v: &mut u32, _| {
                    *v += 1;
                    Ok(*v)
                },
            ))
            .stage(Stage::sink("drop", queue.clone(), Arc::new(crate::pool::Discard), |_: &mut u32, _| Ok(())));

        let token = CancelToken::new();
        let handle = Orchestrator::new(clock).chain(chain).spawn(&token).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let report = handle.stop();
        assert_eq!(report.stages, 2);
        assert!(report.is_clean());
    }

    #[test]
    fn test_panicking_stage_is_a_fault() {
        let pool: Arc<BufferPool<u8>> = Arc::new(BufferPool::new("src", 1, || 0));
        let chain = Chain::new("boom").stage(Stage::sink(
            "panics",
            pool.clone(),
            pool.clone(),
            |_: &mut u8, _| -> Result<()> { panic!("stage bug") },
        ));
        let report = Orchestrator::new(MonotonicClock::new())
            .chain(chain)
            .run(&CancelToken::new());
        assert_eq!(report.faults.len(), 1);
        assert!(matches!(report.faults[0].error, Error::StagePanicked(_)));
    }
}
