//! Pipeline stages: one worker thread per stage, each running
//! `pace -> take -> work -> post output -> recycle input` until cancelled.

use crate::cancel::CancelToken;
use crate::clock::MonotonicClock;
use crate::pacer::{IntervalPacer, Pace};
use crate::pool::{Discard, Source, Target};
use crate::Result;
use std::sync::Arc;
use tracing::trace;

/// Per-iteration view handed to stage work.
pub struct StageContext<'a> {
    pub chain: &'a str,
    pub stage: &'a str,
    pub token: &'a CancelToken,
    pub clock: MonotonicClock,
    /// Zero-based iteration counter.
    pub iteration: u64,
}

impl StageContext<'_> {
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }
}

pub(crate) struct StageEnv {
    pub chain: String,
    pub name: String,
    pub token: CancelToken,
    pub clock: MonotonicClock,
    pub pacer: Option<IntervalPacer>,
}

type StageBody = Box<dyn FnOnce(&mut StageEnv) -> Result<()> + Send>;

/// A unit of pipeline work, ready to be spawned by the orchestrator.
pub struct Stage {
    name: String,
    pacer: Option<IntervalPacer>,
    body: StageBody,
}

impl Stage {
    /// A stage that turns each input into an output for the next stage.
    ///
    /// The input goes back to `recycle` after `work` returns, whether it
    /// succeeded or not.
    pub fn transform<I, O, F>(
        name: impl Into<String>,
        source: Arc<dyn Source<I>>,
        recycle: Arc<dyn Target<I>>,
        output: Arc<dyn Target<O>>,
        work: F,
    ) -> Self
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnMut(&mut I, &StageContext<'_>) -> Result<O> + Send + 'static,
    {
        Self {
            name: name.into(),
            pacer: None,
            body: Box::new(move |env| run_loop(env, &*source, &*recycle, &*output, work)),
        }
    }

    /// A terminal stage.
    pub fn sink<I, F>(
        name: impl Into<String>,
        source: Arc<dyn Source<I>>,
        recycle: Arc<dyn Target<I>>,
        work: F,
    ) -> Self
    where
        I: Send + 'static,
        F: FnMut(&mut I, &StageContext<'_>) -> Result<()> + Send + 'static,
    {
        Self::transform(name, source, recycle, Arc::new(Discard), work)
    }

    /// Releases each iteration at most once per pacer interval.
    pub fn paced(mut self, pacer: IntervalPacer) -> Self {
        self.pacer = Some(pacer);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_paced(&self) -> bool {
        self.pacer.is_some()
    }

    pub(crate) fn into_parts(self) -> (String, Option<IntervalPacer>, StageBody) {
        (self.name, self.pacer, self.body)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("paced", &self.is_paced())
            .finish()
    }
}

fn run_loop<I, O, F>(
    env: &mut StageEnv,
    source: &dyn Source<I>,
    recycle: &dyn Target<I>,
    output: &dyn Target<O>,
    mut work: F,
) -> Result<()>
where
    F: FnMut(&mut I, &StageContext<'_>) -> Result<O>,
{
    let mut iteration = 0u64;
    loop {
        if env.token.is_cancelled() {
            return Ok(());
        }

        if let Some(pacer) = env.pacer.as_mut() {
            match pacer.wait(&env.token) {
                Pace::Cancelled => return Ok(()),
                Pace::Overrun(late) => {
                    trace!(stage = %env.name, late_us = late.as_micros() as u64, "Pacer overrun")
                }
                Pace::Released => {}
            }
        }

        let mut input = match source.take(&env.token) {
            Ok(input) => input,
            Err(e) if e.is_cancelled() => return Ok(()),
            Err(e) => return Err(e),
        };

        let ctx = StageContext {
            chain: &env.chain,
            stage: &env.name,
            token: &env.token,
            clock: env.clock,
            iteration,
        };
        let result = work(&mut input, &ctx);
        match result {
            Ok(out) => {
                output.post(out);
                recycle.post(input);
            }
            Err(e) => {
                recycle.post(input);
                return if e.is_cancelled() { Ok(()) } else { Err(e) };
            }
        }
        iteration += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BufferPool, StageQueue};
    use crate::Error;

    fn env(token: &CancelToken) -> StageEnv {
        StageEnv {
            chain: "test".into(),
            name: "stage".into(),
            token: token.clone(),
            clock: MonotonicClock::new(),
            pacer: None,
        }
    }

    #[test]
    fn test_transform_forwards_and_recycles() {
        let token = CancelToken::new();
        let input: Arc<BufferPool<Vec<u32>>> = Arc::new(BufferPool::new("in", 1, || vec![0; 4]));
        let output = Arc::new(StageQueue::<u64>::new("out"));

        let stop = token.clone();
        let stage = Stage::transform(
            "sum",
            input.clone(),
            input.clone(),
            output.clone(),
            move |buf: &mut Vec<u32>, ctx| {
                buf.iter_mut().for_each(|v| *v += 1);
                if ctx.iteration == 2 {
                    stop.cancel();
                }
                Ok(buf.iter().map(|&v| v as u64).sum())
            },
        );
        let (_, _, body) = stage.into_parts();
        body(&mut env(&token)).unwrap();

        let probe = CancelToken::new();
        let sums: Vec<u64> = (0..3).map(|_| output.take(&probe).unwrap()).collect();
        assert_eq!(sums, vec![4, 8, 12]);
        assert_eq!(input.idle(), 1);
    }

    #[test]
    fn test_error_recycles_input_and_propagates() {
        let token = CancelToken::new();
        let input: Arc<BufferPool<u8>> = Arc::new(BufferPool::new("in", 1, || 0));
        let stage = Stage::sink("fail", input.clone(), input.clone(), |_: &mut u8, _| {
            Err(Error::Encode("bad frame".into()))
        });
        let (_, _, body) = stage.into_parts();
        let err = body(&mut env(&token)).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
        assert_eq!(input.idle(), 1);
    }

    #[test]
    fn test_cancelled_work_is_clean_exit() {
        let token = CancelToken::new();
        let input: Arc<BufferPool<u8>> = Arc::new(BufferPool::new("in", 1, || 0));
        let stage = Stage::sink("cancel", input.clone(), input, |_: &mut u8, _| Err(Error::Cancelled));
        let (_, _, body) = stage.into_parts();
        assert!(body(&mut env(&token)).is_ok());
    }
}
