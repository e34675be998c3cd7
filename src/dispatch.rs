//! Algorithm dispatch.
//!
//! Mining algorithms are opaque handlers registered explicitly against a
//! closed set of names. Resolution never falls back to a default handler.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Known mining algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Alpha miner
    AlphaMiner,
    /// Heuristic miner
    HeuristicMiner,
}

impl Algorithm {
    /// All known algorithms.
    pub const ALL: [Algorithm; 2] = [Algorithm::AlphaMiner, Algorithm::HeuristicMiner];

    /// Canonical name, also used as the output directory name.
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::AlphaMiner => "AlphaMiner",
            Algorithm::HeuristicMiner => "HeuristicMiner",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        Algorithm::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnsupportedAlgorithm(name.to_string()))
    }
}

/// Inputs handed to an algorithm handler.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingJob<'a> {
    /// Configuration the job runs for
    pub config_id: &'a str,
    /// Raw event log
    pub input_path: &'a Path,
    /// Suggested artifact path inside a private staging directory
    pub output_path: &'a Path,
    /// Activity sequences of the filtered log, one per trace
    pub event_matrix: &'a [Vec<String>],
}

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A mining routine.
///
/// Returns the file name of the artifact it wrote inside the directory of
/// `job.output_path`.
pub trait AlgorithmHandler: Send + Sync {
    /// Runs the routine.
    fn run(&self, job: &ProcessingJob<'_>) -> Result<String, HandlerError>;
}

impl<F> AlgorithmHandler for F
where
    F: Fn(&ProcessingJob<'_>) -> Result<String, HandlerError> + Send + Sync,
{
    fn run(&self, job: &ProcessingJob<'_>) -> Result<String, HandlerError> {
        self(job)
    }
}

/// Registration table of algorithm handlers.
#[derive(Default)]
pub struct AlgorithmRegistry {
    handlers: HashMap<Algorithm, Box<dyn AlgorithmHandler>>,
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("registered", &self.registered())
            .finish()
    }
}

impl AlgorithmRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `algorithm`, replacing any previous one.
    pub fn register(&mut self, algorithm: Algorithm, handler: impl AlgorithmHandler + 'static) {
        self.handlers.insert(algorithm, Box::new(handler));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, algorithm: Algorithm, handler: impl AlgorithmHandler + 'static) -> Self {
        self.register(algorithm, handler);
        self
    }

    /// Registered algorithms in canonical order.
    pub fn registered(&self) -> Vec<Algorithm> {
        Algorithm::ALL
            .into_iter()
            .filter(|a| self.handlers.contains_key(a))
            .collect()
    }

    /// Resolves `name` to a registered algorithm.
    pub fn resolve(&self, name: &str) -> Result<Algorithm> {
        let algorithm: Algorithm = name.parse()?;
        if self.handlers.contains_key(&algorithm) {
            Ok(algorithm)
        } else {
            Err(Error::UnsupportedAlgorithm(name.to_string()))
        }
    }

    /// Runs the handler registered under `name` and returns the artifact name.
    pub fn run_algorithm(
        &self,
        name: &str,
        input_path: &Path,
        output_path: &Path,
        event_matrix: &[Vec<String>],
        config_id: &str,
    ) -> Result<String> {
        let algorithm = self.resolve(name)?;
        let handler = self
            .handlers
            .get(&algorithm)
            .ok_or_else(|| Error::UnsupportedAlgorithm(name.to_string()))?;
        let job = ProcessingJob {
            config_id,
            input_path,
            output_path,
            event_matrix,
        };
        handler
            .run(&job)
            .map_err(|e| Error::Execution(format!("{}: {}", algorithm, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn echo(job: &ProcessingJob<'_>) -> Result<String, HandlerError> {
        Ok(format!("{}-{}", job.config_id, job.event_matrix.len()))
    }

    #[test]
    fn algorithm_names_parse_ignoring_case() {
        assert_eq!("heuristicminer".parse::<Algorithm>().unwrap(), Algorithm::HeuristicMiner);
        assert_eq!("AlphaMiner".parse::<Algorithm>().unwrap(), Algorithm::AlphaMiner);
        assert!(matches!(
            "InductiveMiner".parse::<Algorithm>(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn runs_registered_handler() {
        let registry = AlgorithmRegistry::new().with(Algorithm::HeuristicMiner, echo);
        let matrix = vec![vec!["a".to_string()], vec!["b".to_string()]];
        let name = registry
            .run_algorithm("HeuristicMiner", Path::new("in.xes"), Path::new("out.json"), &matrix, "cfg")
            .unwrap();
        assert_eq!(name, "cfg-2");
    }

    #[test]
    fn known_but_unregistered_is_unsupported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let registry = AlgorithmRegistry::new().with(
            Algorithm::HeuristicMiner,
            move |_: &ProcessingJob<'_>| -> Result<String, HandlerError> {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok("x".into())
            },
        );
        let err = registry
            .run_algorithm("AlphaMiner", Path::new("in"), Path::new("out"), &[], "cfg")
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.registered(), vec![Algorithm::HeuristicMiner]);
    }

    #[test]
    fn handler_failure_is_execution_error() {
        let registry = AlgorithmRegistry::new().with(
            Algorithm::AlphaMiner,
            |_: &ProcessingJob<'_>| -> Result<String, HandlerError> { Err("no traces".into()) },
        );
        let err = registry
            .run_algorithm("alphaminer", Path::new("in"), Path::new("out"), &[], "cfg")
            .unwrap_err();
        match err {
            Error::Execution(msg) => assert!(msg.contains("no traces")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
