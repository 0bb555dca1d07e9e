//! Main simulator harness for deterministic simulation testing.
//!
//! Drives an [`IndexPools`] through a seeded random mix of lock churn, tree
//! growth, single-key deletion, subtree release, drains, file reopens and
//! deliberate double frees, checking invariants after every step. Double
//! frees reuse IDs from before a reopen and IDs of other indexes, which
//! must be rejected just like plain repeats.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::invariants::{InvariantChecker, InvariantViolation, PoolSnapshot};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::file::KeyDefinition;
use crate::lock::Lock;
use crate::pools::IndexPools;
use crate::types::{Handle, KeyId, KeyNumber, RowNumber, TreeId};

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Number of key definitions on the simulated file.
    pub key_count: usize,
    /// Probability of a deliberate double free per step (0.0 - 1.0).
    pub double_free_rate: f64,
    /// Probability of attaching a child subtree when growing (0.0 - 1.0).
    pub subtree_rate: f64,
    /// Probability of closing and reopening the file per step (0.0 - 1.0).
    pub reopen_rate: f64,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            key_count: 3,
            double_free_rate: 0.05,
            subtree_rate: 0.2,
            reopen_rate: 0.02,
        }
    }

    /// Set the deliberate double free rate.
    #[must_use]
    pub const fn with_double_free_rate(mut self, rate: f64) -> Self {
        self.double_free_rate = rate;
        self
    }

    /// Set the reopen rate.
    #[must_use]
    pub const fn with_reopen_rate(mut self, rate: f64) -> Self {
        self.reopen_rate = rate;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    /// Number of steps executed.
    pub steps: u64,
    /// Operations that succeeded.
    pub successful_operations: u64,
    /// Operations rejected as expected (double frees, stale references).
    pub rejected_operations: u64,
    /// Times the file was closed and reopened.
    pub reopens: u64,
    /// Invariant violations detected.
    pub invariant_violations: Vec<InvariantViolation>,
}

impl SimulationResult {
    /// Check if the simulation passed (no invariant violations).
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    AcquireLock,
    ReleaseLock,
    Grow,
    FreeOne,
    FreeAll,
    ReleaseRoot,
    Drain,
}

impl Step {
    const ALL: [Self; 7] = [
        Self::AcquireLock,
        Self::ReleaseLock,
        Self::Grow,
        Self::FreeOne,
        Self::FreeAll,
        Self::ReleaseRoot,
        Self::Drain,
    ];
}

fn pick<T: Copy>(rng: &mut StdRng, items: &[T]) -> Option<T> {
    if items.is_empty() {
        return None;
    }
    Some(items[rng.random_range(0..items.len())])
}

/// The main simulator harness.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    pools: IndexPools,
    definitions: Vec<KeyDefinition>,
    handle: Handle,
    reopens: u64,
    checker: InvariantChecker,
    held_locks: Vec<Box<Lock>>,
    freed_keys: Vec<(KeyNumber, KeyId)>,
    released_trees: Vec<(KeyNumber, TreeId)>,
    steps: u64,
    successful_operations: u64,
    rejected_operations: u64,
}

impl Simulator {
    /// Create a simulator with one open file of `key_count` indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(config: SimulatorConfig) -> Result<Self, PoolError> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut pools = IndexPools::new(PoolConfig::default());
        let definitions: Vec<KeyDefinition> = (0..config.key_count)
            .map(|_| KeyDefinition::new(rng.random_range(1..=64)))
            .collect();
        let handle = pools.open_file(&definitions)?;

        Ok(Self {
            config,
            rng,
            pools,
            definitions,
            handle,
            reopens: 0,
            checker: InvariantChecker::new(),
            held_locks: Vec::new(),
            freed_keys: Vec::new(),
            released_trees: Vec::new(),
            steps: 0,
            successful_operations: 0,
            rejected_operations: 0,
        })
    }

    /// The pools under test.
    #[must_use]
    pub const fn pools(&self) -> &IndexPools {
        &self.pools
    }

    /// Run `step_count` random steps, then tear everything down and close
    /// the file.
    pub fn run(&mut self, step_count: usize) -> SimulationResult {
        for _ in 0..step_count {
            let operation_index = usize::try_from(self.steps).unwrap_or(usize::MAX);
            self.steps += 1;

            if self.rng.random::<f64>() < self.config.double_free_rate {
                self.double_free(operation_index);
            } else if self.rng.random::<f64>() < self.config.reopen_rate {
                let result = self.reopen();
                self.tally(result, operation_index);
            } else {
                let step = Step::ALL[self.rng.random_range(0..Step::ALL.len())];
                let result = self.step(step);
                self.tally(result, operation_index);
            }
            self.checker.check_pools(&self.pools, operation_index);
        }

        self.shutdown();
        SimulationResult {
            seed: self.config.seed,
            steps: self.steps,
            successful_operations: self.successful_operations,
            rejected_operations: self.rejected_operations,
            reopens: self.reopens,
            invariant_violations: self.checker.violations().to_vec(),
        }
    }

    fn tally(&mut self, result: Result<(), PoolError>, operation_index: usize) {
        match result {
            Ok(()) => self.successful_operations += 1,
            Err(error) => self.checker.add_violation(InvariantViolation {
                description: "Valid operation failed".to_string(),
                operation_index,
                context: error.to_string(),
            }),
        }
    }

    fn random_key_number(&mut self) -> KeyNumber {
        KeyNumber(self.rng.random_range(0..self.config.key_count))
    }

    /// Live nodes bound to `key_number`, or unbound.
    fn nodes_of(&self, key_number: KeyNumber) -> Vec<TreeId> {
        self.pools
            .trees()
            .iter_live()
            .filter(|(_, node)| {
                node.binding()
                    .is_none_or(|binding| binding == (self.handle, key_number))
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn step(&mut self, step: Step) -> Result<(), PoolError> {
        let handle = self.handle;
        match step {
            Step::AcquireLock => {
                let mut lock = self.pools.acquire_lock(handle);
                if *lock != Lock::default() {
                    return Err(PoolError::InvalidArgument("lock was not zeroed".to_string()));
                }
                lock.assign(handle, RowNumber(self.rng.random_range(0..1000)));
                self.held_locks.push(lock);
            }
            Step::ReleaseLock => {
                if !self.held_locks.is_empty() {
                    let position = self.rng.random_range(0..self.held_locks.len());
                    let lock = self.held_locks.swap_remove(position);
                    self.pools.release_lock(lock);
                }
            }
            Step::Grow => self.grow()?,
            Step::FreeOne => {
                let key_number = self.random_key_number();
                let live: Vec<KeyId> = self
                    .pools
                    .key_pool(handle, key_number)?
                    .iter_live()
                    .map(|(id, _)| id)
                    .collect();
                if let Some(key) = pick(&mut self.rng, &live) {
                    self.pools.free_one(handle, key_number, key)?;
                    self.freed_keys.push((key_number, key));
                }
            }
            Step::FreeAll => {
                let key_number = self.random_key_number();
                let nodes = self.nodes_of(key_number);
                if let Some(tree) = pick(&mut self.rng, &nodes) {
                    self.pools.free_all(handle, key_number, tree)?;
                }
            }
            Step::ReleaseRoot => {
                let key_number = self.random_key_number();
                let roots: Vec<TreeId> = self
                    .nodes_of(key_number)
                    .into_iter()
                    .filter(|tree| self.pools.tree(*tree).is_ok_and(|node| node.is_root()))
                    .collect();
                if let Some(tree) = pick(&mut self.rng, &roots) {
                    self.pools.release_all(handle, key_number, Some(tree))?;
                    self.released_trees.push((key_number, tree));
                }
            }
            Step::Drain => {
                let key_number = self.random_key_number();
                self.pools.drain(handle, key_number)?;
            }
        }
        Ok(())
    }

    /// Add a key to a random node of a random index, sometimes hanging a
    /// fresh child node below it.
    fn grow(&mut self) -> Result<(), PoolError> {
        let handle = self.handle;
        let key_number = self.random_key_number();
        let nodes = self.nodes_of(key_number);
        let tree = match pick(&mut self.rng, &nodes) {
            Some(tree) if self.rng.random_bool(0.8) => tree,
            _ => self.pools.acquire_tree(handle)?.0,
        };

        let (key, _) = self.pools.acquire_key(handle, key_number)?;
        let fields = self.pools.key_mut(handle, key_number, key)?.fields_mut();
        if fields.iter().any(|&b| b != 0) {
            return Err(PoolError::InvalidArgument("key was not zeroed".to_string()));
        }
        fields.fill(0xA5);

        let chain = self.pools.chain(handle, key_number, tree)?;
        let anchor = if chain.is_empty() || self.rng.random_bool(0.2) {
            None
        } else {
            pick(&mut self.rng, &chain)
        };
        self.pools.link_key_after(handle, key_number, tree, anchor, key)?;

        if self.rng.random::<f64>() < self.config.subtree_rate {
            let (child, _) = self.pools.acquire_tree(handle)?;
            self.pools.attach_child(handle, key_number, key, child)?;
            let (leaf_key, _) = self.pools.acquire_key(handle, key_number)?;
            self.pools.link_key_last(handle, key_number, child, leaf_key)?;
        }
        Ok(())
    }

    /// Release every root node of every index.
    fn release_roots(&mut self) -> Result<(), PoolError> {
        for number in 0..self.config.key_count {
            let key_number = KeyNumber(number);
            let roots: Vec<TreeId> = self
                .nodes_of(key_number)
                .into_iter()
                .filter(|tree| self.pools.tree(*tree).is_ok_and(|node| node.is_root()))
                .collect();
            for tree in roots {
                self.pools.release_all(self.handle, key_number, Some(tree))?;
                self.released_trees.push((key_number, tree));
            }
        }
        Ok(())
    }

    /// Tear down every tree, close the file and open it again.
    fn reopen(&mut self) -> Result<(), PoolError> {
        self.release_roots()?;
        self.pools.close_file(self.handle)?;
        self.handle = self.pools.open_file(&self.definitions)?;
        self.reopens += 1;
        Ok(())
    }

    /// Free something already freed and check nothing changed.
    ///
    /// A freed key is sometimes presented to a different index than the
    /// one it came from.
    fn double_free(&mut self, operation_index: usize) {
        let handle = self.handle;
        let before = PoolSnapshot::capture(&self.pools);
        let result = if self.rng.random_bool(0.5) {
            match pick(&mut self.rng, &self.freed_keys) {
                Some((key_number, key)) => {
                    let key_number = if self.rng.random_bool(0.3) {
                        self.random_key_number()
                    } else {
                        key_number
                    };
                    self.pools.free_one(handle, key_number, key).map(|_| ())
                }
                None => return,
            }
        } else {
            match pick(&mut self.rng, &self.released_trees) {
                Some((key_number, tree)) => self
                    .pools
                    .release_all(handle, key_number, Some(tree))
                    .map(|_| ()),
                None => return,
            }
        };

        match result {
            Err(error) if error.is_fatal() => self.rejected_operations += 1,
            Err(error) => self.checker.add_violation(InvariantViolation {
                description: "Double free rejected as misuse instead of corruption".to_string(),
                operation_index,
                context: error.to_string(),
            }),
            Ok(()) => self.checker.add_violation(InvariantViolation {
                description: "Double free was accepted".to_string(),
                operation_index,
                context: String::new(),
            }),
        }
        let after = PoolSnapshot::capture(&self.pools);
        self.checker.check_unchanged(&before, &after, operation_index);
    }

    /// Release every root, drain and close the file.
    fn shutdown(&mut self) {
        let operation_index = usize::try_from(self.steps).unwrap_or(usize::MAX);

        for lock in self.held_locks.drain(..) {
            self.pools.release_lock(lock);
        }
        let result = self
            .release_roots()
            .and_then(|()| self.pools.close_file(self.handle).map(|_| ()));
        self.tally(result, operation_index);
        if self.pools.trees().live() != 0 {
            self.checker.add_violation(InvariantViolation {
                description: "Tree nodes outlived their file".to_string(),
                operation_index,
                context: format!("{} live", self.pools.trees().live()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_tracing;

    #[test]
    fn test_simulator_basic() {
        init_tracing();
        let mut simulator = Simulator::new(SimulatorConfig::new(12345)).expect("simulator");
        let result = simulator.run(300);

        assert_eq!(result.seed, 12345);
        assert_eq!(result.steps, 300);
        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert_eq!(simulator.pools().handles().count(), 0);
    }

    #[test]
    fn test_simulator_deterministic() {
        let mut first = Simulator::new(SimulatorConfig::new(777)).expect("simulator");
        let mut second = Simulator::new(SimulatorConfig::new(777)).expect("simulator");
        let a = first.run(200);
        let b = second.run(200);

        assert_eq!(a.successful_operations, b.successful_operations);
        assert_eq!(a.rejected_operations, b.rejected_operations);
    }

    #[test]
    fn test_simulator_double_frees_rejected() {
        let config = SimulatorConfig::new(4242).with_double_free_rate(0.3);
        let mut simulator = Simulator::new(config).expect("simulator");
        let result = simulator.run(400);

        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert!(result.rejected_operations > 0);
        assert_eq!(
            simulator.pools().faults_reported(),
            result.rejected_operations
        );
    }

    #[test]
    fn test_simulator_reopens_reject_old_ids() {
        let config = SimulatorConfig::new(9001)
            .with_double_free_rate(0.3)
            .with_reopen_rate(0.1);
        let mut simulator = Simulator::new(config).expect("simulator");
        let result = simulator.run(400);

        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert!(result.reopens > 0);
        assert!(result.rejected_operations > 0);
        assert_eq!(
            simulator.pools().faults_reported(),
            result.rejected_operations
        );
    }

    #[test]
    fn test_simulator_many_seeds() {
        for seed in 0..16 {
            let mut simulator = Simulator::new(SimulatorConfig::new(seed)).expect("simulator");
            let result = simulator.run(150);
            assert!(result.passed(), "seed {seed}: {:?}", result.invariant_violations);
        }
    }
}
