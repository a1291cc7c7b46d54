// src/engine/dispatcher.rs

use std::num::NonZeroUsize;
use std::thread;

use tracing::debug;

use super::queue::RunQueue;
use super::run::Run;

/// Capacity ceiling for concurrent workers: `max(1, round(cpus * ratio))`.
pub fn compute_ceiling(cpus: usize, ratio: f64) -> usize {
    let raw = (cpus as f64 * ratio).round();
    if raw.is_finite() && raw >= 1.0 {
        raw as usize
    } else {
        1
    }
}

/// Decides how many queued runs may start on a tick.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    cpus: usize,
    ceiling: usize,
}

impl Dispatcher {
    /// Dispatcher sized from the host's available parallelism.
    pub fn new(ratio: f64) -> Self {
        let cpus = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_cpus(cpus, ratio)
    }

    pub fn with_cpus(cpus: usize, ratio: f64) -> Self {
        Self {
            cpus,
            ceiling: compute_ceiling(cpus, ratio),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Recompute the ceiling. Running workers are never preempted; a lower
    /// ceiling just delays further dispatch.
    pub fn set_ratio(&mut self, ratio: f64) {
        let ceiling = compute_ceiling(self.cpus, ratio);
        if ceiling != self.ceiling {
            debug!(old = self.ceiling, new = ceiling, "worker ceiling changed");
        }
        self.ceiling = ceiling;
    }

    /// Pop as many runs as there are free slots, oldest first.
    pub fn assign(&self, queue: &mut RunQueue, active: usize) -> Vec<Run> {
        let mut assigned = Vec::new();
        let mut live = active;
        while live < self.ceiling {
            match queue.pop() {
                Some(run) => {
                    assigned.push(run);
                    live += 1;
                }
                None => break,
            }
        }
        assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_is_rounded_and_at_least_one() {
        assert_eq!(compute_ceiling(4, 1.25), 5);
        assert_eq!(compute_ceiling(2, 1.25), 3);
        assert_eq!(compute_ceiling(1, 0.1), 1);
        assert_eq!(compute_ceiling(8, 0.5), 4);
    }

    #[test]
    fn assign_respects_free_slots() {
        let d = Dispatcher::with_cpus(2, 1.0);
        let mut q = RunQueue::new();
        for i in 0..5 {
            q.push(Run::ad_hoc(format!("echo {i}")));
        }

        let first = d.assign(&mut q, 0);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].task.command, "echo 0");

        assert!(d.assign(&mut q, 2).is_empty());
        assert_eq!(d.assign(&mut q, 1).len(), 1);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn shrinking_ceiling_does_not_go_negative() {
        let mut d = Dispatcher::with_cpus(4, 1.0);
        d.set_ratio(0.25);
        assert_eq!(d.ceiling(), 1);

        let mut q = RunQueue::new();
        q.push(Run::ad_hoc("true"));
        assert!(d.assign(&mut q, 3).is_empty());
    }
}
