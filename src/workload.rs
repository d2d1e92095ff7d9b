//! Randomized multi-thread workload over a shared `LockCouplingList`.
//!
//! Every actor draws from its own `StdRng` seeded with `seed + actor index`, so a run is
//! repeatable operation for operation, although the interleaving between actors is not.
//! `run_workload` waits for the actors until a shared deadline; an actor still running past it
//! is reported as a suspected deadlock.
//!
use error::Status;
use lock_coupling_list::LockCouplingList;
use node_arena::Key;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use util;
use core_affinity;

/// Parameters of a workload run.
#[derive(Clone, Debug)]
pub struct WorkloadConf {
    /// Number of concurrent actors
    pub actor_count: usize,
    /// Operations per actor
    pub exp_count: usize,
    /// Inserted keys are drawn from `[0, val_bound)`, removed and looked up keys from
    /// `[0, 2 * val_bound)`
    pub val_bound: Key,
    /// How long to wait for all actors
    pub join_interval_ms: u64,
    pub seed: u64,
    /// Log every operation at debug level
    pub verbose: bool,
    /// Pin actor `i` to core `i % cores`
    pub pin_cpu: bool,
}

/// Largest accepted `val_bound`; removed and looked up keys go up to twice of it.
pub const MAX_VAL_BOUND: Key = ::std::i64::MAX / 2;

impl WorkloadConf {
    fn check_val_bound(&self) -> Result<(), Status> {
        if self.val_bound <= 0 || self.val_bound > MAX_VAL_BOUND {
            warn!(
                "invalid val_bound={}, expect 1..={}",
                self.val_bound, MAX_VAL_BOUND
            );
            return Err(Status::InvalidParam);
        }
        Ok(())
    }
}

impl Default for WorkloadConf {
    fn default() -> Self {
        WorkloadConf {
            actor_count: 50,
            exp_count: 100,
            val_bound: 10,
            join_interval_ms: 5000,
            seed: 100,
            verbose: false,
            pin_cpu: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OpKind {
    Insert,
    Remove,
    Lookup,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Op {
    pub kind: OpKind,
    pub key: Key,
}

/// Per-actor operation counters.
#[derive(Default, Copy, Clone, Debug, PartialEq)]
pub struct ActorStats {
    pub inserts: u64,
    pub remove_hits: u64,
    pub remove_misses: u64,
    pub lookup_hits: u64,
    pub lookup_misses: u64,
}

impl ActorStats {
    pub fn merge(&mut self, other: &ActorStats) {
        self.inserts += other.inserts;
        self.remove_hits += other.remove_hits;
        self.remove_misses += other.remove_misses;
        self.lookup_hits += other.lookup_hits;
        self.lookup_misses += other.lookup_misses;
    }

    pub fn total_ops(&self) -> u64 {
        self.inserts + self.remove_hits + self.remove_misses + self.lookup_hits
            + self.lookup_misses
    }
}

#[derive(Default, Clone, Debug)]
pub struct WorkloadReport {
    pub stats: ActorStats,
    pub actors_finished: usize,
    pub elapsed_us: i64,
}

/// The operations actor `actor` performs under `conf`, in order.
///
/// Return `Status::InvalidParam` if `conf.val_bound` is outside `1..=MAX_VAL_BOUND`.
pub fn actor_plan(conf: &WorkloadConf, actor: usize) -> Result<Vec<Op>, Status> {
    conf.check_val_bound()?;
    let mut rng = StdRng::seed_from_u64(conf.seed.wrapping_add(actor as u64));
    let plan: Vec<Op> = (0..conf.exp_count)
        .map(|_| {
            let kind = match rng.gen_range(0..3) {
                0 => OpKind::Insert,
                1 => OpKind::Remove,
                _ => OpKind::Lookup,
            };
            let rload = rng.gen_range(0..conf.val_bound);
            let rkey = rng.gen_range(0..conf.val_bound * 2);
            let key = if kind == OpKind::Insert { rload } else { rkey };
            Op { kind, key }
        })
        .collect();
    Ok(plan)
}

/// Run actor `actor`'s plan against `list` on the calling thread.
pub fn run_actor(
    list: &LockCouplingList<i64>,
    conf: &WorkloadConf,
    actor: usize,
) -> Result<ActorStats, Status> {
    let plan = actor_plan(conf, actor)?;
    let tid = util::get_thread_id();
    let mut stats = ActorStats::default();
    for op in plan {
        match op.kind {
            OpKind::Insert => {
                if conf.verbose {
                    debug!("thread {}: inserting {}", tid, op.key);
                }
                list.insert(op.key, actor as i64);
                stats.inserts += 1;
            }
            OpKind::Remove => {
                let found = list.remove(op.key).is_some();
                if conf.verbose {
                    debug!(
                        "thread {}: remove {}, {}",
                        tid,
                        op.key,
                        if found { "success" } else { "key not found" }
                    );
                }
                if found {
                    stats.remove_hits += 1;
                } else {
                    stats.remove_misses += 1;
                }
            }
            OpKind::Lookup => {
                let found = list.contains(op.key);
                if conf.verbose {
                    debug!("thread {}: fetch {}, found={}", tid, op.key, found);
                }
                if found {
                    stats.lookup_hits += 1;
                } else {
                    stats.lookup_misses += 1;
                }
            }
        }
    }
    Ok(stats)
}

/// Spawn `conf.actor_count` actors on `list` and wait for them for at most
/// `conf.join_interval_ms`.
///
/// Return `Status::Timeout` if some actor is still running at the deadline; those actors are
/// left detached and keep their own handle on `list`. Return `Status::ActorPanicked` if an actor
/// died before reporting.
pub fn run_workload(
    list: &Arc<LockCouplingList<i64>>,
    conf: &WorkloadConf,
) -> Result<WorkloadReport, Status> {
    run_actors(list, conf, run_actor)
}

fn run_actors<F>(
    list: &Arc<LockCouplingList<i64>>,
    conf: &WorkloadConf,
    body: F,
) -> Result<WorkloadReport, Status>
where
    F: Fn(&LockCouplingList<i64>, &WorkloadConf, usize) -> Result<ActorStats, Status>
        + Send
        + Sync
        + 'static,
{
    if conf.actor_count == 0 {
        warn!("invalid workload, actor_count=0");
        return Err(Status::InvalidParam);
    }
    conf.check_val_bound()?;
    let start = util::get_cur_microseconds_time();
    let deadline = Instant::now() + Duration::from_millis(conf.join_interval_ms);
    let cores = if conf.pin_cpu {
        core_affinity::get_core_ids().unwrap_or_default()
    } else {
        vec![]
    };

    let body = Arc::new(body);
    let (tx, rx) = mpsc::channel();
    let mut handles = Vec::with_capacity(conf.actor_count);
    for actor in 0..conf.actor_count {
        let list = list.clone();
        let conf = conf.clone();
        let body = body.clone();
        let tx = tx.clone();
        let core = if cores.is_empty() {
            None
        } else {
            Some(cores[actor % cores.len()])
        };
        let spawned = thread::Builder::new()
            .name(format!("actor-{}", actor))
            .spawn(move || {
                if let Some(core) = core {
                    core_affinity::set_for_current(core);
                }
                let ret = (*body)(&list, &conf, actor);
                // the receiver is gone if the run already timed out
                let _ = tx.send((actor, ret));
            });
        match spawned {
            Ok(h) => handles.push(Some(h)),
            Err(e) => {
                error!("spawn actor {} fail, err={}", actor, e);
                return Err(Status::SpawnFailed);
            }
        }
    }
    drop(tx);

    let mut report = WorkloadReport::default();
    while report.actors_finished < conf.actor_count {
        let now = Instant::now();
        let received = if now >= deadline {
            Err(RecvTimeoutError::Timeout)
        } else {
            rx.recv_timeout(deadline - now)
        };
        match received {
            Ok((actor, ret)) => {
                let stats = ret?;
                report.stats.merge(&stats);
                report.actors_finished += 1;
                if let Some(h) = handles[actor].take() {
                    if h.join().is_err() {
                        return Err(Status::ActorPanicked);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let stuck: Vec<usize> = handles
                    .iter()
                    .enumerate()
                    .filter(|&(_, h)| h.is_some())
                    .map(|(i, _)| i)
                    .collect();
                warn!(
                    "join deadline of {} ms passed, possible deadlock, unfinished actors={:?}",
                    conf.join_interval_ms, stuck
                );
                return Err(Status::Timeout);
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(
                    "actors disconnected early, finished={} expected={}",
                    report.actors_finished, conf.actor_count
                );
                return Err(Status::ActorPanicked);
            }
        }
    }
    report.elapsed_us = util::get_cur_microseconds_time() - start;
    info!(
        "workload done, actors={} ops={} elapsed_us={}",
        report.actors_finished,
        report.stats.total_ops(),
        report.elapsed_us
    );
    Ok(report)
}

#[cfg(test)]
mod test {
    #[test]
    fn test_plan_is_repeatable() {
        use workload::{actor_plan, OpKind, WorkloadConf};

        let conf = WorkloadConf::default();
        let a = actor_plan(&conf, 3).unwrap();
        assert_eq!(a.len(), conf.exp_count);
        assert_eq!(a, actor_plan(&conf, 3).unwrap());
        assert_ne!(a, actor_plan(&conf, 4).unwrap());
        for op in a {
            let bound = if op.kind == OpKind::Insert {
                conf.val_bound
            } else {
                conf.val_bound * 2
            };
            assert!(op.key >= 0 && op.key < bound);
        }
    }

    #[test]
    fn test_run_actor_single_thread() {
        use lock_coupling_list::LockCouplingList;
        use workload::{actor_plan, run_actor, OpKind, WorkloadConf};

        let conf = WorkloadConf::default();
        let list = LockCouplingList::new();
        let stats = run_actor(&list, &conf, 0).unwrap();
        assert_eq!(stats.total_ops(), conf.exp_count as u64);
        let plan = actor_plan(&conf, 0).unwrap();
        let inserts = plan.iter().filter(|op| op.kind == OpKind::Insert).count() as u64;
        assert_eq!(stats.inserts, inserts);
        assert_eq!(list.len() as u64, stats.inserts - stats.remove_hits);
        assert!(list.check_order());
    }

    #[test]
    fn test_invalid_param() {
        use error::Status;
        use lock_coupling_list::LockCouplingList;
        use std::sync::Arc;
        use workload::{run_workload, WorkloadConf, MAX_VAL_BOUND};

        let list = Arc::new(LockCouplingList::new());
        let mut conf = WorkloadConf::default();
        conf.actor_count = 0;
        assert_eq!(run_workload(&list, &conf).unwrap_err(), Status::InvalidParam);
        conf.actor_count = 1;
        conf.val_bound = 0;
        assert_eq!(run_workload(&list, &conf).unwrap_err(), Status::InvalidParam);
        conf.val_bound = -3;
        assert_eq!(run_workload(&list, &conf).unwrap_err(), Status::InvalidParam);
        conf.val_bound = i64::max_value();
        conf.exp_count = 5;
        assert_eq!(run_workload(&list, &conf).unwrap_err(), Status::InvalidParam);
        conf.val_bound = MAX_VAL_BOUND + 1;
        assert_eq!(run_workload(&list, &conf).unwrap_err(), Status::InvalidParam);
        assert!(list.is_empty());
    }

    #[test]
    fn test_plan_rejects_bad_bound() {
        use error::Status;
        use lock_coupling_list::LockCouplingList;
        use workload::{actor_plan, run_actor, WorkloadConf, MAX_VAL_BOUND};

        let mut conf = WorkloadConf::default();
        conf.val_bound = 0;
        assert_eq!(actor_plan(&conf, 0).unwrap_err(), Status::InvalidParam);
        let list = LockCouplingList::new();
        assert_eq!(run_actor(&list, &conf, 0).unwrap_err(), Status::InvalidParam);
        conf.val_bound = i64::max_value();
        assert_eq!(actor_plan(&conf, 0).unwrap_err(), Status::InvalidParam);
        // the largest accepted bound draws keys without overflow
        conf.val_bound = MAX_VAL_BOUND;
        for op in actor_plan(&conf, 0).unwrap() {
            assert!(op.key >= 0 && op.key < MAX_VAL_BOUND * 2);
        }
        assert!(list.is_empty());
    }

    #[test]
    fn test_actor_panic_is_reported() {
        use error::Status;
        use lock_coupling_list::LockCouplingList;
        use std::sync::Arc;
        use workload::{run_actor, run_actors, WorkloadConf};

        let list = Arc::new(LockCouplingList::new());
        let conf = WorkloadConf {
            actor_count: 4,
            ..WorkloadConf::default()
        };
        let ret = run_actors(&list, &conf, |list, conf, actor| {
            if actor == 2 {
                panic!("actor {} gives up", actor);
            }
            run_actor(list, conf, actor)
        });
        assert_eq!(ret.unwrap_err(), Status::ActorPanicked);
        assert!(list.check_order());
    }

    #[test]
    fn test_actor_error_is_forwarded() {
        use error::Status;
        use lock_coupling_list::LockCouplingList;
        use std::sync::Arc;
        use workload::{run_actors, WorkloadConf};

        let list = Arc::new(LockCouplingList::new());
        let conf = WorkloadConf {
            actor_count: 2,
            ..WorkloadConf::default()
        };
        let ret = run_actors(&list, &conf, |_, _, _| Err(Status::InvalidParam));
        assert_eq!(ret.unwrap_err(), Status::InvalidParam);
    }
}
