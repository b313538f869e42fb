//! Collective reductions across walkers.
//!
//! A [`Communicator`] is one walker's handle on the world group. Reductions
//! are blocking and collective: every member submits its local array and
//! every member receives the same element-wise sum.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SyncError {
    #[error("rank {rank} submitted {found} elements, round expects {expected}")]
    LengthMismatch {
        rank: usize,
        expected: usize,
        found: usize,
    },
    #[error("ranks submitted different payload kinds in one round")]
    KindMismatch,
    #[error("rank {rank} left the group before the round completed")]
    PeerDeparted { rank: usize },
    #[error("topology error: {0}")]
    Topology(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

pub trait Communicator: Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Whether this rank speaks for its walker's local group. Only local
    /// masters contribute histogram hits.
    fn is_local_master(&self) -> bool {
        true
    }

    fn all_reduce_sum_f64(&mut self, local: &[f64], global: &mut [f64]) -> SyncResult<()>;
    fn all_reduce_sum_u64(&mut self, local: &[u64], global: &mut [u64]) -> SyncResult<()>;
}

fn check_output(rank: usize, expected: usize, found: usize) -> SyncResult<()> {
    if expected != found {
        return Err(SyncError::LengthMismatch {
            rank,
            expected,
            found,
        });
    }
    Ok(())
}

/// World made of a single walker.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleWalker;

impl Communicator for SingleWalker {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum_f64(&mut self, local: &[f64], global: &mut [f64]) -> SyncResult<()> {
        check_output(0, local.len(), global.len())?;
        global.copy_from_slice(local);
        Ok(())
    }

    fn all_reduce_sum_u64(&mut self, local: &[u64], global: &mut [u64]) -> SyncResult<()> {
        check_output(0, local.len(), global.len())?;
        global.copy_from_slice(local);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Payload {
    F64(Vec<f64>),
    U64(Vec<u64>),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::F64(v) => v.len(),
            Payload::U64(v) => v.len(),
        }
    }
}

#[derive(Debug)]
struct Round {
    generation: u64,
    arrived: usize,
    slots: Vec<Option<Payload>>,
    result: Option<Arc<SyncResult<Payload>>>,
    departed: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    round: Mutex<Round>,
    done: Condvar,
}

/// Sums the slots in rank order so every walker sees bit-identical values.
fn reduce_slots(slots: &mut [Option<Payload>]) -> SyncResult<Payload> {
    let mut iter = slots.iter_mut().map(Option::take).enumerate();
    let mut acc = match iter.next() {
        Some((_, Some(first))) => first,
        _ => return Err(SyncError::Topology("round completed without payloads".into())),
    };
    let expected = acc.len();
    for (rank, slot) in iter {
        let Some(payload) = slot else {
            return Err(SyncError::Topology(format!("rank {rank} missing from round")));
        };
        if payload.len() != expected {
            return Err(SyncError::LengthMismatch {
                rank,
                expected,
                found: payload.len(),
            });
        }
        match (&mut acc, payload) {
            (Payload::F64(a), Payload::F64(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
            }
            (Payload::U64(a), Payload::U64(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
            }
            _ => return Err(SyncError::KindMismatch),
        }
    }
    Ok(acc)
}

/// Walkers living as threads of one process, one handle per walker.
///
/// Rounds are numbered by a generation counter: a round only completes once
/// every rank has submitted, and nobody can enter round `k+1` before round
/// `k` completed. Dropping a handle marks its rank as departed, which fails
/// every pending and future round.
#[derive(Debug)]
pub struct InProcessGroup {
    rank: usize,
    shared: Arc<Shared>,
}

impl InProcessGroup {
    pub fn world(size: usize) -> Vec<InProcessGroup> {
        let shared = Arc::new(Shared {
            size,
            round: Mutex::new(Round {
                generation: 0,
                arrived: 0,
                slots: vec![None; size],
                result: None,
                departed: None,
            }),
            done: Condvar::new(),
        });
        (0..size)
            .map(|rank| InProcessGroup {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn exchange(&self, payload: Payload) -> SyncResult<Arc<SyncResult<Payload>>> {
        let mut round = self.shared.round.lock();
        if let Some(rank) = round.departed {
            return Err(SyncError::PeerDeparted { rank });
        }
        round.slots[self.rank] = Some(payload);
        round.arrived += 1;
        if round.arrived == self.shared.size {
            let result = Arc::new(reduce_slots(&mut round.slots));
            round.result = Some(Arc::clone(&result));
            round.arrived = 0;
            round.generation += 1;
            self.shared.done.notify_all();
            return Ok(result);
        }

        let generation = round.generation;
        while round.generation == generation && round.departed.is_none() {
            self.shared.done.wait(&mut round);
        }
        if round.generation == generation {
            let rank = round.departed.unwrap_or(self.rank);
            return Err(SyncError::PeerDeparted { rank });
        }
        round
            .result
            .clone()
            .ok_or_else(|| SyncError::Topology("round finished without a result".into()))
    }
}

impl Communicator for InProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_reduce_sum_f64(&mut self, local: &[f64], global: &mut [f64]) -> SyncResult<()> {
        check_output(self.rank, local.len(), global.len())?;
        let result = self.exchange(Payload::F64(local.to_vec()))?;
        match result.as_ref() {
            Ok(Payload::F64(sum)) => {
                check_output(self.rank, sum.len(), global.len())?;
                global.copy_from_slice(sum);
                Ok(())
            }
            Ok(Payload::U64(_)) => Err(SyncError::KindMismatch),
            Err(err) => Err(err.clone()),
        }
    }

    fn all_reduce_sum_u64(&mut self, local: &[u64], global: &mut [u64]) -> SyncResult<()> {
        check_output(self.rank, local.len(), global.len())?;
        let result = self.exchange(Payload::U64(local.to_vec()))?;
        match result.as_ref() {
            Ok(Payload::U64(sum)) => {
                check_output(self.rank, sum.len(), global.len())?;
                global.copy_from_slice(sum);
                Ok(())
            }
            Ok(Payload::F64(_)) => Err(SyncError::KindMismatch),
            Err(err) => Err(err.clone()),
        }
    }
}

impl Drop for InProcessGroup {
    fn drop(&mut self) {
        let mut round = self.shared.round.lock();
        if round.departed.is_none() {
            round.departed = Some(self.rank);
        }
        self.shared.done.notify_all();
    }
}
