use log::trace;

use crate::comm::Communicator;
use crate::error::{AbfError, AbfResult};
use crate::histogram::Histogram;

/// Merges every walker's local histogram into the shared world view.
pub struct GlobalSynchronizer {
    comm: Box<dyn Communicator>,
    rounds: u64,
}

impl GlobalSynchronizer {
    pub fn new(comm: Box<dyn Communicator>) -> Self {
        Self { comm, rounds: 0 }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn is_local_master(&self) -> bool {
        self.comm.is_local_master()
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Collective: blocks until every walker of the world has submitted.
    pub fn synchronize(&mut self, local: &Histogram, world: &mut Histogram) -> AbfResult<()> {
        if local.n_bins() != world.n_bins() || local.n_cvs() != world.n_cvs() {
            return Err(AbfError::Mismatch(
                "local and world histograms have different layouts".into(),
            ));
        }
        let forces = local.flat_forces();
        let mut merged_forces = vec![0.0; forces.len()];
        self.comm.all_reduce_sum_f64(&forces, &mut merged_forces)?;
        let mut merged_counts = vec![0u64; local.n_bins()];
        self.comm
            .all_reduce_sum_u64(local.flat_counts(), &mut merged_counts)?;
        world.load_flat(&merged_forces, &merged_counts)?;
        self.rounds += 1;
        trace!(
            "rank {} finished sync round {} ({} world hits)",
            self.comm.rank(),
            self.rounds,
            world.total_hits()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{InProcessGroup, SingleWalker};
    use std::thread;
    use warp_grid::GridSpec;

    fn spec() -> GridSpec {
        GridSpec::new(vec![0.0], vec![10.0], vec![10])
    }

    #[test]
    fn two_walkers_merge_same_bin() {
        let handles: Vec<_> = InProcessGroup::world(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut sync = GlobalSynchronizer::new(Box::new(comm));
                    let mut local = Histogram::new(&spec()).unwrap();
                    let mut world = Histogram::new(&spec()).unwrap();
                    local.record(&[3], &[5.0]).unwrap();
                    sync.synchronize(&local, &mut world).unwrap();
                    world
                })
            })
            .collect();
        let worlds: Vec<Histogram> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for world in &worlds {
            assert_eq!(world.force_sum(&[3]).unwrap(), &[10.0]);
            assert_eq!(world.count(&[3]).unwrap(), 2);
            assert_eq!(world.total_hits(), 2);
        }
        assert_eq!(worlds[0], worlds[1]);
    }

    #[test]
    fn single_walker_world_mirrors_local() {
        let mut sync = GlobalSynchronizer::new(Box::new(SingleWalker));
        let mut local = Histogram::new(&spec()).unwrap();
        let mut world = Histogram::new(&spec()).unwrap();
        local.record(&[-1], &[2.0]).unwrap();
        sync.synchronize(&local, &mut world).unwrap();
        assert_eq!(world, local);
        assert_eq!(sync.rounds(), 1);
    }
}
