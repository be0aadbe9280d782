use crate::error::Error;
use crate::runtime::{ReactorConfig, SPILL_TO_HEAP_THRESHOLD};
use io_uring::IoUring;
use io_uring::squeue::Entry;
use log::warn;
use smallvec::SmallVec;
use std::io;

/// Raw fields of one completion queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completion {
    pub(crate) key: usize,
    pub(crate) res: i32,
    pub(crate) flags: u32,
}

/// Thin wrapper over `io_uring` owned by a single driving thread.
pub(crate) struct CompletionRing {
    ring: IoUring,
}

impl CompletionRing {
    pub(crate) fn try_new(cfg: &ReactorConfig) -> Result<Self, Error> {
        let ring = IoUring::builder()
            // The completion ring is larger than the submission ring, so a
            // burst of completions does not overflow while we are busy.
            .setup_cqsize(cfg.cq_entries())
            .build(cfg.entries)?;

        if !ring.params().is_feature_nodrop() {
            warn!(
                "IORING_FEAT_NODROP is not enabled for this kernel. The kernel will silently drop completions if the CQ ring is full."
            );
        }

        Ok(CompletionRing { ring })
    }

    pub(crate) fn sq_capacity(&mut self) -> usize {
        self.ring.submission().capacity()
    }

    pub(crate) fn cq_capacity(&mut self) -> usize {
        self.ring.completion().capacity()
    }

    pub(crate) fn num_unsubmitted(&mut self) -> usize {
        self.ring.submission().len()
    }

    /// Queues `entry`, flushing the submission ring once if it is full.
    ///
    /// # Safety
    ///
    /// Memory referenced by `entry` must stay valid until the kernel consumed
    /// it, see [`Operation`](super::Operation).
    pub(crate) unsafe fn push(&mut self, entry: &Entry) -> Result<(), Error> {
        if unsafe { self.ring.submission().push(entry) }.is_ok() {
            return Ok(());
        }

        self.submit()?;

        unsafe { self.ring.submission().push(entry) }.map_err(|_| Error::SubmissionQueueFull)
    }

    /// Submits every queued entry without waiting for completions.
    pub(crate) fn submit(&mut self) -> Result<usize, Error> {
        loop {
            match self.ring.submit() {
                Ok(n) => return Ok(n),
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                // Completion backlog, harvesting will make room.
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => return Ok(0),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Submits every queued entry and blocks until `want` completions are
    /// available.
    pub(crate) fn submit_and_wait(&mut self, want: usize) -> io::Result<usize> {
        loop {
            match self.ring.submit_and_wait(want) {
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                res => return res,
            }
        }
    }

    /// Harvests every completion currently visible, without blocking.
    pub(crate) fn drain(&mut self) -> SmallVec<[Completion; SPILL_TO_HEAP_THRESHOLD]> {
        self.ring
            .completion()
            .map(|cqe| Completion {
                key: cqe.user_data() as usize,
                res: cqe.result(),
                flags: cqe.flags().into(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Builder;
    use anyhow::Result;
    use io_uring::opcode::Nop;
    use rstest::rstest;

    fn ring_or_skip(cfg: &ReactorConfig) -> Option<CompletionRing> {
        match CompletionRing::try_new(cfg) {
            Ok(ring) => Some(ring),
            Err(e) => {
                eprintln!("io_uring unavailable, skipping: {}", e);
                None
            }
        }
    }

    #[rstest]
    #[case::small(8, 2)]
    #[case::default(256, 2)]
    #[case::wide_cq(32, 4)]
    fn test_ring_capacity(#[case] entries: u32, #[case] multiplier: u32) -> Result<()> {
        let cfg = ReactorConfig::try_from(
            Builder::new()
                .entries(entries)
                .cq_size_multiplier(multiplier),
        )?;
        let Some(mut ring) = ring_or_skip(&cfg) else {
            return Ok(());
        };

        assert_eq!(ring.sq_capacity(), entries as usize);
        assert_eq!(ring.cq_capacity(), (entries * multiplier) as usize);
        Ok(())
    }

    #[test]
    fn test_push_flushes_when_full() -> Result<()> {
        let cfg = ReactorConfig::try_from(Builder::new().entries(4))?;
        let Some(mut ring) = ring_or_skip(&cfg) else {
            return Ok(());
        };

        for key in 0..8 {
            unsafe { ring.push(&Nop::new().build().user_data(key))? };
        }
        assert_eq!(ring.num_unsubmitted(), 4);

        ring.submit_and_wait(8)?;
        let mut keys = ring.drain().iter().map(|c| c.key).collect::<Vec<_>>();
        keys.sort_unstable();

        assert_eq!(keys, (0..8).collect::<Vec<_>>());
        assert_eq!(ring.num_unsubmitted(), 0);
        Ok(())
    }

    #[test]
    fn test_drain_is_non_blocking() -> Result<()> {
        let Some(mut ring) = ring_or_skip(&ReactorConfig::default()) else {
            return Ok(());
        };

        assert!(ring.drain().is_empty());
        assert_eq!(ring.submit()?, 0);
        Ok(())
    }
}
