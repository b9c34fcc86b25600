//! Admission and concurrency policy over pending jobs.
//!
//! Pure bookkeeping: the scheduler decides which jobs to submit to the
//! unrestricting service and which ready jobs get a run slot; the job
//! manager executes the decisions. FIFO within each size class; a free
//! large slot may be loaned to two small jobs while no large work waits;
//! small slots never upgrade to large. The scheduler never interrupts a
//! running job.

use std::collections::{HashSet, VecDeque};

use fetcharr_core::InfoHash;

/// Cap on submissions outstanding against the gateway.
pub(crate) const MAX_OUTSTANDING_SUBMISSIONS: usize = 16;

/// Decision produced by an admission pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Submit this queued job to the unrestricting service.
    Submit(InfoHash),
    /// Grant a run slot to this ready job.
    Run(InfoHash, SlotClass),
}

/// Which capacity a granted run slot consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotClass {
    /// One of the large slots.
    Large,
    /// One of the small slots.
    Small,
    /// Half of a large slot loaned out while the large queue is empty.
    BorrowedSmall,
}

#[derive(Debug)]
pub(crate) struct Scheduler {
    concurrent_large: usize,
    concurrent_small: usize,
    max_pending: usize,
    queued: VecDeque<InfoHash>,
    pending: HashSet<InfoHash>,
    ready_large: VecDeque<InfoHash>,
    ready_small: VecDeque<InfoHash>,
    running_large: HashSet<InfoHash>,
    running_small: HashSet<InfoHash>,
    borrowed_small: HashSet<InfoHash>,
}

impl Scheduler {
    pub(crate) fn new(concurrent_large: u32, concurrent_small: u32, max_pending: usize) -> Self {
        Self {
            concurrent_large: concurrent_large as usize,
            concurrent_small: concurrent_small as usize,
            max_pending,
            queued: VecDeque::new(),
            pending: HashSet::new(),
            ready_large: VecDeque::new(),
            ready_small: VecDeque::new(),
            running_large: HashSet::new(),
            running_small: HashSet::new(),
            borrowed_small: HashSet::new(),
        }
    }

    /// Queue a brand-new job for submission.
    pub(crate) fn enqueue_new(&mut self, hash: InfoHash) {
        if !self.queued.contains(&hash) && !self.pending.contains(&hash) {
            self.queued.push_back(hash);
        }
    }

    /// Record a submission made outside the admission pass (metainfo uploads
    /// submit at add time).
    pub(crate) fn note_submitted(&mut self, hash: InfoHash) {
        self.pending.insert(hash);
    }

    /// The submission finished (ready or failed); it no longer counts
    /// against the outstanding cap.
    pub(crate) fn submission_done(&mut self, hash: &InfoHash) {
        self.pending.remove(hash);
    }

    /// Queue a job whose hosted links are ready.
    pub(crate) fn enqueue_ready(&mut self, hash: InfoHash, large: bool) {
        let queue = if large {
            &mut self.ready_large
        } else {
            &mut self.ready_small
        };
        if !queue.contains(&hash) {
            queue.push_back(hash);
        }
    }

    /// A running job gave its slot back (completion, error, pause, retry).
    pub(crate) fn release_run(&mut self, hash: &InfoHash) {
        self.running_large.remove(hash);
        self.running_small.remove(hash);
        self.borrowed_small.remove(hash);
    }

    /// Forget a job entirely (delete, terminal error).
    pub(crate) fn remove(&mut self, hash: &InfoHash) {
        self.queued.retain(|h| h != hash);
        self.pending.remove(hash);
        self.ready_large.retain(|h| h != hash);
        self.ready_small.retain(|h| h != hash);
        self.release_run(hash);
    }

    /// Jobs waiting for a run slot or for submission.
    pub(crate) fn depth(&self) -> usize {
        self.queued.len() + self.ready_large.len() + self.ready_small.len()
    }

    /// Jobs currently holding a run slot.
    pub(crate) fn running(&self) -> usize {
        self.running_large.len() + self.running_small.len() + self.borrowed_small.len()
    }

    /// Large capacity consumed by loans: every started pair of borrowed
    /// smalls pins one large slot.
    fn loaned_slots(&self) -> usize {
        self.borrowed_small.len().div_ceil(2)
    }

    fn free_large_slots(&self) -> usize {
        self.concurrent_large
            .saturating_sub(self.running_large.len() + self.loaned_slots())
    }

    /// Compute every admission the current state allows.
    pub(crate) fn admissions(&mut self) -> Vec<Admission> {
        let mut out = Vec::new();

        while self.pending.len() < self.max_pending {
            let Some(hash) = self.queued.pop_front() else {
                break;
            };
            self.pending.insert(hash.clone());
            out.push(Admission::Submit(hash));
        }

        while self.free_large_slots() > 0 {
            let Some(hash) = self.ready_large.pop_front() else {
                break;
            };
            self.running_large.insert(hash.clone());
            out.push(Admission::Run(hash, SlotClass::Large));
        }

        while self.running_small.len() < self.concurrent_small {
            let Some(hash) = self.ready_small.pop_front() else {
                break;
            };
            self.running_small.insert(hash.clone());
            out.push(Admission::Run(hash, SlotClass::Small));
        }

        // Loan idle large capacity to small jobs, two per slot, only while
        // no large work is waiting. Small slots never flow the other way.
        if self.ready_large.is_empty() {
            while self.borrowed_small.len()
                < 2 * self
                    .concurrent_large
                    .saturating_sub(self.running_large.len())
            {
                let Some(hash) = self.ready_small.pop_front() else {
                    break;
                };
                self.borrowed_small.insert(hash.clone());
                out.push(Admission::Run(hash, SlotClass::BorrowedSmall));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(i: u32) -> InfoHash {
        InfoHash::parse(&format!("{i:040x}")).expect("hash")
    }

    #[test]
    fn submissions_are_fifo_and_capped() {
        let mut sched = Scheduler::new(1, 3, 2);
        for i in 0..4 {
            sched.enqueue_new(hash(i));
        }
        let admissions = sched.admissions();
        assert_eq!(
            admissions,
            vec![
                Admission::Submit(hash(0)),
                Admission::Submit(hash(1)),
            ]
        );
        // Nothing more until a submission finishes.
        assert!(sched.admissions().is_empty());
        sched.submission_done(&hash(0));
        assert_eq!(sched.admissions(), vec![Admission::Submit(hash(2))]);
    }

    #[test]
    fn large_slots_are_exclusive_and_fifo() {
        let mut sched = Scheduler::new(1, 3, 16);
        sched.enqueue_ready(hash(1), true);
        sched.enqueue_ready(hash(2), true);

        let admissions = sched.admissions();
        assert_eq!(
            admissions,
            vec![Admission::Run(hash(1), SlotClass::Large)]
        );
        // Second large job waits for the slot.
        assert!(sched.admissions().is_empty());

        sched.release_run(&hash(1));
        assert_eq!(
            sched.admissions(),
            vec![Admission::Run(hash(2), SlotClass::Large)]
        );
    }

    #[test]
    fn small_slots_fill_up_to_their_limit() {
        let mut sched = Scheduler::new(0, 2, 16);
        for i in 0..3 {
            sched.enqueue_ready(hash(i), false);
        }
        let admissions = sched.admissions();
        assert_eq!(admissions.len(), 2);
        assert!(admissions.iter().all(|a| matches!(a, Admission::Run(_, SlotClass::Small))));

        sched.release_run(&hash(0));
        assert_eq!(
            sched.admissions(),
            vec![Admission::Run(hash(2), SlotClass::Small)]
        );
    }

    #[test]
    fn idle_large_slot_is_loaned_to_two_smalls() {
        let mut sched = Scheduler::new(1, 1, 16);
        sched.enqueue_ready(hash(1), false);
        sched.enqueue_ready(hash(2), false);
        sched.enqueue_ready(hash(3), false);

        let admissions = sched.admissions();
        // One small slot plus a large slot loaned to two more smalls.
        assert_eq!(admissions.len(), 3);
        assert_eq!(admissions[0], Admission::Run(hash(1), SlotClass::Small));
        assert_eq!(
            admissions[1],
            Admission::Run(hash(2), SlotClass::BorrowedSmall)
        );
        assert_eq!(
            admissions[2],
            Admission::Run(hash(3), SlotClass::BorrowedSmall)
        );
    }

    #[test]
    fn loans_are_withheld_while_large_work_waits() {
        let mut sched = Scheduler::new(1, 1, 16);
        sched.enqueue_ready(hash(1), true);
        sched.enqueue_ready(hash(2), false);
        sched.enqueue_ready(hash(3), false);

        let admissions = sched.admissions();
        assert!(admissions.contains(&Admission::Run(hash(1), SlotClass::Large)));
        assert!(admissions.contains(&Admission::Run(hash(2), SlotClass::Small)));
        // hash(3) would need a loan, but the only large slot is busy.
        assert_eq!(admissions.len(), 2);
    }

    #[test]
    fn borrowed_smalls_block_the_next_large_until_released() {
        let mut sched = Scheduler::new(1, 0, 16);
        sched.enqueue_ready(hash(1), false);
        let admissions = sched.admissions();
        assert_eq!(
            admissions,
            vec![Admission::Run(hash(1), SlotClass::BorrowedSmall)]
        );

        // A large arrival now waits: the loaned slot is never reclaimed early.
        sched.enqueue_ready(hash(2), true);
        assert!(sched.admissions().is_empty());

        sched.release_run(&hash(1));
        assert_eq!(
            sched.admissions(),
            vec![Admission::Run(hash(2), SlotClass::Large)]
        );
    }

    #[test]
    fn remove_purges_every_queue() {
        let mut sched = Scheduler::new(1, 1, 16);
        sched.enqueue_new(hash(1));
        sched.enqueue_ready(hash(2), true);
        sched.enqueue_ready(hash(3), false);
        sched.remove(&hash(1));
        sched.remove(&hash(2));
        sched.remove(&hash(3));
        assert_eq!(sched.depth(), 0);
        assert!(sched.admissions().is_empty());
    }

    #[test]
    fn duplicate_enqueues_are_ignored() {
        let mut sched = Scheduler::new(1, 1, 16);
        sched.enqueue_new(hash(1));
        sched.enqueue_new(hash(1));
        assert_eq!(sched.depth(), 1);
        sched.enqueue_ready(hash(2), false);
        sched.enqueue_ready(hash(2), false);
        assert_eq!(sched.depth(), 2);
    }
}
