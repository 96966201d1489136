//! Component C: the per-thread update list.
//!
//! `fd_updt`/`fd_nbupdt` in the original are thread-local arrays of FD
//! numbers awaiting a poller registration change. Here each thread's
//! `Engine` handle owns one `UpdateList`; nothing but that thread ever
//! touches its `Vec`, so no lock is needed on the list itself — only the
//! per-slot `update_mask` bit (tested/set atomically) needs to survive a
//! racing reader from another thread checking whether `fd` is already
//! queued anywhere.

use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;

use crate::table::FdTable;
use crate::thread_ctx::tid_bit;

pub struct UpdateList {
    tid: u32,
    pending: Vec<RawFd>,
}

impl UpdateList {
    pub fn new(tid: u32) -> Self {
        UpdateList {
            tid,
            pending: Vec::new(),
        }
    }

    /// `updt_fd_polling`: queues `fd` for this thread's next flush unless
    /// it is already queued (on any thread — `update_mask` is shared).
    pub fn enqueue(&mut self, table: &FdTable, fd: RawFd) {
        let slot = match table.get(fd) {
            Ok(slot) => slot,
            Err(_) => return,
        };
        let bit = tid_bit(self.tid);
        let prev = slot.update_mask.fetch_or(bit, Ordering::AcqRel);
        if prev & bit == 0 {
            self.pending.push(fd);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drains the queued FDs, clearing each one's bit in `update_mask` as
    /// it goes and handing them to `apply` (the `Engine`'s poller
    /// registration step). `apply` runs with the list already emptied of
    /// that entry, so a reentrant `enqueue` for the same fd from inside
    /// `apply` queues it again rather than being silently dropped.
    pub fn flush(&mut self, table: &FdTable, mut apply: impl FnMut(RawFd)) {
        let bit = tid_bit(self.tid);
        for fd in self.pending.drain(..) {
            if let Ok(slot) = table.get(fd) {
                slot.update_mask.fetch_and(!bit, Ordering::AcqRel);
            }
            apply(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_against_update_mask() {
        let table = FdTable::new(16);
        let mut list = UpdateList::new(0);
        list.enqueue(&table, 3);
        list.enqueue(&table, 3);
        assert_eq!(list.pending.len(), 1);
    }

    #[test]
    fn flush_clears_mask_and_visits_each_once() {
        let table = FdTable::new(16);
        let mut list = UpdateList::new(0);
        list.enqueue(&table, 3);
        list.enqueue(&table, 5);

        let mut seen = Vec::new();
        list.flush(&table, |fd| seen.push(fd));
        assert_eq!(seen, vec![3, 5]);
        assert!(list.is_empty());
        assert_eq!(table.get(3).unwrap().update_mask.load(Ordering::Relaxed), 0);
    }
}
