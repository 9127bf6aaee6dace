//! Ordered collection of job records that have not been drained yet.

use super::job::JobRecord;

pub(crate) struct ActiveSet<I, O> {
    records: Vec<JobRecord<I, O>>,
}

impl<I, O> ActiveSet<I, O> {
    pub(crate) fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, record: JobRecord<I, O>) {
        self.records.push(record);
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn running(&self) -> usize {
        self.records.iter().filter(|r| r.is_running()).count()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, JobRecord<I, O>> {
        self.records.iter_mut()
    }

    /// Drop every terminal record; returns how many were removed.
    pub(crate) fn remove_terminal(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !r.is_terminal());
        before - self.records.len()
    }

    /// Empty the set (run teardown).
    pub(crate) fn take_all(&mut self) -> Vec<JobRecord<I, O>> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn remove_terminal_keeps_order_of_the_rest() {
        let mut set: ActiveSet<u32, u32> = ActiveSet::new();
        for i in 0..4 {
            set.push(JobRecord::new(i, i.to_string(), i as u32));
        }
        // Time out records 1 and 3.
        for record in set.iter_mut().filter(|r| r.index % 2 == 1) {
            let later = record.start_time + Duration::from_secs(2);
            assert!(record.check(later, Some(Duration::from_secs(1))).is_some());
        }
        assert_eq!(set.remove_terminal(), 2);
        assert_eq!(set.len(), 2);
        let left: Vec<usize> = set.iter_mut().map(|r| r.index).collect();
        assert_eq!(left, vec![0, 2]);
        assert_eq!(set.running(), 0);
        assert_eq!(set.take_all().len(), 2);
        assert!(set.is_empty());
    }
}
