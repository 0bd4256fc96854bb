//! Priority queue of machines ordered by their power draw.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::common::MachineId;

#[derive(Clone, Copy, Debug)]
struct QueueEntry {
    power: f64,
    machine: MachineId,
}

impl Eq for QueueEntry {}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

// Reversed, so that BinaryHeap pops the machine with the lowest power (and then the lowest ID) first.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .power
            .total_cmp(&self.power)
            .then_with(|| other.machine.cmp(&self.machine))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of machines keyed by the power draw observed when the machine was (re)inserted.
///
/// Consumers pop a prefix of the queue, make their decision and push the popped machines back with
/// fresh keys, so the queue always holds the full roster. The key of a machine whose load changed
/// outside of such a sweep is replaced with [`EnergyQueue::update`].
#[derive(Clone, Default)]
pub struct EnergyQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl EnergyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, machine: MachineId, power: f64) {
        self.heap.push(QueueEntry { power, machine });
    }

    /// Replaces the key of the machine, inserting the machine if it is not queued.
    pub fn update(&mut self, machine: MachineId, power: f64) {
        self.heap.retain(|entry| entry.machine != machine);
        self.push(machine, power);
    }

    /// Removes and returns the machine with the lowest power draw.
    pub fn pop(&mut self) -> Option<MachineId> {
        self.heap.pop().map(|entry| entry.machine)
    }

    /// Removes all machines and returns them in ascending order of power draw.
    pub fn drain_ordered(&mut self) -> Vec<MachineId> {
        let mut result = Vec::with_capacity(self.heap.len());
        while let Some(machine) = self.pop() {
            result.push(machine);
        }
        result
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_lowest_power_first() {
        let mut queue = EnergyQueue::new();
        queue.push(0, 150.);
        queue.push(1, 80.);
        queue.push(2, 120.);
        queue.push(3, 80.);
        assert_eq!(queue.drain_ordered(), vec![1, 3, 2, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn reinserted_machine_uses_new_key() {
        let mut queue = EnergyQueue::new();
        queue.push(0, 10.);
        queue.push(1, 20.);
        let first = queue.pop().unwrap();
        assert_eq!(first, 0);
        queue.push(first, 30.);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain_ordered(), vec![1, 0]);
    }

    #[test]
    fn update_replaces_key() {
        let mut queue = EnergyQueue::new();
        queue.push(0, 100.);
        queue.push(1, 100.);
        queue.update(0, 155.);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(1));
        queue.update(2, 50.);
        assert_eq!(queue.drain_ordered(), vec![2, 0]);
    }
}
