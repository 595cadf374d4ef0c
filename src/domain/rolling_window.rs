// Fixed-capacity rolling window for live chart series
use super::sample::{Metric, Sample};
use std::collections::VecDeque;

pub const DEFAULT_WINDOW_CAPACITY: usize = 50;

/// FIFO buffer holding the most recent live samples of one series.
///
/// Not synchronized: a single owner mutates it and hands out snapshots.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl RollingWindow {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Point-in-time copy, independent of later mutation.
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            samples: self.samples.iter().cloned().collect(),
            capacity: self.capacity,
        }
    }
}

/// Immutable view of a rolling window. Positions are always 0..len.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSnapshot {
    pub samples: Vec<Sample>,
    pub capacity: usize,
}

impl WindowSnapshot {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Chart points for one metric, x being the sample's position in the window.
    pub fn points(&self, metric: Metric) -> Vec<(f64, f64)> {
        self.samples
            .iter()
            .enumerate()
            .map(|(position, sample)| (position as f64, sample.value(metric)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(power: f64) -> Sample {
        let mut s = Sample::new("c-1", None);
        s.power = power;
        s
    }

    #[test]
    fn test_append_below_capacity() {
        let mut window = RollingWindow::new(3);
        window.append(sample(1.0));
        window.append(sample(2.0));

        assert_eq!(window.len(), 2);
        assert_eq!(window.snapshot().points(Metric::Power), vec![(0.0, 1.0), (1.0, 2.0)]);
    }

    #[test]
    fn test_evicts_oldest_and_reindexes() {
        let mut window = RollingWindow::new(3);
        for p in 1..=5 {
            window.append(sample(p as f64));
        }

        assert_eq!(window.len(), 3);
        assert_eq!(
            window.snapshot().points(Metric::Power),
            vec![(0.0, 3.0), (1.0, 4.0), (2.0, 5.0)]
        );
    }

    #[test]
    fn test_retains_most_recent_in_arrival_order() {
        let capacity = 50;
        let mut window = RollingWindow::new(capacity);
        let appended: Vec<f64> = (0..137).map(|i| i as f64).collect();
        for &p in &appended {
            window.append(sample(p));
            assert!(window.len() <= capacity);
        }

        let retained: Vec<f64> = window.snapshot().samples.iter().map(|s| s.power).collect();
        assert_eq!(retained, appended[appended.len() - capacity..].to_vec());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut window = RollingWindow::new(2);
        window.append(sample(1.0));
        let snapshot = window.snapshot();
        window.append(sample(2.0));
        window.append(sample(3.0));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.latest().unwrap().power, 1.0);
    }

    #[test]
    fn test_clear_and_zero_capacity() {
        let mut window = RollingWindow::new(0);
        assert_eq!(window.capacity(), 1);
        window.append(sample(1.0));
        window.append(sample(2.0));
        assert_eq!(window.snapshot().latest().unwrap().power, 2.0);

        window.clear();
        assert!(window.is_empty());
    }
}
