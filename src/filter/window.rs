//! Snapshot windows and first-match-wins assignment (§3, §4.3).

use serde::Deserialize;

/// A half-open-in-spirit, closed-in-representation time window used to
/// select which traversals survive filtering.
///
/// Bounds are inclusive of the start and inclusive of the (possibly
/// clipped) end, per the GLOSSARY.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
pub struct SnapshotWindow {
    /// Inclusive start, seconds since midnight of the simulation day.
    pub start: i32,
    /// Inclusive end, seconds since midnight.
    pub end: i32,
}

impl SnapshotWindow {
    /// `true` if `time` falls within `[start, end]` inclusive.
    pub fn contains(&self, time: i32) -> bool {
        self.start <= time && time <= self.end
    }
}

/// An ordered list of [`SnapshotWindow`]s. Windows are intended to be
/// non-overlapping, but the spec tolerates overlap: the first window (by
/// configured index order) containing a given `time_enter` wins.
#[derive(Debug, Clone)]
pub struct SnapshotWindows(Vec<SnapshotWindow>);

impl SnapshotWindows {
    /// Wrap a configured, ordered list of windows.
    pub fn new(windows: Vec<SnapshotWindow>) -> Self {
        SnapshotWindows(windows)
    }

    /// Find the first configured window containing `time_enter`, if any.
    pub fn find_containing(&self, time_enter: i32) -> Option<(usize, SnapshotWindow)> {
        self.0
            .iter()
            .enumerate()
            .find(|(_, window)| window.contains(time_enter))
            .map(|(idx, window)| (idx, *window))
    }

    /// Number of configured windows.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if no windows are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_match_wins_on_overlap() {
        let windows = SnapshotWindows::new(vec![
            SnapshotWindow { start: 100, end: 300 },
            SnapshotWindow { start: 200, end: 400 },
        ]);
        let (idx, _) = windows.find_containing(250).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn inclusive_bounds() {
        let window = SnapshotWindow { start: 100, end: 200 };
        assert!(window.contains(100));
        assert!(window.contains(200));
        assert!(!window.contains(99));
        assert!(!window.contains(201));
    }

    #[test]
    fn no_window_contains_returns_none() {
        let windows = SnapshotWindows::new(vec![SnapshotWindow { start: 100, end: 200 }]);
        assert!(windows.find_containing(50).is_none());
    }
}
