//! Frame placement policies for the coremap.

use super::CoreMapEntry;

/// Chooses which free frame the next allocation gets.
pub trait PlacementAlgorithm: Default {
    /// Returns the number of a free frame, or `None` if every frame in
    /// `core_map` is allocated. The returned frame is not marked allocated.
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize>;
}

#[derive(Default)]
pub struct NextFit {
    /// The frame number to start the next search from.
    position: usize,
}

// No state between searches.
#[derive(Default)]
pub struct FirstFit;

impl PlacementAlgorithm for NextFit {
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize> {
        let total_frames = core_map.len();
        if total_frames == 0 {
            return None;
        }

        // Search from `position` to the end, then wrap around to it.
        let frame = (0..total_frames)
            .map(|i| (self.position + i) % total_frames)
            .find(|&frame| !core_map[frame].allocated())?;

        self.position = (frame + 1) % total_frames;
        Some(frame)
    }
}

impl PlacementAlgorithm for FirstFit {
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize> {
        core_map.iter().position(|entry| !entry.allocated())
    }
}
