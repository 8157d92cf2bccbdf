use std::sync::atomic::{AtomicU32, Ordering};

use crate::util::Rgba;

/// One RGBA f32 pixel that can be added to from many threads.
#[derive(Debug, Default)]
pub struct AccumulationCell([AtomicU32; 4]);

impl AccumulationCell {
    pub fn add(&self, value: Rgba) {
        for (channel, v) in self.0.iter().zip([value.r, value.g, value.b, value.a]) {
            if v == 0.0 {
                continue;
            }
            // The closure always returns Some, so the update can't fail
            let _ = channel.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f32::from_bits(bits) + v).to_bits())
            });
        }
    }

    fn clear(&mut self) {
        for channel in &mut self.0 {
            *channel.get_mut() = 0.0f32.to_bits();
        }
    }

    fn merge(&mut self, other: &AccumulationCell) {
        let other = other.load();
        for (channel, v) in self.0.iter_mut().zip([other.r, other.g, other.b, other.a]) {
            let bits = channel.get_mut();
            *bits = (f32::from_bits(*bits) + v).to_bits();
        }
    }

    pub fn load(&self) -> Rgba {
        let [r, g, b, a] = self.0.each_ref().map(|c| f32::from_bits(c.load(Ordering::Relaxed)));
        Rgba::new(r, g, b, a)
    }
}

/// Per-pixel running sums over all frames of a render.
#[derive(Debug)]
pub struct AccumulationBuffer {
    cells: Vec<AccumulationCell>,
}

impl AccumulationBuffer {
    /// Zeroed buffer.
    pub fn new(pixel_count: usize) -> AccumulationBuffer {
        AccumulationBuffer {
            cells: (0..pixel_count).map(|_| AccumulationCell::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn add(&self, pixel: usize, value: Rgba) {
        self.cells[pixel].add(value);
    }

    pub fn get(&self, pixel: usize) -> Rgba {
        self.cells[pixel].load()
    }

    pub fn to_vec(&self) -> Vec<Rgba> {
        self.cells.iter().map(AccumulationCell::load).collect()
    }

    /// Zeroes every cell.
    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(AccumulationCell::clear);
    }

    /// Adds the sums of `other` into this buffer, pixel by pixel.
    pub fn merge(&mut self, other: &AccumulationBuffer) {
        debug_assert_eq!(self.len(), other.len());
        for (cell, other) in self.cells.iter_mut().zip(&other.cells) {
            cell.merge(other);
        }
    }
}
