// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Position of a field inside the current word window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Number of bytes the window must be advanced by before the
    /// field is read, if the field does not fit in the current window.
    pub reload: Option<usize>,
    /// Offset in bits of the field from the most significant bit of
    /// the window.
    pub bit_offset: usize,
}

/// A data structure that packs consecutive byte aligned fields into
/// windows of at most `max_window_width` bits.
///
/// Fields are never split across windows: a field which does not fit
/// starts a new window at its first byte.
#[derive(Debug)]
pub struct WordAligner {
    max_window_width: usize,
    width: usize,
}

impl WordAligner {
    pub fn new(max_window_width: usize) -> Self {
        Self { max_window_width, width: 0 }
    }

    /// Bits consumed in the current window.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Place a field of `width` bits.
    pub fn add_field(&mut self, width: usize) -> Placement {
        debug_assert!(width % 8 == 0 && width <= self.max_window_width);
        let reload = if self.width + width > self.max_window_width {
            let advance = self.width / 8;
            self.width = 0;
            Some(advance)
        } else {
            None
        };
        let bit_offset = self.width;
        self.width += width;
        Placement { reload, bit_offset }
    }

    /// Close the current window. Returns the number of bytes consumed
    /// by the window, if any.
    pub fn flush(&mut self) -> Option<usize> {
        let consumed = self.width / 8;
        self.width = 0;
        (consumed > 0).then_some(consumed)
    }

    /// Start a new window at the current position.
    pub fn reset(&mut self) {
        self.width = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_fit_window() {
        let mut aligner = WordAligner::new(256);
        assert_eq!(aligner.add_field(8), Placement { reload: None, bit_offset: 0 });
        assert_eq!(aligner.add_field(16), Placement { reload: None, bit_offset: 8 });
        assert_eq!(aligner.width(), 24);
    }

    #[test]
    fn test_reload_on_overflow() {
        let mut aligner = WordAligner::new(256);
        for _ in 0..31 {
            aligner.add_field(8);
        }
        assert_eq!(aligner.add_field(16), Placement { reload: Some(31), bit_offset: 0 });
        assert_eq!(aligner.add_field(8), Placement { reload: None, bit_offset: 16 });
    }

    #[test]
    fn test_full_word() {
        let mut aligner = WordAligner::new(256);
        assert_eq!(aligner.add_field(256), Placement { reload: None, bit_offset: 0 });
        assert_eq!(aligner.add_field(8), Placement { reload: Some(32), bit_offset: 0 });
    }

    #[test]
    fn test_flush() {
        let mut aligner = WordAligner::new(256);
        assert_eq!(aligner.flush(), None);
        aligner.add_field(24);
        assert_eq!(aligner.flush(), Some(3));
        assert_eq!(aligner.width(), 0);
    }
}
