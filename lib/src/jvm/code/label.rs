use std::fmt;

/// Label of a basic block
///
/// Labels are handed out sequentially as blocks are discovered and render as spreadsheet-style
/// column names: `A`, `B`, ..., `Z`, `AA`, `AB`, ...
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BlockLabel(usize);

impl BlockLabel {
    /// Label for the first block in the method
    pub const START: BlockLabel = BlockLabel(0);

    /// Get the next fresh label
    pub fn next(&self) -> BlockLabel {
        BlockLabel(self.0 + 1)
    }
}

/// Generates new labels
pub trait LabelGenerator<Label> {
    /// Generate a fresh label
    fn fresh_label(&mut self) -> Label;
}

/// Label generator for [`BlockLabel`]
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone)]
pub struct BlockLabelGenerator(BlockLabel);

impl BlockLabelGenerator {
    pub fn new(start: BlockLabel) -> BlockLabelGenerator {
        BlockLabelGenerator(start)
    }
}

impl Default for BlockLabelGenerator {
    fn default() -> Self {
        BlockLabelGenerator::new(BlockLabel::START)
    }
}

impl LabelGenerator<BlockLabel> for BlockLabelGenerator {
    fn fresh_label(&mut self) -> BlockLabel {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl fmt::Display for BlockLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bijective base 26
        let mut letters = vec![];
        let mut n = self.0 + 1;
        while n > 0 {
            n -= 1;
            letters.push(b'A' + (n % 26) as u8);
            n /= 26;
        }
        letters.reverse();
        f.pad(&String::from_utf8_lossy(&letters))
    }
}

impl fmt::Debug for BlockLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn labels_roll_over_like_columns() {
        let mut generator = BlockLabelGenerator::default();
        let labels: Vec<String> = (0..30)
            .map(|_| generator.fresh_label().to_string())
            .collect();
        assert_eq!(labels[0], "A");
        assert_eq!(labels[25], "Z");
        assert_eq!(labels[26], "AA");
        assert_eq!(labels[29], "AD");
        assert_eq!(BlockLabel(26 + 26 * 26).to_string(), "AAA");
        assert_eq!(BlockLabel(701).to_string(), "ZZ");
    }
}
