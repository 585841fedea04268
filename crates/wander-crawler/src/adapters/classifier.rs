use std::ops::RangeInclusive;

use crate::collab::Classifier;

/// Matches titles written mostly in one Unicode block.
#[derive(Debug, Clone)]
pub struct ScriptClassifier {
    ranges: Vec<RangeInclusive<char>>,
}

impl ScriptClassifier {
    pub fn new(ranges: Vec<RangeInclusive<char>>) -> Self {
        Self { ranges }
    }

    pub fn cyrillic() -> Self {
        Self::new(vec!['\u{0400}'..='\u{04FF}', '\u{0500}'..='\u{052F}'])
    }

    pub fn latin() -> Self {
        Self::new(vec!['A'..='Z', 'a'..='z', '\u{00C0}'..='\u{024F}'])
    }
}

impl Classifier for ScriptClassifier {
    /// Strictly more than half of the alphabetic characters must be in range.
    fn is_match(&self, title: &str) -> bool {
        let (inside, letters) = title
            .chars()
            .filter(|c| c.is_alphabetic())
            .fold((0usize, 0usize), |(inside, letters), c| {
                let hit = self.ranges.iter().any(|r| r.contains(&c));
                (inside + usize::from(hit), letters + 1)
            });
        letters > 0 && inside * 2 > letters
    }
}
