use std::collections::BTreeSet;

use crate::wire::ResponseTone;

impl ResponseTone {
    /// Words a reply of this tone must carry for the validator's marker
    /// ratio check.
    pub fn markers(self) -> &'static [&'static str] {
        match self {
            Self::Professional => &["please", "would", "kindly"],
            Self::Friendly => &["thanks", "great", "appreciate"],
            Self::Formal => &["accordingly", "pursuant", "hereby"],
            Self::Casual => &["hey", "sure", "okay"],
        }
    }

    /// Wider phrase list the quality scorer grades tone against. Casual
    /// replies have no indicators and get a flat score.
    pub fn indicators(self) -> &'static [&'static str] {
        match self {
            Self::Professional => &["would", "please", "kindly", "regarding"],
            Self::Friendly => &["thanks", "appreciate", "great", "looking forward"],
            Self::Formal => &["hereby", "pursuant", "accordingly", "furthermore"],
            Self::Casual => &[],
        }
    }
}

/// Lowercased words with surrounding punctuation stripped.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Lowercased words of a text, kept both as a set and as a padded string so
/// multi-word phrases match on word boundaries only ("they" never matches
/// "hey").
#[derive(Clone, Debug)]
pub struct Normalized {
    words: BTreeSet<String>,
    padded: String,
}

impl Normalized {
    pub fn new(content: &str) -> Self {
        let tokens: Vec<String> = words(content).collect();
        let padded = format!(" {} ", tokens.join(" "));
        Self {
            words: tokens.into_iter().collect(),
            padded,
        }
    }

    pub fn has_word(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn contains(&self, phrase: &str) -> bool {
        if phrase.contains(' ') {
            self.padded.contains(&format!(" {phrase} "))
        } else {
            self.words.contains(phrase)
        }
    }

    pub fn count_of(&self, phrases: &[&str]) -> usize {
        phrases.iter().filter(|p| self.contains(p)).count()
    }

    /// The subset of `phrases` present in the text.
    pub fn matches<'a>(&self, phrases: &'a [&'a str]) -> Vec<&'a str> {
        phrases.iter().copied().filter(|p| self.contains(p)).collect()
    }
}
