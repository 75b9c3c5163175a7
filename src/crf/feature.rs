use bincode::{Decode, Encode};

/// Extracts sparse binary features from each token position.
///
/// Features are named strings, so they can be stored with the model and looked up at inference
/// time. The template only inspects character classes, so it does not depend on the language.
#[derive(Clone, Debug, Decode, Encode, PartialEq, Eq)]
pub struct FeatureTemplate {
    window: usize,
    affix_len: usize,
    lowercase: bool,
    shape: bool,
}

impl FeatureTemplate {
    /// Creates a template with a window of 1, affixes up to 3 characters, lowercased words, and
    /// word shapes.
    pub const fn new() -> Self {
        Self {
            window: 1,
            affix_len: 3,
            lowercase: true,
            shape: true,
        }
    }

    /// Sets the number of neighbouring tokens on each side whose identity is used.
    pub const fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Sets the maximum length of prefix and suffix features.
    pub const fn affix_len(mut self, affix_len: usize) -> Self {
        self.affix_len = affix_len;
        self
    }

    /// Enables lowercased word features.
    pub const fn lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    /// Enables word shape features such as `Xxxx` and `dd-dd`.
    pub const fn shape(mut self, shape: bool) -> Self {
        self.shape = shape;
        self
    }

    /// Extracts the features of each position.
    pub fn extract<S>(&self, tokens: &[S]) -> Vec<Vec<String>>
    where
        S: AsRef<str>,
    {
        let words: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
        let normalized: Vec<String> = words.iter().map(|w| self.normalize(w)).collect();
        let shapes: Vec<String> = words.iter().map(|w| word_shape(w)).collect();

        let mut result = Vec::with_capacity(words.len());
        for (i, &word) in words.iter().enumerate() {
            let mut features = vec!["bias".to_string(), format!("w={word}")];
            if self.lowercase {
                features.push(format!("lw={}", normalized[i]));
            }
            if self.shape {
                features.push(format!("shape={}", shapes[i]));
                features.push(format!("shortshape={}", short_shape(&shapes[i])));
            }

            let mut chars = word.chars();
            if chars.next().is_some_and(char::is_uppercase) {
                features.push("is_title".to_string());
            }
            if word.chars().any(char::is_alphabetic) && !word.chars().any(char::is_lowercase) {
                features.push("all_caps".to_string());
            }
            if word.chars().any(|c| c.is_ascii_digit()) {
                features.push("has_digit".to_string());
            }
            if !word.is_empty() && word.chars().all(|c| c.is_ascii_punctuation()) {
                features.push("is_punct".to_string());
            }

            let chars: Vec<char> = word.chars().collect();
            for k in 1..=self.affix_len.min(chars.len()) {
                let prefix: String = chars[..k].iter().collect();
                let suffix: String = chars[chars.len() - k..].iter().collect();
                features.push(format!("p{k}={prefix}"));
                features.push(format!("s{k}={suffix}"));
            }

            for d in 1..=self.window {
                if let Some(j) = i.checked_sub(d) {
                    features.push(format!("w[-{d}]={}", normalized[j]));
                    if self.shape {
                        features.push(format!("shape[-{d}]={}", short_shape(&shapes[j])));
                    }
                } else if i + 1 == d {
                    features.push(format!("w[-{d}]=<s>"));
                }
                if let Some(next) = normalized.get(i + d) {
                    features.push(format!("w[+{d}]={next}"));
                    if self.shape {
                        features.push(format!("shape[+{d}]={}", short_shape(&shapes[i + d])));
                    }
                } else if i + d == words.len() {
                    features.push(format!("w[+{d}]=</s>"));
                }
            }
            result.push(features);
        }
        result
    }

    fn normalize(&self, word: &str) -> String {
        if self.lowercase {
            word.to_lowercase()
        } else {
            word.to_string()
        }
    }
}

impl Default for FeatureTemplate {
    fn default() -> Self {
        Self::new()
    }
}

fn word_shape(word: &str) -> String {
    word.chars()
        .map(|c| {
            if c.is_uppercase() {
                'X'
            } else if c.is_lowercase() {
                'x'
            } else if c.is_ascii_digit() {
                'd'
            } else {
                c
            }
        })
        .collect()
}

// Collapses runs of the same shape character.
fn short_shape(shape: &str) -> String {
    let mut result = String::new();
    let mut prev = None;
    for c in shape.chars() {
        if prev != Some(c) {
            result.push(c);
            prev = Some(c);
        }
    }
    result
}
