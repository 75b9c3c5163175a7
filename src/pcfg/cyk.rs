//! Viterbi CYK over a compiled binary grammar.

use bincode::{Decode, Encode};

use crate::errors::{Result, RuseqError};
use crate::pcfg::{cnf, Rule, Symbol, Tree};
use crate::symbols::SymbolTable;

/// Rule indices used by the chart parser.
///
/// Rules with more than two children are binarized when the grammar is compiled.
#[derive(Clone, Debug, Default, Decode, Encode)]
pub struct Grammar {
    pub non_terminals: SymbolTable,

    // flags of symbols introduced by binarization, indexed by non-terminal
    pub intermediate: Vec<bool>,

    pub words: SymbolTable,

    // (preterminal, log p) per word
    pub lexicon: Vec<Vec<(u32, f64)>>,

    // (lhs, child, log p)
    pub unary: Vec<(u32, u32, f64)>,

    // (left, right, lhs, log p), sorted
    pub binary: Vec<(u32, u32, u32, f64)>,
}

impl Grammar {
    /// Compiles the rules. `intermediate` lists symbols of `rules` that were introduced by an
    /// earlier binarization and are spliced out of output trees.
    pub fn new(rules: &[Rule], intermediate: &SymbolTable) -> Self {
        let cnf::Binarized {
            rules,
            intermediate: introduced,
        } = cnf::binarize(rules);
        let non_terminals = SymbolTable::new(rules.iter().flat_map(|rule| {
            core::iter::once(rule.lhs.as_str())
                .chain(rule.rhs.iter().filter_map(Symbol::as_non_terminal))
        }));
        let words = SymbolTable::new(
            rules
                .iter()
                .flat_map(|rule| rule.rhs.iter().filter_map(Symbol::as_terminal)),
        );
        let intermediate = non_terminals
            .iter()
            .map(|nt| intermediate.contains(nt) || introduced.contains(nt))
            .collect();

        let mut lexicon = vec![vec![]; words.len()];
        let mut unary = vec![];
        let mut binary = vec![];
        for rule in &rules {
            // Both tables contain every symbol of the rules.
            let Some(lhs) = non_terminals.get(&rule.lhs) else {
                continue;
            };
            let lp = rule.probability.ln();
            match rule.rhs.as_slice() {
                [Symbol::Terminal(word)] => {
                    if let Some(word) = words.get(word) {
                        lexicon[word as usize].push((lhs, lp));
                    }
                }
                [Symbol::NonTerminal(child)] => {
                    if let Some(child) = non_terminals.get(child) {
                        unary.push((lhs, child, lp));
                    }
                }
                [Symbol::NonTerminal(left), Symbol::NonTerminal(right)] => {
                    if let (Some(left), Some(right)) =
                        (non_terminals.get(left), non_terminals.get(right))
                    {
                        binary.push((left, right, lhs, lp));
                    }
                }
                _ => {}
            }
        }
        for entries in &mut lexicon {
            entries.sort_unstable_by_key(|&(lhs, _)| lhs);
        }
        unary.sort_unstable_by_key(|&(lhs, child, _)| (lhs, child));
        binary.sort_unstable_by_key(|&(left, right, lhs, _)| (left, right, lhs));

        Self {
            non_terminals,
            intermediate,
            words,
            lexicon,
            unary,
            binary,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.non_terminals.len() as u32;
        let valid_lp = |lp: f64| lp <= 0.0 && !lp.is_nan();
        if self.intermediate.len() != self.non_terminals.len()
            || self.lexicon.len() != self.words.len()
            || self
                .lexicon
                .iter()
                .flatten()
                .any(|&(lhs, lp)| lhs >= n || !valid_lp(lp))
            || self
                .unary
                .iter()
                .any(|&(lhs, child, lp)| lhs >= n || child >= n || !valid_lp(lp))
            || self.binary.iter().any(|&(left, right, lhs, lp)| {
                left >= n || right >= n || lhs >= n || !valid_lp(lp)
            })
        {
            return Err(RuseqError::serialization("inconsistent grammar tables"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Back {
    None,
    Lexical,
    Unary(u32),
    Binary { split: u32, left: u32, right: u32 },
}

/// Chart of the best derivation of each (span, non-terminal).
struct Chart<'a> {
    grammar: &'a Grammar,
    n: usize,
    scores: Vec<f64>,
    backs: Vec<Back>,
}

impl<'a> Chart<'a> {
    fn new(grammar: &'a Grammar, n: usize) -> Self {
        let size = n * n * grammar.non_terminals.len();
        Self {
            grammar,
            n,
            scores: vec![f64::NEG_INFINITY; size],
            backs: vec![Back::None; size],
        }
    }

    // Cells of span (i, j) are stored at (i, j - 1), so only the upper triangle is used.
    #[inline(always)]
    fn offset(&self, i: usize, j: usize) -> usize {
        (i * self.n + j - 1) * self.grammar.non_terminals.len()
    }

    fn fill<S>(&mut self, tokens: &[S])
    where
        S: AsRef<str>,
    {
        let grammar = self.grammar;
        for (i, token) in tokens.iter().enumerate() {
            let offset = self.offset(i, i + 1);
            if let Some(word) = grammar.words.get(token.as_ref()) {
                for &(lhs, lp) in &grammar.lexicon[word as usize] {
                    let idx = offset + lhs as usize;
                    if lp > self.scores[idx] {
                        self.scores[idx] = lp;
                        self.backs[idx] = Back::Lexical;
                    }
                }
            }
            self.close_unary(offset);
        }

        for len in 2..=self.n {
            for i in 0..=self.n - len {
                let j = i + len;
                let offset = self.offset(i, j);
                for k in i + 1..j {
                    let left_offset = self.offset(i, k);
                    let right_offset = self.offset(k, j);
                    for &(left, right, lhs, lp) in &grammar.binary {
                        let left_score = self.scores[left_offset + left as usize];
                        if left_score == f64::NEG_INFINITY {
                            continue;
                        }
                        let right_score = self.scores[right_offset + right as usize];
                        if right_score == f64::NEG_INFINITY {
                            continue;
                        }
                        let score = lp + left_score + right_score;
                        let idx = offset + lhs as usize;
                        if score > self.scores[idx] {
                            self.scores[idx] = score;
                            self.backs[idx] = Back::Binary {
                                split: k as u32,
                                left,
                                right,
                            };
                        }
                    }
                }
                self.close_unary(offset);
            }
        }
    }

    // Applies unary rules until no score improves. Log-probabilities are not positive, so a
    // cycle never improves a score.
    fn close_unary(&mut self, offset: usize) {
        let grammar = self.grammar;
        if grammar.unary.is_empty() {
            return;
        }
        for _ in 0..grammar.non_terminals.len() {
            let mut changed = false;
            for &(lhs, child, lp) in &grammar.unary {
                let child_score = self.scores[offset + child as usize];
                if child_score == f64::NEG_INFINITY {
                    continue;
                }
                let score = lp + child_score;
                let idx = offset + lhs as usize;
                if score > self.scores[idx] {
                    self.scores[idx] = score;
                    self.backs[idx] = Back::Unary(child);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn build<S>(&self, tokens: &[S], i: usize, j: usize, nt: u32) -> Tree
    where
        S: AsRef<str>,
    {
        let label = self.grammar.non_terminals.name(nt).to_string();
        match self.backs[self.offset(i, j) + nt as usize] {
            Back::Unary(child) => Tree::Node {
                label,
                children: vec![self.build(tokens, i, j, child)],
            },
            Back::Binary { split, left, right } => {
                let split = split as usize;
                let mut children = vec![];
                for (child, (i, j)) in [(left, (i, split)), (right, (split, j))] {
                    match self.build(tokens, i, j, child) {
                        Tree::Node {
                            children: grandchildren,
                            ..
                        } if self.grammar.intermediate[child as usize] => {
                            children.extend(grandchildren);
                        }
                        tree => children.push(tree),
                    }
                }
                Tree::Node { label, children }
            }
            Back::Lexical | Back::None => Tree::Leaf {
                label,
                word: tokens[i].as_ref().to_string(),
            },
        }
    }
}

/// Returns the best tree rooted at `start` and its log-probability.
///
/// # Errors
///
/// [`RuseqError::NoParse`] if `tokens` is empty or `start` cannot derive it.
pub fn parse<S>(grammar: &Grammar, tokens: &[S], start: u32) -> Result<(Tree, f64)>
where
    S: AsRef<str>,
{
    let n = tokens.len();
    if n == 0 {
        return Err(RuseqError::no_parse(0));
    }
    let mut chart = Chart::new(grammar, n);
    chart.fill(tokens);
    let score = chart.scores[chart.offset(0, n) + start as usize];
    if score == f64::NEG_INFINITY {
        return Err(RuseqError::no_parse(n));
    }
    Ok((chart.build(tokens, 0, n, start), score))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nt(s: &str) -> Symbol {
        Symbol::non_terminal(s)
    }

    fn t(s: &str) -> Symbol {
        Symbol::terminal(s)
    }

    fn ambiguous_grammar() -> Vec<Rule> {
        // "saw the man with the telescope" has two attachments.
        vec![
            Rule::new("S", [nt("NP"), nt("VP")], 1.0),
            Rule::new("VP", [nt("V"), nt("NP")], 0.7),
            Rule::new("VP", [nt("VP"), nt("PP")], 0.3),
            Rule::new("NP", [nt("NP"), nt("PP")], 0.2),
            Rule::new("NP", [nt("Det"), nt("N")], 0.6),
            Rule::new("NP", [t("I")], 0.2),
            Rule::new("PP", [nt("P"), nt("NP")], 1.0),
            Rule::new("V", [t("saw")], 1.0),
            Rule::new("Det", [t("the")], 1.0),
            Rule::new("N", [t("man")], 0.5),
            Rule::new("N", [t("telescope")], 0.5),
            Rule::new("P", [t("with")], 1.0),
        ]
    }

    #[test]
    fn test_best_attachment() {
        let grammar = Grammar::new(&ambiguous_grammar(), &SymbolTable::default());
        let start = grammar.non_terminals.get("S").unwrap();
        let tokens = ["I", "saw", "the", "man", "with", "the", "telescope"];
        let (tree, lp) = parse(&grammar, &tokens, start).unwrap();
        assert_eq!(tokens.to_vec(), tree.leaves());

        // VP attachment: 1.0 * 0.2 * 0.3 * 0.7 * (0.6 * 0.5)^2 * 1.0
        // NP attachment: 1.0 * 0.2 * 0.7 * 0.2 * (0.6 * 0.5)^2 * 1.0
        let vp_attachment = (0.2f64 * 0.3 * 0.7 * 0.09).ln();
        assert!((vp_attachment - lp).abs() < 1e-12);
        assert_eq!(
            "(S (NP I) (VP (VP (V saw) (NP (Det the) (N man))) (PP (P with) (NP (Det the) (N telescope)))))",
            tree.to_string()
        );
    }

    #[test]
    fn test_unary_chain() {
        let rules = vec![
            Rule::new("S", [nt("NP"), nt("VP")], 1.0),
            Rule::new("VP", [nt("V")], 1.0),
            Rule::new("NP", [nt("N")], 1.0),
            Rule::new("N", [t("dogs")], 1.0),
            Rule::new("V", [t("bark")], 1.0),
        ];
        let grammar = Grammar::new(&rules, &SymbolTable::default());
        let start = grammar.non_terminals.get("S").unwrap();
        let (tree, lp) = parse(&grammar, &["dogs", "bark"], start).unwrap();
        assert_eq!("(S (NP (N dogs)) (VP (V bark)))", tree.to_string());
        assert_eq!(0.0, lp);
    }

    #[test]
    fn test_intermediate_symbols_are_spliced() {
        let rules = vec![
            Rule::new("NP", [nt("Det"), nt("Adj"), nt("N")], 1.0),
            Rule::new("Det", [t("the")], 1.0),
            Rule::new("Adj", [t("big")], 1.0),
            Rule::new("N", [t("dog")], 1.0),
        ];
        let grammar = Grammar::new(&rules, &SymbolTable::default());
        assert!(grammar.non_terminals.contains("NP|<Adj-N>"));
        let start = grammar.non_terminals.get("NP").unwrap();
        let (tree, _) = parse(&grammar, &["the", "big", "dog"], start).unwrap();
        assert_eq!("(NP (Det the) (Adj big) (N dog))", tree.to_string());
    }

    #[test]
    fn test_labels_resembling_intermediate_symbols_are_kept() {
        let rules = vec![
            Rule::new("NP", [nt("Det"), nt("NP|<Adj-N>")], 1.0),
            Rule::new("NP|<Adj-N>", [nt("Adj"), nt("N")], 1.0),
            Rule::new("Det", [t("the")], 1.0),
            Rule::new("Adj", [t("big")], 1.0),
            Rule::new("N", [t("dog")], 1.0),
        ];
        let grammar = Grammar::new(&rules, &SymbolTable::default());
        let start = grammar.non_terminals.get("NP").unwrap();
        let (tree, _) = parse(&grammar, &["the", "big", "dog"], start).unwrap();
        assert_eq!("(NP (Det the) (NP|<Adj-N> (Adj big) (N dog)))", tree.to_string());

        let grammar = Grammar::new(&rules, &SymbolTable::new(["NP|<Adj-N>"]));
        let (tree, _) = parse(&grammar, &["the", "big", "dog"], start).unwrap();
        assert_eq!("(NP (Det the) (Adj big) (N dog))", tree.to_string());
    }

    #[test]
    fn test_no_parse() {
        let grammar = Grammar::new(&ambiguous_grammar(), &SymbolTable::default());
        let start = grammar.non_terminals.get("S").unwrap();
        let tokens: [&str; 0] = [];
        assert!(matches!(
            parse(&grammar, &tokens, start),
            Err(RuseqError::NoParse(_))
        ));
        assert!(matches!(
            parse(&grammar, &["I", "saw"], start),
            Err(RuseqError::NoParse(_))
        ));
        assert!(matches!(
            parse(&grammar, &["I", "saw", "unicorns"], start),
            Err(RuseqError::NoParse(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut grammar = Grammar::new(&ambiguous_grammar(), &SymbolTable::default());
        assert!(grammar.validate().is_ok());
        grammar.binary[0].2 = 100;
        assert!(matches!(
            grammar.validate(),
            Err(RuseqError::Serialization(_))
        ));
    }
}
