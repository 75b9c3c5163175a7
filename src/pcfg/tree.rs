use core::fmt;
use core::str::FromStr;

use crate::errors::{Result, RuseqError};
use crate::pcfg::Symbol;

/// Phrase-structure tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tree {
    /// Inner node.
    Node {
        /// Non-terminal label.
        label: String,

        /// Children in surface order.
        children: Vec<Tree>,
    },

    /// Preterminal with its word.
    Leaf {
        /// Preterminal label.
        label: String,

        /// Word.
        word: String,
    },
}

impl Tree {
    /// Creates an inner node.
    pub fn node<S>(label: S, children: Vec<Tree>) -> Self
    where
        S: Into<String>,
    {
        Self::Node {
            label: label.into(),
            children,
        }
    }

    /// Creates a preterminal.
    pub fn leaf<S, T>(label: S, word: T) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        Self::Leaf {
            label: label.into(),
            word: word.into(),
        }
    }

    /// Returns the label of the root.
    pub fn label(&self) -> &str {
        match self {
            Self::Node { label, .. } | Self::Leaf { label, .. } => label,
        }
    }

    /// Returns the words in surface order.
    pub fn leaves(&self) -> Vec<&str> {
        let mut words = vec![];
        self.collect_leaves(&mut words);
        words
    }

    fn collect_leaves<'a>(&'a self, words: &mut Vec<&'a str>) {
        match self {
            Self::Node { children, .. } => {
                for child in children {
                    child.collect_leaves(words);
                }
            }
            Self::Leaf { word, .. } => words.push(word),
        }
    }

    /// Checks that every inner node has at least one child.
    ///
    /// # Errors
    ///
    /// [`RuseqError::MalformedTree`] is returned for the first childless node.
    pub fn check(&self) -> Result<()> {
        match self {
            Self::Node { label, children } => {
                if children.is_empty() {
                    return Err(RuseqError::malformed_tree(format!(
                        "node {label} has no children"
                    )));
                }
                children.iter().try_for_each(Self::check)
            }
            Self::Leaf { .. } => Ok(()),
        }
    }

    /// Calls `f` with every production of the tree.
    pub(crate) fn for_each_production<F>(&self, f: &mut F)
    where
        F: FnMut(&str, Vec<Symbol>),
    {
        match self {
            Self::Node { label, children } => {
                f(
                    label.as_str(),
                    children
                        .iter()
                        .map(|child| Symbol::non_terminal(child.label()))
                        .collect(),
                );
                for child in children {
                    child.for_each_production(f);
                }
            }
            Self::Leaf { label, word } => {
                f(label.as_str(), vec![Symbol::terminal(word.as_str())]);
            }
        }
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Node { label, children } => {
                write!(f, "({label}")?;
                for child in children {
                    write!(f, " {child}")?;
                }
                write!(f, ")")
            }
            Self::Leaf { label, word } => write!(f, "({label} {word})"),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Open,
    Close,
    Atom(&'a str),
}

fn tokenize(s: &str) -> Vec<Token<'_>> {
    let mut tokens = vec![];
    let mut start = None;
    for (i, c) in s.char_indices() {
        if c == '(' || c == ')' || c.is_whitespace() {
            if let Some(st) = start.take() {
                tokens.push(Token::Atom(&s[st..i]));
            }
            match c {
                '(' => tokens.push(Token::Open),
                ')' => tokens.push(Token::Close),
                _ => {}
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(st) = start {
        tokens.push(Token::Atom(&s[st..]));
    }
    tokens
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Option<&Token<'a>> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn expect_close(&mut self, label: &str) -> Result<()> {
        match self.next() {
            Some(Token::Close) => Ok(()),
            _ => Err(RuseqError::malformed_tree(format!(
                "expected ')' to close {label}"
            ))),
        }
    }

    // Called after '('.
    fn parse_tree(&mut self) -> Result<Tree> {
        let label = match self.next() {
            Some(Token::Atom(label)) => (*label).to_string(),
            _ => return Err(RuseqError::malformed_tree("expected a label after '('")),
        };
        match self.peek() {
            Some(Token::Atom(word)) => {
                let word = (*word).to_string();
                self.pos += 1;
                self.expect_close(&label)?;
                Ok(Tree::Leaf { label, word })
            }
            Some(Token::Open) => {
                let mut children = vec![];
                while let Some(Token::Open) = self.peek() {
                    self.pos += 1;
                    children.push(self.parse_tree()?);
                }
                self.expect_close(&label)?;
                Ok(Tree::Node { label, children })
            }
            Some(Token::Close) => Err(RuseqError::malformed_tree(format!(
                "node {label} has no children"
            ))),
            None => Err(RuseqError::malformed_tree("unexpected end of input")),
        }
    }
}

impl FromStr for Tree {
    type Err = RuseqError;

    /// Parses a bracketed tree such as `(S (NP (Det the) (Noun cat)) (VP (Verb sat)))`.
    fn from_str(s: &str) -> Result<Self> {
        let mut parser = Parser {
            tokens: tokenize(s),
            pos: 0,
        };
        if parser.next() != Some(&Token::Open) {
            return Err(RuseqError::malformed_tree("a tree must start with '('"));
        }
        let tree = parser.parse_tree()?;
        if parser.peek().is_some() {
            return Err(RuseqError::malformed_tree("trailing input after the tree"));
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_print() {
        let s = "(S (NP (Det the) (Noun cat)) (VP (Verb sat)))";
        let tree: Tree = s.parse().unwrap();
        assert_eq!("S", tree.label());
        assert_eq!(vec!["the", "cat", "sat"], tree.leaves());
        assert_eq!(s, tree.to_string());

        let expected = Tree::node(
            "S",
            vec![
                Tree::node(
                    "NP",
                    vec![Tree::leaf("Det", "the"), Tree::leaf("Noun", "cat")],
                ),
                Tree::node("VP", vec![Tree::leaf("Verb", "sat")]),
            ],
        );
        assert_eq!(expected, tree);
    }

    #[test]
    fn test_parse_whitespace() {
        let tree: Tree = "\n(S\n  (NP (N dogs))\n  (VP (V bark)))  ".parse().unwrap();
        assert_eq!("(S (NP (N dogs)) (VP (V bark)))", tree.to_string());
    }

    #[test]
    fn test_malformed() {
        for s in [
            "",
            "S",
            "(S",
            "(S)",
            "((NP (N a)))",
            "(S (NP (N a))",
            "(S (NP (N a))) (X)",
            "(N a b)",
        ] {
            assert!(
                matches!(s.parse::<Tree>(), Err(RuseqError::MalformedTree(_))),
                "{s:?} was accepted"
            );
        }
    }

    #[test]
    fn test_check() {
        let tree = Tree::node("S", vec![Tree::node("NP", vec![])]);
        assert!(matches!(tree.check(), Err(RuseqError::MalformedTree(_))));
        assert!(Tree::leaf("N", "a").check().is_ok());
    }

    #[test]
    fn test_productions() {
        let tree: Tree = "(S (NP (Det the) (Noun cat)) (VP (Verb sat)))".parse().unwrap();
        let mut productions = vec![];
        tree.for_each_production(&mut |lhs, rhs| productions.push((lhs.to_string(), rhs)));
        assert_eq!(6, productions.len());
        assert_eq!(
            (
                "S".to_string(),
                vec![Symbol::non_terminal("NP"), Symbol::non_terminal("VP")]
            ),
            productions[0]
        );
        assert_eq!(
            ("Verb".to_string(), vec![Symbol::terminal("sat")]),
            productions[5]
        );
    }
}
