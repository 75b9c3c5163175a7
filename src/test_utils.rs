use crate::model::TaggedSequence;
use crate::pcfg::ParseExample;

macro_rules! hashmap {
    ( $($k:expr => $v:expr,)* ) => {
        {
            #[allow(unused_mut)]
            let mut h = HashMap::new();
            $(
                h.insert($k, $v);
            )*
            h
        }
    };
    ( $($k:expr => $v:expr),* ) => {
        hashmap![$( $k => $v, )*]
    };
}

macro_rules! logsumexp {
    ( $($x:expr,)* ) => {
        {
            let mut y = f64::NEG_INFINITY;
            $(
                y = $crate::math::logsumexp(y, $x);
            )*
            y
        }
    };
    ( $($x:expr),* ) => {
        logsumexp!($( $x, )*)
    };
}

pub fn det_noun_verb_examples() -> Vec<TaggedSequence> {
    vec![
        TaggedSequence::new(["The", "cat", "sat"], ["det", "noun", "verb"]),
        TaggedSequence::new(["A", "dog", "ran"], ["det", "noun", "verb"]),
    ]
}

pub fn held_out_sentences() -> Vec<Vec<&'static str>> {
    vec![
        vec!["The", "dog", "runs"],
        vec!["A", "cat", "ran"],
        vec!["dog", "The", "sat", "A"],
        vec!["Yesterday"],
        vec!["The", "cat", "sat", "A", "dog", "ran"],
    ]
}

pub fn entity_examples() -> Vec<TaggedSequence> {
    vec![
        TaggedSequence::new(
            ["yesterday", "John", "Smith", "visited", "Acme", "Corp", "today"],
            ["O", "person", "person", "O", "org", "org", "O"],
        ),
        TaggedSequence::new(
            ["Mary", "Jones", "joined", "Globex", "Inc", "last", "year"],
            ["person", "person", "O", "org", "org", "O", "O"],
        ),
    ]
}

pub fn treebank() -> Vec<ParseExample> {
    [
        "(S (NP (Det the) (Noun cat)) (VP (Verb sat)))",
        "(S (NP (Det a) (Noun dog)) (VP (Verb chased) (NP (Det the) (Noun cat))))",
        "(S (NP (Det the) (Adj big) (Noun dog)) (VP (Verb ran)))",
    ]
    .into_iter()
    .map(|s| ParseExample::from_tree(s.parse().unwrap()))
    .collect()
}

pub(crate) use hashmap;
pub(crate) use logsumexp;
