//! Conversion of grammars into Chomsky normal form.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::{HashMap, HashSet};

use crate::pcfg::{Rule, Symbol};
use crate::symbols::SymbolTable;

/// Returns the readable name of the intermediate symbol that derives `rest` on behalf of `lhs`,
/// e.g. `NP|<Adj-Noun>`. The name may be ambiguous and is only used as a base.
fn intermediate_name(lhs: &str, rest: &[Symbol]) -> String {
    let names: Vec<&str> = rest.iter().map(Symbol::name).collect();
    format!("{lhs}|<{}>", names.join("-"))
}

/// Checks if every rule derives one terminal or two non-terminals.
pub fn is_cnf(rules: &[Rule]) -> bool {
    rules.iter().all(|rule| {
        matches!(
            rule.rhs.as_slice(),
            [Symbol::Terminal(_)] | [Symbol::NonTerminal(_), Symbol::NonTerminal(_)]
        )
    })
}

/// Rules with at most two children, and the symbols introduced to split longer rules.
#[derive(Debug)]
pub struct Binarized {
    pub rules: Vec<Rule>,
    pub intermediate: SymbolTable,
}

/// Splits rules with more than two children into chains of binary rules.
///
/// `A -> B C D` becomes `A -> B A|<C-D>` and `A|<C-D> -> C D`. The first rule keeps the
/// probability and the intermediate rules get 1.0. Intermediate symbols are shared between rules
/// of the same left-hand side that end with the same children. A symbol whose readable name is
/// already taken by a grammar label or another suffix gets a `#n` suffix, so distinct suffixes
/// never share a symbol.
pub fn binarize(rules: &[Rule]) -> Binarized {
    let mut taken: HashSet<String> = rules
        .iter()
        .flat_map(|rule| {
            core::iter::once(rule.lhs.as_str())
                .chain(rule.rhs.iter().filter_map(Symbol::as_non_terminal))
        })
        .map(String::from)
        .collect();
    let mut names: HashMap<(&str, &[Symbol]), String> = HashMap::new();

    let mut result = vec![];
    for rule in rules {
        let n = rule.rhs.len();
        if n <= 2 {
            result.push(rule.clone());
            continue;
        }
        let mut lhs = rule.lhs.clone();
        let mut probability = rule.probability;
        for i in 0..n - 1 {
            let rest = &rule.rhs[i + 1..];
            if rest.len() == 1 {
                result.push(Rule {
                    lhs,
                    rhs: rule.rhs[i..].to_vec(),
                    probability,
                });
                break;
            }
            let (name, is_new) = match names.get(&(rule.lhs.as_str(), rest)).cloned() {
                Some(name) => (name, false),
                None => {
                    let base = intermediate_name(&rule.lhs, rest);
                    let mut name = base.clone();
                    let mut k = 2;
                    while taken.contains(&name) {
                        name = format!("{base}#{k}");
                        k += 1;
                    }
                    taken.insert(name.clone());
                    names.insert((rule.lhs.as_str(), rest), name.clone());
                    (name, true)
                }
            };
            result.push(Rule {
                lhs,
                rhs: vec![rule.rhs[i].clone(), Symbol::NonTerminal(name.clone())],
                probability,
            });
            if !is_new {
                // the rest of the chain is shared
                break;
            }
            lhs = name;
            probability = 1.0;
        }
    }
    let intermediate = SymbolTable::new(names.into_values());
    Binarized {
        rules: result,
        intermediate,
    }
}

/// Replaces unit productions `A -> B` by the rules of `B`.
///
/// Each non-terminal `A` receives every non-unit rule `B -> x` with the probability summed over
/// all unary chains from `A` to `B` times `P(B -> x)`. Chains are followed up to the number of
/// non-terminals. The rules of each left-hand side are then renormalized. The result is sorted
/// by left-hand side and right-hand side.
pub fn eliminate_units(rules: &[Rule]) -> Vec<Rule> {
    let mut unary: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
    let mut others: BTreeMap<&str, Vec<&Rule>> = BTreeMap::new();
    for rule in rules {
        match rule.rhs.as_slice() {
            [Symbol::NonTerminal(child)] => unary
                .entry(rule.lhs.as_str())
                .or_default()
                .push((child.as_str(), rule.probability)),
            _ => others.entry(rule.lhs.as_str()).or_default().push(rule),
        }
    }
    let lhss: BTreeSet<&str> = unary.keys().chain(others.keys()).copied().collect();
    let max_len = lhss.len();

    let mut merged: BTreeMap<(String, Vec<Symbol>), f64> = BTreeMap::new();
    for &a in &lhss {
        let mut closure = BTreeMap::from([(a, 1.0)]);
        let mut frontier = closure.clone();
        for _ in 0..max_len {
            let mut next: BTreeMap<&str, f64> = BTreeMap::new();
            for (b, w) in frontier {
                for &(c, p) in unary.get(b).into_iter().flatten() {
                    *next.entry(c).or_default() += w * p;
                }
            }
            if next.is_empty() {
                break;
            }
            for (&c, &w) in &next {
                *closure.entry(c).or_default() += w;
            }
            frontier = next;
        }
        for (b, w) in closure {
            for rule in others.get(b).into_iter().flatten() {
                *merged
                    .entry((a.to_string(), rule.rhs.clone()))
                    .or_default() += w * rule.probability;
            }
        }
    }

    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for ((lhs, _), p) in &merged {
        *totals.entry(lhs.as_str()).or_default() += p;
    }
    let totals: BTreeMap<String, f64> = totals
        .into_iter()
        .map(|(lhs, total)| (lhs.to_string(), total))
        .collect();
    merged
        .into_iter()
        .map(|((lhs, rhs), p)| {
            let probability = p / totals[&lhs];
            Rule {
                lhs,
                rhs,
                probability,
            }
        })
        .collect()
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

    fn find<'a>(rules: &'a [Rule], lhs: &str, rhs: &[Symbol]) -> Option<&'a Rule> {
        rules.iter().find(|r| r.lhs == lhs && r.rhs == rhs)
    }

    #[test]
    fn test_binarize() {
        let rules = vec![
            Rule::new("NP", [nt("Det"), nt("Adj"), nt("Adj"), nt("Noun")], 0.4),
            Rule::new("NP", [nt("Det"), nt("Noun")], 0.6),
        ];
        let result = binarize(&rules).rules;
        assert_eq!(4, result.len());
        assert!(is_cnf(&result));
        let r = find(&result, "NP", &[nt("Det"), nt("NP|<Adj-Adj-Noun>")]).unwrap();
        assert_eq!(0.4, r.probability);
        let r = find(&result, "NP|<Adj-Adj-Noun>", &[nt("Adj"), nt("NP|<Adj-Noun>")]).unwrap();
        assert_eq!(1.0, r.probability);
        assert!(find(&result, "NP|<Adj-Noun>", &[nt("Adj"), nt("Noun")]).is_some());
    }

    #[test]
    fn test_binarize_shares_intermediate_symbols() {
        let rules = vec![
            Rule::new("NP", [nt("Det"), nt("Adj"), nt("Noun")], 0.5),
            Rule::new("NP", [nt("Num"), nt("Adj"), nt("Noun")], 0.5),
        ];
        let result = binarize(&rules).rules;
        assert_eq!(3, result.len());
        assert_eq!(
            1,
            result.iter().filter(|r| r.lhs == "NP|<Adj-Noun>").count()
        );
    }

    #[test]
    fn test_binarize_reports_intermediate_symbols() {
        let rules = vec![
            Rule::new("NP", [nt("Det"), nt("Adj"), nt("Adj"), nt("Noun")], 1.0),
            Rule::new("NP|<Adj-Noun>", [nt("Adj"), nt("Noun")], 1.0),
        ];
        let result = binarize(&rules);
        let intermediate: Vec<&str> = result.intermediate.iter().collect();
        assert_eq!(vec!["NP|<Adj-Adj-Noun>", "NP|<Adj-Noun>#2"], intermediate);
        assert!(find(&result.rules, "NP|<Adj-Noun>#2", &[nt("Adj"), nt("Noun")]).is_some());
    }

    #[test]
    fn test_binarize_hyphenated_labels() {
        let rules = vec![
            Rule::new("A", [nt("X"), nt("C-D"), nt("E")], 0.5),
            Rule::new("A", [nt("Y"), nt("C"), nt("D-E")], 0.5),
        ];
        let result = binarize(&rules);
        assert_eq!(4, result.rules.len());
        assert_eq!(2, result.intermediate.len());
        let first = find(&result.rules, "A", &[nt("X"), nt("A|<C-D-E>")]).unwrap();
        assert_eq!(0.5, first.probability);
        assert!(find(&result.rules, "A", &[nt("Y"), nt("A|<C-D-E>#2")]).is_some());
        assert!(find(&result.rules, "A|<C-D-E>", &[nt("C-D"), nt("E")]).is_some());
        assert!(find(&result.rules, "A|<C-D-E>#2", &[nt("C"), nt("D-E")]).is_some());
    }

    #[test]
    fn test_binarize_does_not_share_across_lhs() {
        let rules = vec![
            Rule::new("NP", [nt("Det"), nt("Adj"), nt("Noun")], 1.0),
            Rule::new("NX", [nt("Num"), nt("Adj"), nt("Noun")], 1.0),
        ];
        let result = binarize(&rules);
        assert_eq!(4, result.rules.len());
        assert!(result.intermediate.contains("NP|<Adj-Noun>"));
        assert!(result.intermediate.contains("NX|<Adj-Noun>"));
    }

    #[test]
    fn test_eliminate_units() {
        let rules = vec![
            Rule::new("S", [nt("NP"), nt("VP")], 1.0),
            Rule::new("VP", [nt("Verb")], 0.5),
            Rule::new("VP", [nt("Verb"), nt("NP")], 0.5),
            Rule::new("NP", [nt("Noun")], 1.0),
            Rule::new("Noun", [t("cats")], 1.0),
            Rule::new("Verb", [t("sleep")], 0.4),
            Rule::new("Verb", [t("chase")], 0.6),
        ];
        let result = eliminate_units(&rules);
        assert!(is_cnf(&result));

        let vp_sleep = find(&result, "VP", &[t("sleep")]).unwrap();
        assert!((vp_sleep.probability - 0.2).abs() < 1e-12);
        let vp_chase = find(&result, "VP", &[t("chase")]).unwrap();
        assert!((vp_chase.probability - 0.3).abs() < 1e-12);
        let np = find(&result, "NP", &[t("cats")]).unwrap();
        assert!((np.probability - 1.0).abs() < 1e-12);

        let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
        for rule in &result {
            *totals.entry(rule.lhs.as_str()).or_default() += rule.probability;
        }
        for (lhs, total) in totals {
            assert!((total - 1.0).abs() < 1e-12, "{lhs}: {total}");
        }
    }

    #[test]
    fn test_eliminate_unit_cycles() {
        let rules = vec![
            Rule::new("A", [nt("B")], 0.5),
            Rule::new("A", [t("a")], 0.5),
            Rule::new("B", [nt("A")], 0.5),
            Rule::new("B", [t("b")], 0.5),
        ];
        let result = eliminate_units(&rules);
        assert!(is_cnf(&result));
        assert_eq!(4, result.len());
        let a_a = find(&result, "A", &[t("a")]).unwrap().probability;
        let a_b = find(&result, "A", &[t("b")]).unwrap().probability;
        assert!((a_a + a_b - 1.0).abs() < 1e-12);
        assert!(a_a > a_b);
    }
}
