//! Regex rule dispatch over walk stacks.
//!
//! Both tree walkers in the compiler (expression type-checking over AST
//! nodes, map/reduce task planning over operators) dispatch on the path of
//! node names leading to the current node. A rule is a regex over that
//! path string; the dispatcher fires the rule with the cheapest match,
//! falling back to a default processor.

use regex::Regex;

/// One dispatch rule: a display name and a pattern over the stack string.
#[derive(Debug)]
pub struct Rule {
    name: &'static str,
    pattern: Regex,
}

impl Rule {
    /// Compile a rule. Patterns are written against the stack string
    /// produced by [`stack_string`], e.g. `TS%.*RS%$`.
    pub fn new(name: &'static str, pattern: &str) -> Self {
        Rule {
            name,
            pattern: Regex::new(pattern).expect("rule pattern"),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cost of this rule against the stack: the length of the shortest
    /// match ending at the top of the stack, `None` when it does not
    /// apply.
    fn cost(&self, stack: &str) -> Option<usize> {
        self.pattern
            .find_iter(stack)
            .filter(|m| m.end() == stack.len())
            .map(|m| m.len())
            .min()
    }
}

/// Render a walk stack of node names as the string rules match against:
/// each name is terminated by `%`.
pub fn stack_string<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for n in names {
        out.push_str(n);
        out.push('%');
    }
    out
}

/// Index of the matching rule with minimal cost, `None` when no rule
/// applies. Ties go to the earliest registered rule.
pub fn dispatch(rules: &[Rule], stack: &str) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (i, rule) in rules.iter().enumerate() {
        if let Some(cost) = rule.cost(stack) {
            if best.map(|(c, _)| cost < c).unwrap_or(true) {
                best = Some((cost, i));
            }
        }
    }
    best.map(|(_, i)| i)
}

#[cfg(test)]
mod tests {
    use super::{dispatch, stack_string, Rule};

    #[test]
    fn closest_match_wins() {
        let rules = vec![
            Rule::new("R1", "TS%$"),
            Rule::new("R2", "TS%.*RS%$"),
            Rule::new("R3", "RS%.*RS%$"),
        ];
        assert_eq!(dispatch(&rules, &stack_string(["TS"])), Some(0));
        assert_eq!(dispatch(&rules, &stack_string(["TS", "SEL", "RS"])), Some(1));
        assert_eq!(
            dispatch(&rules, &stack_string(["TS", "RS", "GBY", "RS"])),
            Some(2)
        );
        assert_eq!(dispatch(&rules, &stack_string(["TS", "SEL"])), None);
    }

    #[test]
    fn rs_to_rs_is_cheaper_than_ts_to_rs() {
        // Both R2 and R3 match this stack; R3's match is shorter.
        let rules = vec![Rule::new("R2", "TS%.*RS%$"), Rule::new("R3", "RS%.*RS%$")];
        let stack = stack_string(["TS", "RS", "GBY", "RS"]);
        let hit = dispatch(&rules, &stack).expect("rule");
        assert_eq!(rules[hit].name(), "R3");
    }
}
