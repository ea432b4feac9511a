use std::collections::HashMap;

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::value::Value;

/// Replacement side of one filter rule; `Absent` is the `~` spelling.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterTarget {
    Value(Value),
    Absent,
}

impl FilterTarget {
    fn to_option(&self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value.clone()),
            Self::Absent => None,
        }
    }
}

/// Ordered filter specification: literal or `/pattern/flags` keys mapped
/// to replacement values, templates, or absent.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    entries: Vec<(String, FilterTarget)>,
}

impl FilterSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule mapping `key` to a replacement value.
    #[must_use]
    pub fn entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .push((key.into(), FilterTarget::Value(value.into())));
        self
    }

    /// Adds a rule mapping `key` to absent.
    #[must_use]
    pub fn absent(mut self, key: impl Into<String>) -> Self {
        self.entries.push((key.into(), FilterTarget::Absent));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[(String, FilterTarget)] {
        &self.entries
    }
}

/// Hook applied to the input value before any rule.
pub type PreBlock = Box<dyn Fn(Value) -> Option<Value> + Send + Sync>;

#[derive(Debug)]
enum RuleTarget {
    /// String replacement spliced over the matched portion; may carry
    /// `$n` back-references.
    Splice(String),
    /// Non-string replacement (or absent), returned as-is.
    Fixed(Option<Value>),
}

struct RegexRule {
    regex: Regex,
    target: RuleTarget,
}

impl std::fmt::Debug for RegexRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegexRule")
            .field("regex", &self.regex)
            .field("target", &self.target)
            .finish()
    }
}

#[derive(Debug, Default)]
struct BoolTable {
    map: HashMap<bool, Option<Value>>,
}

enum RuleOutcome {
    Matched(Option<Value>),
    Unmatched,
}

/// Compiled value transformer.
///
/// Application order: pre-block, literal map, first matching regex in
/// insertion order, catch-all, unchanged. Boolean filters additionally
/// parse the value as a boolean once the string rules yield absent.
pub struct Filter {
    pre: Option<PreBlock>,
    literals: HashMap<String, Option<Value>>,
    rules: Vec<RegexRule>,
    catch_all: Option<Option<Value>>,
    booleans: Option<BoolTable>,
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("pre", &self.pre.as_ref().map(|_| "<closure>"))
            .field("literals", &self.literals)
            .field("rules", &self.rules)
            .field("catch_all", &self.catch_all)
            .field("booleans", &self.booleans)
            .finish()
    }
}

impl Filter {
    /// Compiles a filter for a string-typed attribute.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported regex flag, a
    /// malformed pattern, or a spec with neither entries nor pre-block.
    pub fn compile(spec: &FilterSpec, pre: Option<PreBlock>) -> Result<Self> {
        Self::build(spec, pre, false)
    }

    /// Compiles the synthesized filter for a boolean-typed attribute.
    ///
    /// The spec splits into a string-keyed and a boolean-keyed part; an
    /// empty spec yields the implicit string-to-boolean conversion.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Filter::compile`], except that an empty spec
    /// is permitted.
    pub fn compile_boolean(spec: &FilterSpec, pre: Option<PreBlock>) -> Result<Self> {
        Self::build(spec, pre, true)
    }

    fn build(spec: &FilterSpec, pre: Option<PreBlock>, boolean: bool) -> Result<Self> {
        if !boolean && spec.is_empty() && pre.is_none() {
            return Err(Error::config(
                "filter requires at least one rule or a pre-block",
            ));
        }
        let mut literals = HashMap::new();
        let mut rules = Vec::new();
        let mut catch_all = None;
        let mut booleans = boolean.then(BoolTable::default);

        for (key, target) in spec.entries() {
            if let Some(table) = booleans.as_mut()
                && let Some(flag) = bool_key(key)
            {
                table.map.insert(flag, target.to_option());
                continue;
            }
            if let Some((pattern, case_insensitive)) = parse_pattern_key(key)? {
                if pattern == ".*" {
                    catch_all = Some(target.to_option());
                    continue;
                }
                let regex = RegexBuilder::new(&pattern)
                    .case_insensitive(case_insensitive)
                    .build()
                    .map_err(|e| Error::config(format!("invalid filter pattern '{key}': {e}")))?;
                let target = match target {
                    FilterTarget::Value(Value::Str(text)) => RuleTarget::Splice(text.clone()),
                    other => RuleTarget::Fixed(other.to_option()),
                };
                rules.push(RegexRule { regex, target });
            } else {
                literals.insert(key.clone(), target.to_option());
            }
        }

        Ok(Self {
            pre,
            literals,
            rules,
            catch_all,
            booleans,
        })
    }

    /// Applies the filter to one input value.
    #[must_use]
    pub fn apply(&self, value: Value) -> Option<Value> {
        let value = match &self.pre {
            Some(block) => block(value)?,
            None => value,
        };
        match self.apply_rules(&value) {
            RuleOutcome::Matched(result) if self.booleans.is_none() => result,
            RuleOutcome::Matched(Some(result)) => Some(result),
            RuleOutcome::Matched(None) | RuleOutcome::Unmatched => match &self.booleans {
                None => Some(value),
                Some(table) => {
                    let flag = value.as_bool()?;
                    match table.map.get(&flag) {
                        Some(mapped) => mapped.clone(),
                        None => Some(Value::Bool(flag)),
                    }
                }
            },
        }
    }

    fn apply_rules(&self, value: &Value) -> RuleOutcome {
        let text = value.to_string();
        if let Some(mapped) = self.literals.get(&text) {
            return RuleOutcome::Matched(mapped.clone());
        }
        for rule in &self.rules {
            if rule.regex.is_match(&text) {
                return RuleOutcome::Matched(match &rule.target {
                    RuleTarget::Fixed(fixed) => fixed.clone(),
                    RuleTarget::Splice(template) => {
                        // First match only; `$n` expands to captures.
                        let substituted = rule.regex.replace(&text, template.as_str());
                        if substituted.is_empty() {
                            None
                        } else {
                            Some(Value::Str(substituted.into_owned()))
                        }
                    }
                });
            }
        }
        if let Some(mapped) = &self.catch_all {
            return RuleOutcome::Matched(mapped.clone());
        }
        RuleOutcome::Unmatched
    }
}

/// Recognises `/pattern/flags` keys; returns the pattern and whether the
/// `i` flag was given.
fn parse_pattern_key(key: &str) -> Result<Option<(String, bool)>> {
    if !key.starts_with('/') || key.len() < 2 {
        return Ok(None);
    }
    let Some(close) = key.rfind('/') else {
        return Ok(None);
    };
    if close == 0 {
        return Ok(None);
    }
    let pattern = &key[1..close];
    let flags = &key[close + 1..];
    let mut case_insensitive = false;
    for flag in flags.chars() {
        match flag {
            'i' => case_insensitive = true,
            other => {
                return Err(Error::config(format!(
                    "unsupported filter regex flag '{other}' in '{key}'"
                )));
            }
        }
    }
    Ok(Some((pattern.to_owned(), case_insensitive)))
}

fn bool_key(key: &str) -> Option<bool> {
    match key {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(spec: FilterSpec) -> Filter {
        Filter::compile(&spec, None).expect("filter should compile")
    }

    #[test]
    fn literal_rules_win_over_regexes() {
        let f = filter(
            FilterSpec::new()
                .entry("Street", "St")
                .entry("/S.*/", "match"),
        );
        assert_eq!(f.apply(Value::from("Street")), Some(Value::Str("St".into())));
        assert_eq!(f.apply(Value::from("Suite")), Some(Value::Str("match".into())));
    }

    #[test]
    fn regexes_apply_in_insertion_order() {
        let f = filter(
            FilterSpec::new()
                .entry("/ab.*/", "first")
                .entry("/a.*/", "second"),
        );
        assert_eq!(f.apply(Value::from("abc")), Some(Value::Str("first".into())));
        assert_eq!(f.apply(Value::from("axe")), Some(Value::Str("second".into())));
    }

    #[test]
    fn string_replacements_splice_over_the_match() {
        let f = filter(FilterSpec::new().entry("/Street/", "St"));
        assert_eq!(
            f.apply(Value::from("123 Oak Street")),
            Some(Value::Str("123 Oak St".into()))
        );
    }

    #[test]
    fn templates_substitute_captures() {
        let f = filter(FilterSpec::new().entry("/(\\d+) Oak (.*)/", "$1 Elm $2"));
        assert_eq!(
            f.apply(Value::from("123 Oak Street")),
            Some(Value::Str("123 Elm Street".into()))
        );
    }

    #[test]
    fn empty_substitution_is_absent() {
        let f = filter(FilterSpec::new().entry("/x(\\d*)/", "$1"));
        assert_eq!(f.apply(Value::from("x")), None);
    }

    #[test]
    fn catch_all_applies_when_nothing_matches() {
        let f = filter(FilterSpec::new().entry("known", "mapped").entry("/.*/", "other"));
        assert_eq!(f.apply(Value::from("known")), Some(Value::Str("mapped".into())));
        assert_eq!(f.apply(Value::from("zzz")), Some(Value::Str("other".into())));
    }

    #[test]
    fn unmatched_values_pass_through() {
        let f = filter(FilterSpec::new().entry("a", "b"));
        assert_eq!(f.apply(Value::from("zzz")), Some(Value::Str("zzz".into())));
    }

    #[test]
    fn idempotent_specs_stabilise_after_one_application() {
        let f = filter(FilterSpec::new().entry("/Street$/", "St").entry("IL", "IL"));
        let once = f.apply(Value::from("123 Oak Street")).expect("first pass");
        let twice = f.apply(once.clone()).expect("second pass");
        assert_eq!(once, twice);
    }

    #[test]
    fn case_insensitive_flag_is_honoured() {
        let f = filter(FilterSpec::new().entry("/street/i", "St"));
        assert_eq!(f.apply(Value::from("STREET")), Some(Value::Str("St".into())));
    }

    #[test]
    fn unknown_flags_are_fatal() {
        let err = Filter::compile(&FilterSpec::new().entry("/a/x", "b"), None)
            .expect_err("flag 'x' should be rejected");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn empty_spec_without_pre_block_is_fatal() {
        let err = Filter::compile(&FilterSpec::new(), None)
            .expect_err("empty spec should be rejected");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn pre_block_runs_first() {
        let pre: PreBlock = Box::new(|v| Some(Value::Str(format!("{v}!"))));
        let f = Filter::compile(&FilterSpec::new().entry("hi!", "greeting"), Some(pre))
            .expect("filter should compile");
        assert_eq!(f.apply(Value::from("hi")), Some(Value::Str("greeting".into())));
    }

    #[test]
    fn implicit_boolean_filter_parses_spellings() {
        let f = Filter::compile_boolean(&FilterSpec::new(), None).expect("boolean filter");
        assert_eq!(f.apply(Value::from("Yes")), Some(Value::Bool(true)));
        assert_eq!(f.apply(Value::from("n")), Some(Value::Bool(false)));
        assert_eq!(f.apply(Value::Int(1)), Some(Value::Bool(true)));
        assert_eq!(f.apply(Value::from("maybe")), None);
    }

    #[test]
    fn boolean_filter_string_rules_win() {
        let spec = FilterSpec::new().entry("unknown", true).entry("true", "Y");
        let f = Filter::compile_boolean(&spec, None).expect("boolean filter");
        // String rule maps an otherwise unparseable spelling.
        assert_eq!(f.apply(Value::from("unknown")), Some(Value::Bool(true)));
        // Boolean-keyed rule remaps a parsed boolean.
        assert_eq!(f.apply(Value::from("yes")), Some(Value::Str("Y".into())));
    }
}
