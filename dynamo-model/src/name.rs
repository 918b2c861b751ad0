//! Block naming (internal vs. external, per section 9's design note) and the
//! `fnmatch`-style glob matcher used by the include/exclude site, group, and
//! dataset filters in the configuration surface.

use std::fmt;

/// The opaque id a block is known by within its dataset (e.g. a UUID). This
/// is the SQL storage key — never send it over the wire without its owning
/// dataset name attached.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockName(String);

impl BlockName {
    pub fn new(raw: impl Into<String>) -> Self {
        BlockName(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The wire form sent to and received from remote catalogs:
    /// `<dataset name>#<block name>`.
    pub fn external(&self, dataset_name: &str) -> ExternalBlockName {
        ExternalBlockName(format!("{dataset_name}#{}", self.0))
    }
}

impl fmt::Debug for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockName({:?})", self.0)
    }
}

impl fmt::Display for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The wire form of a block name: `<dataset>#<block>`. Never used as a
/// storage key directly; split it to recover the [`BlockName`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ExternalBlockName(String);

impl ExternalBlockName {
    pub fn new(raw: impl Into<String>) -> Self {
        ExternalBlockName(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into the owning dataset's name and the block's internal name.
    /// Returns `None` if there is no `#` separator.
    pub fn split(&self) -> Option<(&str, BlockName)> {
        let idx = self.0.rfind('#')?;
        Some((&self.0[..idx], BlockName(self.0[idx + 1..].to_string())))
    }
}

impl fmt::Display for ExternalBlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Matches a `fnmatch`-style glob (`*` any run of characters, `?` exactly
/// one) against `name`. Used by `include`/`exclude` site, group, and dataset
/// filters throughout the configuration surface.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = name.chars().collect();
    let mut memo = vec![vec![None; text.len() + 1]; pat.len() + 1];
    glob_match_inner(&pat, &text, 0, 0, &mut memo)
}

fn glob_match_inner(
    pat: &[char],
    text: &[char],
    pi: usize,
    ti: usize,
    memo: &mut [Vec<Option<bool>>],
) -> bool {
    if let Some(cached) = memo[pi][ti] {
        return cached;
    }
    let result = if pi == pat.len() {
        ti == text.len()
    } else {
        match pat[pi] {
            '*' => {
                (ti..=text.len()).any(|t| glob_match_inner(pat, text, pi + 1, t, memo))
            }
            '?' => ti < text.len() && glob_match_inner(pat, text, pi + 1, ti + 1, memo),
            c => ti < text.len() && text[ti] == c && glob_match_inner(pat, text, pi + 1, ti + 1, memo),
        }
    };
    memo[pi][ti] = Some(result);
    result
}

/// `true` if `name` matches at least one `include` pattern and none of the
/// `exclude` patterns. An empty `include` list is treated as "match
/// everything" (mirrors the `['*']` default in the original site/group/
/// dataset name filters).
pub fn passes_filter(name: &str, include: &[String], exclude: &[String]) -> bool {
    let included = include.is_empty() || include.iter().any(|p| glob_match(p, name));
    let excluded = exclude.iter().any(|p| glob_match(p, name));
    included && !excluded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_block_name_round_trips() {
        let internal = BlockName::new("abcd-1234");
        let external = internal.external("/A/B/C");
        assert_eq!(external.as_str(), "/A/B/C#abcd-1234");
        let (dataset, block) = external.split().unwrap();
        assert_eq!(dataset, "/A/B/C");
        assert_eq!(block, internal);
    }

    #[test]
    fn glob_matches_star_and_question_mark() {
        assert!(glob_match("T1_*", "T1_US_FNAL"));
        assert!(!glob_match("T1_*", "T2_US_FNAL"));
        assert!(glob_match("T?_US_FNAL", "T1_US_FNAL"));
        assert!(!glob_match("T?_US_FNAL", "T12_US_FNAL"));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn passes_filter_respects_exclude_precedence() {
        let include = vec!["T1_*".to_string(), "T2_*".to_string()];
        let exclude = vec!["T2_Disabled_*".to_string()];
        assert!(passes_filter("T1_US_FNAL", &include, &exclude));
        assert!(passes_filter("T2_UK_RAL", &include, &exclude));
        assert!(!passes_filter("T2_Disabled_Site", &include, &exclude));
        assert!(!passes_filter("T3_Unlisted", &include, &exclude));
    }

    #[test]
    fn empty_include_matches_everything() {
        assert!(passes_filter("anything", &[], &[]));
    }
}
