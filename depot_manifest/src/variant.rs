//! Variant exclusion predicate: a set of `variant.* = value` selections
//! that admits or drops actions by their variant tags.

use std::collections::BTreeMap;

use crate::action::Action;

/// Selected values for named variant axes, e.g. `variant.arch = i386`.
///
/// Used as an exclude predicate during action queries: an action tagged for
/// an axis this selection constrains is admitted only if its tag values
/// include the selected value. Untagged actions always pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variants(BTreeMap<String, String>);

impl Variants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variant: impl Into<String>, value: impl Into<String>) {
        self.0.insert(variant.into(), value.into());
    }

    pub fn get(&self, variant: &str) -> Option<&str> {
        self.0.get(variant).map(String::as_str)
    }

    pub fn allow_action(&self, action: &Action) -> bool {
        for (variant, values) in action.variant_tags() {
            if let Some(selected) = self.0.get(variant) {
                if !values.iter().any(|v| v == selected) {
                    return false;
                }
            }
        }
        true
    }
}

impl FromIterator<(String, String)> for Variants {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(line: &str) -> Action {
        line.parse().unwrap()
    }

    #[test]
    fn untagged_actions_always_pass() {
        let mut v = Variants::new();
        v.insert("variant.arch", "i386");
        assert!(v.allow_action(&action("set name=pkg.summary value=x")));
        assert!(v.allow_action(&action("depend fmri=foo@1.0 type=require")));
    }

    #[test]
    fn mismatched_tags_are_dropped() {
        let mut v = Variants::new();
        v.insert("variant.arch", "i386");
        assert!(!v.allow_action(&action("set name=pkg.summary value=x variant.arch=sparc")));
        assert!(v.allow_action(&action("set name=pkg.summary value=x variant.arch=i386")));
    }

    #[test]
    fn unconstrained_axes_are_ignored() {
        let v = Variants::new();
        assert!(v.allow_action(&action("set name=pkg.summary value=x variant.arch=sparc")));
    }
}
