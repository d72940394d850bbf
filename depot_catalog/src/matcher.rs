//! FMRI list filtering: [`extract_matching_fmris`] composes stem, publisher,
//! version-successor, and version-pattern matching with per-pattern match
//! counting.

use std::collections::BTreeMap;

use depot_types::{Fmri, VersionPattern};

/// Filter an FMRI sequence, keeping entries that satisfy at least one of
/// the supplied patterns.
///
/// `patterns` are FMRI patterns: the stem must match (exact or `*` glob),
/// a pattern publisher constrains the entry's publisher, and a pattern
/// version admits the entry when the entry's version is the same or a
/// successor (so a trailing `:timestamp` excludes older entries).
/// `versions` are positional version patterns with no name constraint.
///
/// The result preserves input order, with each input entry appearing at
/// most once however many patterns it matches. `counthash` receives one
/// count per supplied pattern, including zeroes, each computed
/// independently of the dedup. The second element of the returned tuple
/// lists the patterns that matched nothing.
///
/// Supplying no patterns at all keeps everything.
pub fn extract_matching_fmris<'a, I>(
    fmris: I,
    patterns: Option<&[Fmri]>,
    versions: Option<&[VersionPattern]>,
    mut counthash: Option<&mut BTreeMap<String, usize>>,
) -> (Vec<&'a Fmri>, Vec<String>)
where
    I: IntoIterator<Item = &'a Fmri>,
{
    let patterns = patterns.unwrap_or(&[]);
    let versions = versions.unwrap_or(&[]);
    let unconstrained = patterns.is_empty() && versions.is_empty();

    if let Some(counts) = counthash.as_deref_mut() {
        for pattern in patterns {
            counts.insert(pattern.to_string(), 0);
        }
        for pattern in versions {
            counts.insert(pattern.to_string(), 0);
        }
    }

    let mut pattern_hit = vec![false; patterns.len()];
    let mut version_hit = vec![false; versions.len()];
    let mut matched = Vec::new();

    for fmri in fmris {
        let mut keep = unconstrained;
        for (i, pattern) in patterns.iter().enumerate() {
            if fmri.is_successor(pattern) {
                keep = true;
                pattern_hit[i] = true;
                if let Some(counts) = counthash.as_deref_mut() {
                    *counts.entry(pattern.to_string()).or_insert(0) += 1;
                }
            }
        }
        for (i, pattern) in versions.iter().enumerate() {
            if fmri.version().is_some_and(|v| pattern.matches(v)) {
                keep = true;
                version_hit[i] = true;
                if let Some(counts) = counthash.as_deref_mut() {
                    *counts.entry(pattern.to_string()).or_insert(0) += 1;
                }
            }
        }
        if keep {
            matched.push(fmri);
        }
    }

    let mut unmatched = Vec::new();
    for (i, pattern) in patterns.iter().enumerate() {
        if !pattern_hit[i] {
            unmatched.push(pattern.to_string());
        }
    }
    for (i, pattern) in versions.iter().enumerate() {
        if !version_hit[i] {
            unmatched.push(pattern.to_string());
        }
    }

    (matched, unmatched)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::tests::populated_catalog;

    fn fmri(s: &str) -> Fmri {
        s.parse().unwrap()
    }

    fn match_versions(
        catalog: &Catalog,
        patterns: &[&str],
        counts: &mut BTreeMap<String, usize>,
    ) -> Vec<String> {
        let patterns: Vec<VersionPattern> = patterns.iter().map(|s| s.parse().unwrap()).collect();
        let (mut matched, _) = extract_matching_fmris(
            catalog.fmris(),
            None,
            Some(&patterns),
            Some(counts),
        );
        matched.sort();
        matched.iter().map(|f| f.display_anarchic()).collect()
    }

    fn all_entries() -> Vec<String> {
        [
            "pkg:/apkg@1.0,5.11-1:20000101T120040Z",
            "pkg:/test@1.0,5.11-1:20000101T120000Z",
            "pkg:/test@1.0,5.11-1:20000101T120010Z",
            "pkg:/test@1.0,5.11-1.1:20000101T120020Z",
            "pkg:/test@1.0,5.11-1.2:20000101T120030Z",
            "pkg:/test@1.0,5.11-2:20000101T120040Z",
            "pkg:/test@1.1,5.11-1:20000101T120040Z",
            "pkg:/test@3.2.1,5.11-1:20000101T120050Z",
            "pkg:/test@3.2.1,5.11-1.2:20000101T120051Z",
            "pkg:/test@3.2.1,5.11-1.2.3:20000101T120052Z",
            "pkg:/zpkg@1.0,5.11-1:20000101T120014Z",
            "pkg:/zpkg@1.0,5.11-1:20000101T120040Z",
        ]
        .map(String::from)
        .to_vec()
    }

    #[test]
    fn version_pattern_table() {
        let catalog = populated_catalog();
        let expectations: Vec<(&str, Vec<String>)> = vec![
            ("*", all_entries()),
            (
                "1.0",
                vec![
                    "pkg:/apkg@1.0,5.11-1:20000101T120040Z".to_string(),
                    "pkg:/test@1.0,5.11-1:20000101T120000Z".to_string(),
                    "pkg:/test@1.0,5.11-1:20000101T120010Z".to_string(),
                    "pkg:/test@1.0,5.11-1.1:20000101T120020Z".to_string(),
                    "pkg:/test@1.0,5.11-1.2:20000101T120030Z".to_string(),
                    "pkg:/test@1.0,5.11-2:20000101T120040Z".to_string(),
                    "pkg:/zpkg@1.0,5.11-1:20000101T120014Z".to_string(),
                    "pkg:/zpkg@1.0,5.11-1:20000101T120040Z".to_string(),
                ],
            ),
            (
                "1.1",
                vec!["pkg:/test@1.1,5.11-1:20000101T120040Z".to_string()],
            ),
            (
                "*.1",
                vec!["pkg:/test@1.1,5.11-1:20000101T120040Z".to_string()],
            ),
            (
                "3.*",
                vec![
                    "pkg:/test@3.2.1,5.11-1:20000101T120050Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2:20000101T120051Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2.3:20000101T120052Z".to_string(),
                ],
            ),
            (
                "3.2.*",
                vec![
                    "pkg:/test@3.2.1,5.11-1:20000101T120050Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2:20000101T120051Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2.3:20000101T120052Z".to_string(),
                ],
            ),
            (
                "3.*.*",
                vec![
                    "pkg:/test@3.2.1,5.11-1:20000101T120050Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2:20000101T120051Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2.3:20000101T120052Z".to_string(),
                ],
            ),
            ("*,5.11", all_entries()),
            ("*,*-*", all_entries()),
            (
                "*,*-*.2",
                vec![
                    "pkg:/test@1.0,5.11-1.2:20000101T120030Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2:20000101T120051Z".to_string(),
                ],
            ),
            (
                "*,*-*.*.3",
                vec!["pkg:/test@3.2.1,5.11-1.2.3:20000101T120052Z".to_string()],
            ),
            (
                "*,*-1",
                vec![
                    "pkg:/apkg@1.0,5.11-1:20000101T120040Z".to_string(),
                    "pkg:/test@1.0,5.11-1:20000101T120000Z".to_string(),
                    "pkg:/test@1.0,5.11-1:20000101T120010Z".to_string(),
                    "pkg:/test@1.1,5.11-1:20000101T120040Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1:20000101T120050Z".to_string(),
                    "pkg:/zpkg@1.0,5.11-1:20000101T120014Z".to_string(),
                    "pkg:/zpkg@1.0,5.11-1:20000101T120040Z".to_string(),
                ],
            ),
            (
                "*,*-1.2",
                vec![
                    "pkg:/test@1.0,5.11-1.2:20000101T120030Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2:20000101T120051Z".to_string(),
                ],
            ),
            (
                "*,*-1.2.*",
                vec![
                    "pkg:/test@1.0,5.11-1.2:20000101T120030Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2:20000101T120051Z".to_string(),
                    "pkg:/test@3.2.1,5.11-1.2.3:20000101T120052Z".to_string(),
                ],
            ),
            ("*,*-*:*", all_entries()),
        ];

        for (pattern, expected) in expectations {
            let mut counts = BTreeMap::new();
            let matched = match_versions(&catalog, &[pattern], &mut counts);
            assert_eq!(matched, expected, "pattern {pattern}");
            assert_eq!(counts[pattern], expected.len(), "pattern {pattern}");
        }
    }

    #[test]
    fn a_specific_trailing_component_only_matches_versions_ending_that_way() {
        let mut catalog = Catalog::new();
        for s in [
            "pkg://opensolaris.org/test@1.0,5.11-1:20000101T120000Z",
            "pkg://opensolaris.org/test@1.0,5.11-1.1:20000101T120010Z",
            "pkg://opensolaris.org/test@1.1,5.11-1:20000101T120020Z",
        ] {
            catalog.add_package(fmri(s), None).unwrap();
        }
        let patterns = vec!["*.1".parse::<VersionPattern>().unwrap()];
        let (matched, unmatched) =
            extract_matching_fmris(catalog.fmris(), None, Some(&patterns), None);
        let matched: Vec<String> = matched.iter().map(|f| f.display_anarchic()).collect();
        assert_eq!(matched, vec!["pkg:/test@1.1,5.11-1:20000101T120020Z"]);
        assert!(unmatched.is_empty());
    }

    #[test]
    fn multiple_version_patterns_union_with_independent_counts() {
        let catalog = populated_catalog();
        let mut counts = BTreeMap::new();
        let matched = match_versions(&catalog, &["*,*-1", "*,*-*:*"], &mut counts);
        // The union is deduplicated, the counts are not.
        assert_eq!(matched, all_entries());
        assert_eq!(counts["*,*-1"], 7);
        assert_eq!(counts["*,*-*:*"], 12);
    }

    #[test]
    fn fmri_patterns_admit_successors() {
        let catalog = populated_catalog();
        for (pattern, expected) in [
            ("pkg:/test@1.0,5.10-1:20070101T120000Z", 7),
            ("pkg:/test@1.0,5.11-1:20061231T120000Z", 7),
            ("pkg:/test@1.0,5.11-2", 5),
            ("pkg:/test@1.0,5.11-3", 4),
        ] {
            let patterns = vec![fmri(pattern)];
            let (matched, _) =
                extract_matching_fmris(catalog.fmris(), Some(&patterns), None, None);
            assert_eq!(matched.len(), expected, "pattern {pattern}");
        }
    }

    #[test]
    fn fmri_patterns_glob_stems() {
        let catalog = populated_catalog();
        let patterns = vec![fmri("pkg:/*pkg")];
        let mut counts = BTreeMap::new();
        let (matched, _) = extract_matching_fmris(
            catalog.fmris(),
            Some(&patterns),
            None,
            Some(&mut counts),
        );
        assert_eq!(matched.len(), 3);
        assert!(matched.iter().all(|f| f.stem().ends_with("pkg")));
        assert_eq!(counts["pkg:/*pkg"], 3);
    }

    #[test]
    fn no_patterns_keeps_everything_in_input_order() {
        let catalog = populated_catalog();
        let input: Vec<&Fmri> = catalog.fmris().collect();
        let (matched, unmatched) = extract_matching_fmris(input.clone(), None, None, None);
        assert_eq!(matched, input);
        assert!(unmatched.is_empty());
    }

    #[test]
    fn unmatched_patterns_are_reported_with_zero_counts() {
        let catalog = populated_catalog();
        let patterns = vec![fmri("pkg:/absent@1.0")];
        let versions = vec!["9.9".parse::<VersionPattern>().unwrap()];
        let mut counts = BTreeMap::new();
        let (matched, unmatched) = extract_matching_fmris(
            catalog.fmris(),
            Some(&patterns),
            None,
            Some(&mut counts),
        );
        assert!(matched.is_empty());
        assert_eq!(unmatched, vec!["pkg:/absent@1.0".to_string()]);
        assert_eq!(counts["pkg:/absent@1.0"], 0);

        let mut counts = BTreeMap::new();
        let (matched, unmatched) = extract_matching_fmris(
            catalog.fmris(),
            None,
            Some(&versions),
            Some(&mut counts),
        );
        assert!(matched.is_empty());
        assert_eq!(unmatched, vec!["9.9".to_string()]);
        assert_eq!(counts["9.9"], 0);
    }

    #[test]
    fn empty_input_matches_nothing() {
        let patterns = vec![fmri("pkg:/test@1.0,5.10-1:20070101T120000Z")];
        let (matched, unmatched) =
            extract_matching_fmris(std::iter::empty::<&Fmri>(), Some(&patterns), None, None);
        assert!(matched.is_empty());
        assert_eq!(unmatched.len(), 1);
    }
}
