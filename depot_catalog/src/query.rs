//! The action query pipeline: class filtering, variant exclusion, and
//! locale selection over lazily acquired manifests.
//!
//! The three filters compose into a single predicate applied in one pass
//! over an entry's action sequence; variant and locale are independent
//! axes, so an action has to pass every one of them.

use std::collections::BTreeSet;
use std::sync::Arc;

use depot_manifest::{Action, Manifest, Variants};
use depot_types::Fmri;

use crate::Result;
use crate::catalog::Catalog;

/// A named, non-overlapping group of manifest action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    /// Dependency-bearing actions plus package-obsolescence, facet, and
    /// variant declaration attributes.
    Dependency,
    /// Human-readable summary, description, and classification attributes.
    Summary,
}

/// Locale-sensitive attribute names of the [`ActionClass::Summary`] class,
/// compared against an action's name with any locale suffix stripped.
const SUMMARY_ATTRS: [&str; 5] = [
    "description",
    "info.classification",
    "pkg.description",
    "pkg.summary",
    "summary",
];

impl ActionClass {
    fn includes(self, action: &Action) -> bool {
        match self {
            Self::Dependency => match action.kind() {
                "depend" => true,
                "set" => action.name().is_some_and(|name| {
                    name == "pkg.obsolete"
                        || name == "pkg.renamed"
                        || name.starts_with("variant.")
                        || name.starts_with("facet.")
                }),
                _ => false,
            },
            Self::Summary => {
                action.kind() == "set"
                    && action
                        .base_name()
                        .is_some_and(|base| SUMMARY_ATTRS.contains(&base))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ActionFilter {
    classes: Vec<ActionClass>,
    excludes: Vec<Variants>,
    locales: Option<BTreeSet<String>>,
}

impl ActionFilter {
    fn new(
        classes: &[ActionClass],
        excludes: &[Variants],
        locales: Option<&BTreeSet<String>>,
    ) -> Self {
        assert!(
            !classes.is_empty(),
            "action queries require at least one action class"
        );
        Self {
            classes: classes.to_vec(),
            excludes: excludes.to_vec(),
            locales: locales.cloned(),
        }
    }

    fn admits(&self, action: &Action) -> bool {
        if !self.classes.iter().any(|class| class.includes(action)) {
            return false;
        }
        if !self.excludes.iter().all(|v| v.allow_action(action)) {
            return false;
        }
        // Untagged actions are the `C` locale and are always kept; tagged
        // ones only when their locale was requested.
        match (action.locale(), &self.locales) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(locale), Some(requested)) => requested.contains(locale),
        }
    }
}

/// The filtered action sequence of one catalog entry. Lazy: the manifest is
/// held, but actions are filtered as the iterator advances, in manifest
/// declaration order.
#[derive(Debug, Clone)]
pub struct EntryActions {
    manifest: Arc<Manifest>,
    index: usize,
    filter: ActionFilter,
}

impl Iterator for EntryActions {
    type Item = Action;

    fn next(&mut self) -> Option<Action> {
        while let Some(action) = self.manifest.actions().get(self.index) {
            self.index += 1;
            if self.filter.admits(action) {
                return Some(action.clone());
            }
        }
        None
    }
}

impl Catalog {
    /// A lazy, restartable sequence of `(fmri, actions)` pairs, one per
    /// catalog entry, where `actions` yields the entry's manifest actions
    /// belonging to one of `classes`, surviving every `excludes` predicate,
    /// and matching the locale selection (`None` keeps untagged actions
    /// only). Manifests are acquired per entry as the sequence advances;
    /// an entry without one yields an empty action sequence.
    ///
    /// An empty `classes` list is a programming-contract violation.
    pub fn actions<'a>(
        &'a self,
        classes: &[ActionClass],
        excludes: &[Variants],
        locales: Option<&BTreeSet<String>>,
    ) -> impl Iterator<Item = (&'a Fmri, EntryActions)> + use<'a> {
        let filter = ActionFilter::new(classes, excludes, locales);
        self.entries().map(move |(fmri, entry)| {
            let actions = EntryActions {
                manifest: self.manifest_for_entry(fmri, entry),
                index: 0,
                filter: filter.clone(),
            };
            (fmri, actions)
        })
    }

    /// The filtered action sequence of a single entry; fails for an
    /// unknown FMRI. Same contract as [`Catalog::actions`] otherwise.
    pub fn get_entry_actions(
        &self,
        fmri: &Fmri,
        classes: &[ActionClass],
        excludes: &[Variants],
        locales: Option<&BTreeSet<String>>,
    ) -> Result<EntryActions> {
        let filter = ActionFilter::new(classes, excludes, locales);
        let entry = self.get_entry(fmri)?;
        Ok(EntryActions {
            manifest: self.manifest_for_entry(fmri, entry),
            index: 0,
            filter,
        })
    }

    /// Sorted values the named variant takes across the entry's manifest,
    /// or `None` when the manifest declares no such variant.
    pub fn get_entry_variants(&self, fmri: &Fmri, variant: &str) -> Result<Option<Vec<String>>> {
        Ok(self.entry_manifest(fmri)?.variant_values(variant))
    }

    /// Every variant declared on the entry's manifest, as
    /// `(name, sorted values)` pairs in name order.
    pub fn get_entry_all_variants(
        &self,
        fmri: &Fmri,
    ) -> Result<impl Iterator<Item = (String, Vec<String>)> + use<>> {
        let manifest = self.entry_manifest(fmri)?;
        let variants: Vec<(String, Vec<String>)> = manifest.all_variants().collect();
        Ok(variants.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn fmri(s: &str) -> Fmri {
        s.parse().unwrap()
    }

    fn test_manifest(pfmri: &Fmri) -> Arc<Manifest> {
        let mut m = Manifest::new();
        if pfmri.stem() == "apkg" {
            return Arc::new(m);
        }
        let f = pfmri.to_string();
        m.set_content(&format!(
            "depend fmri=foo@1.0 type=require\n\
             set name=facet.devel value=true\n\
             set name=variant.arch value=i386 value=sparc\n\
             set name=pkg.obsolete value=true\n\
             set name=pkg.fmri value=\"{f}\"\n\
             set name=pkg.summary value=\"Summary {f}\"\n\
             set name=pkg.summary value=\"Sparc Summary {f}\" variant.arch=sparc\n\
             set name=pkg.summary:th value=\"Thai Summary {f}\"\n\
             set name=pkg.description value=\"Desc {f}\"\n"
        ))
        .unwrap();
        Arc::new(m)
    }

    fn source_fmris() -> Vec<Fmri> {
        vec![
            fmri("pkg://opensolaris.org/test@1.0,5.11-1:20000101T120010Z"),
            fmri("pkg://opensolaris.org/test@1.0,5.11-1.1:20000101T120020Z"),
            fmri("pkg://opensolaris.org/apkg@1.0,5.11-1:20000101T120040Z"),
        ]
    }

    fn expected_dependency() -> Vec<String> {
        vec![
            "depend fmri=foo@1.0 type=require".to_string(),
            "set name=facet.devel value=true".to_string(),
            "set name=variant.arch value=i386 value=sparc".to_string(),
            "set name=pkg.obsolete value=true".to_string(),
        ]
    }

    fn expected_summary(f: &Fmri) -> Vec<String> {
        vec![
            format!("set name=pkg.summary value=\"Summary {f}\""),
            format!("set name=pkg.description value=\"Desc {f}\""),
        ]
    }

    fn expected_all_variant_summary(f: &Fmri) -> Vec<String> {
        vec![
            format!("set name=pkg.summary value=\"Summary {f}\""),
            format!("set name=pkg.summary value=\"Sparc Summary {f}\" variant.arch=sparc"),
            format!("set name=pkg.description value=\"Desc {f}\""),
        ]
    }

    fn expected_all_locale_summary(f: &Fmri) -> Vec<String> {
        let mut expected = vec![
            format!("set name=pkg.summary value=\"Summary {f}\""),
            format!("set name=pkg.description value=\"Desc {f}\""),
            format!("set name=pkg.summary:th value=\"Thai Summary {f}\""),
        ];
        expected.sort();
        expected
    }

    fn arch_excludes() -> Vec<Variants> {
        let mut v = Variants::new();
        v.insert("variant.arch", "i386");
        vec![v]
    }

    /// Exercises the pipeline the same way regardless of how the catalog
    /// acquires manifests.
    fn check_catalog_actions(nc: &Catalog) {
        let fmris: Vec<&Fmri> = nc.fmris().collect();

        // Dependency class only.
        for (f, actions) in nc.actions(&[ActionClass::Dependency], &[], None) {
            let returned: Vec<String> = actions.map(|a| a.to_string()).collect();
            if f.stem() == "apkg" {
                assert_eq!(returned, Vec::<String>::new());
                assert_eq!(
                    nc.get_entry_variants(f, "variant.arch").unwrap(),
                    None
                );
                assert_eq!(nc.get_entry_all_variants(f).unwrap().count(), 0);
                continue;
            }
            assert_eq!(returned, expected_dependency());
            assert_eq!(
                nc.get_entry_variants(f, "variant.arch").unwrap(),
                Some(vec!["i386".to_string(), "sparc".to_string()])
            );
            let all: Vec<(String, Vec<String>)> =
                nc.get_entry_all_variants(f).unwrap().collect();
            assert_eq!(
                all,
                vec![(
                    "variant.arch".to_string(),
                    vec!["i386".to_string(), "sparc".to_string()]
                )]
            );
        }

        // Summary class: default locale selection keeps untagged actions
        // only, but every variant combination.
        for (f, actions) in nc.actions(&[ActionClass::Summary], &[], None) {
            let returned: Vec<String> = actions.map(|a| a.to_string()).collect();
            if f.stem() == "apkg" {
                assert_eq!(returned, Vec::<String>::new());
                continue;
            }
            assert_eq!(returned, expected_all_variant_summary(f));
        }

        // Summary class with locales: C and th, without sparc variants.
        let locales: BTreeSet<String> = ["C".to_string(), "th".to_string()].into();
        for (f, actions) in nc.actions(&[ActionClass::Summary], &arch_excludes(), Some(&locales))
        {
            let mut returned: Vec<String> = actions.map(|a| a.to_string()).collect();
            if f.stem() == "apkg" {
                assert_eq!(returned, Vec::<String>::new());
                continue;
            }
            // Mixed-locale output has no canonical order; sort to compare.
            returned.sort();
            assert_eq!(returned, expected_all_locale_summary(f));
        }

        // Summary class without sparc variants.
        for (f, actions) in nc.actions(&[ActionClass::Summary], &arch_excludes(), None) {
            let returned: Vec<String> = actions.map(|a| a.to_string()).collect();
            if f.stem() == "apkg" {
                assert_eq!(returned, Vec::<String>::new());
                continue;
            }
            assert_eq!(returned, expected_summary(f));
        }

        // Single-entry equivalents.
        let f = fmris
            .iter()
            .find(|f| f.stem() == "test")
            .expect("test package present");

        let returned: Vec<String> = nc
            .get_entry_actions(f, &[ActionClass::Dependency], &[], None)
            .unwrap()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(returned, expected_dependency());

        let returned: Vec<String> = nc
            .get_entry_actions(f, &[ActionClass::Summary], &[], None)
            .unwrap()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(returned, expected_all_variant_summary(f));

        let mut returned: Vec<String> = nc
            .get_entry_actions(f, &[ActionClass::Summary], &arch_excludes(), Some(&locales))
            .unwrap()
            .map(|a| a.to_string())
            .collect();
        returned.sort();
        assert_eq!(returned, expected_all_locale_summary(f));

        let returned: Vec<String> = nc
            .get_entry_actions(f, &[ActionClass::Summary], &arch_excludes(), None)
            .unwrap()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(returned, expected_summary(f));
    }

    #[test]
    fn actions_with_a_manifest_source() {
        let mut nc = Catalog::builder()
            .manifest_source(|f: &Fmri| test_manifest(f))
            .build()
            .unwrap();
        for f in source_fmris() {
            nc.add_package(f, None).unwrap();
        }
        check_catalog_actions(&nc);
    }

    #[test]
    fn actions_with_embedded_manifests() {
        let mut nc = Catalog::new();
        for f in source_fmris() {
            let m = test_manifest(&f);
            nc.add_package(f, Some(m)).unwrap();
        }
        check_catalog_actions(&nc);
    }

    #[test]
    fn embedded_manifests_take_precedence_over_the_source() {
        let mut nc = Catalog::builder()
            .manifest_source(|f: &Fmri| test_manifest(f))
            .build()
            .unwrap();
        for f in source_fmris() {
            let m = test_manifest(&f);
            nc.add_package(f, Some(m)).unwrap();
        }
        check_catalog_actions(&nc);
    }

    #[test]
    fn entries_without_manifests_yield_empty_action_sequences() {
        let mut nc = Catalog::new();
        for f in source_fmris() {
            nc.add_package(f, None).unwrap();
        }
        let mut last = None;
        for (f, actions) in nc.actions(&[ActionClass::Dependency], &[], None) {
            assert_eq!(actions.count(), 0);
            last = Some(f.clone());
        }
        let last = last.unwrap();
        let returned = nc
            .get_entry_actions(&last, &[ActionClass::Dependency], &[], None)
            .unwrap();
        assert_eq!(returned.count(), 0);
    }

    #[test]
    #[should_panic(expected = "at least one action class")]
    fn actions_with_no_classes_is_a_contract_violation() {
        let nc = Catalog::new();
        let _ = nc.actions(&[], &[], None);
    }

    #[test]
    #[should_panic(expected = "at least one action class")]
    fn get_entry_actions_with_no_classes_is_a_contract_violation() {
        let nc = Catalog::new();
        let _ = nc.get_entry_actions(
            &fmri("pkg:/test@1.0,5.11-1"),
            &[],
            &[],
            None,
        );
    }

    #[test]
    fn get_entry_actions_fails_for_unknown_fmris() {
        let nc = Catalog::new();
        let err = nc
            .get_entry_actions(
                &fmri("pkg:/absent@1.0,5.11-1"),
                &[ActionClass::Dependency],
                &[],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, crate::CatalogError::UnknownPackage { .. }));
    }

    #[test]
    fn actions_on_an_empty_catalog_yield_nothing() {
        let nc = Catalog::new();
        assert_eq!(nc.actions(&[ActionClass::Dependency], &[], None).count(), 0);
    }
}
