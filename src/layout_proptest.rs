//! Property-based tests for the deployments path classifier.
//!
//! These tests use proptest to generate random layout paths and verify that
//! classification invariants hold for all of them.

#[cfg(test)]
mod proptest_tests {
    use crate::layout::{base_name, Classification, EnvScope, FileKind, PathClassifier, VALID_REGIONS};
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn region() -> impl Strategy<Value = String> {
        prop::sample::select(VALID_REGIONS).prop_map(str::to_string)
    }

    fn env() -> impl Strategy<Value = String> {
        prop_oneof![Just("all_envs".to_string()), Just("dev".to_string()), Just("prod".to_string())]
    }

    fn kind() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("templates"), Just("parameters")]
    }

    fn file_name() -> impl Strategy<Value = String> {
        ("[a-z][a-z0-9_-]{0,12}", prop::sample::select(vec!["yaml", "yml", "template", "json"]))
            .prop_map(|(stem, ext)| format!("{}.{}", stem, ext))
    }

    fn classifier() -> PathClassifier {
        PathClassifier::new(vec!["dev".to_string(), "prod".to_string()])
    }

    proptest! {
        /// Property: every well-formed layout path classifies as a file and
        /// round-trips to the same repository-relative path
        #[test]
        fn well_formed_paths_round_trip(region in region(), env in env(), kind in kind(), name in file_name()) {
            let path = PathBuf::from("deployments").join(&region).join(&env).join(kind).join(&name);
            match classifier().classify(&path) {
                Classification::File(p) => {
                    prop_assert_eq!(p.path(), path.as_path());
                    prop_assert_eq!(p.region(), region.as_str());
                    prop_assert_eq!(p.env(), &EnvScope::from_segment(&env));
                    prop_assert_eq!(Some(p.kind()), FileKind::from_dir_name(kind));
                }
                other => prop_assert!(false, "unexpected classification {:?}", other),
            }
        }

        /// Property: classification is deterministic
        #[test]
        fn classification_is_deterministic(input in "[a-z/._-]{0,60}") {
            let path = PathBuf::from(&input);
            prop_assert_eq!(classifier().classify(&path), classifier().classify(&path));
        }

        /// Property: adding an extra directory level never yields a file
        #[test]
        fn extra_depth_is_never_a_file(region in region(), env in env(), kind in kind(), name in file_name()) {
            let path = PathBuf::from("deployments").join(&region).join(&env).join(kind).join("nested").join(&name);
            let is_file = matches!(classifier().classify(&path), Classification::File(_));
            prop_assert!(!is_file);
        }

        /// Property: paths outside the deployments root are always unrelated
        #[test]
        fn outside_root_is_unrelated(first in "[a-ce-z][a-z]{0,8}", rest in "[a-z/]{0,30}") {
            let path = PathBuf::from(&first).join(&rest);
            prop_assert_eq!(classifier().classify(&path), Classification::Unrelated);
        }

        /// Property: base_name never contains a dot and prefixes the input
        #[test]
        fn base_name_is_dotless_prefix(input in "[a-z.]{0,20}") {
            let base = base_name(&input);
            prop_assert!(!base.contains('.'));
            prop_assert!(input.starts_with(base));
        }
    }
}
