//! Unit tests for capability kinds.

use rstest::rstest;

use super::*;

#[rstest]
#[case::input(CapabilityKind::Input, "input", "input")]
#[case::file_input(CapabilityKind::FileInput, "file_input", "input")]
#[case::file_output(CapabilityKind::FileOutput, "file_output", "output")]
#[case::parser(CapabilityKind::Parser, "parser", "parser")]
#[case::executor(CapabilityKind::Executor, "executor", "executor")]
fn names_and_categories(
    #[case] kind: CapabilityKind,
    #[case] name: &str,
    #[case] category: &str,
) {
    assert_eq!(kind.as_str(), name);
    assert_eq!(kind.to_string(), name);
    assert_eq!(kind.category(), category);
}

#[test]
fn file_scoped_kinds_serve_full_requests() {
    assert!(CapabilityKind::Input.accepts(CapabilityKind::FileInput));
    assert!(CapabilityKind::Output.accepts(CapabilityKind::FileOutput));
    assert!(!CapabilityKind::FileInput.accepts(CapabilityKind::Input));
    assert!(!CapabilityKind::Input.accepts(CapabilityKind::FileOutput));
}

#[test]
fn every_kind_accepts_itself_only_among_unrelated_kinds() {
    for requested in CapabilityKind::ALL {
        for provided in CapabilityKind::ALL {
            let adapted = matches!(
                (requested, provided),
                (CapabilityKind::Input, CapabilityKind::FileInput)
                    | (CapabilityKind::Output, CapabilityKind::FileOutput)
            );
            assert_eq!(
                requested.accepts(provided),
                requested == provided || adapted,
                "{requested} accepting {provided}"
            );
        }
    }
}

#[test]
fn serde_uses_snake_case() {
    let encoded = serde_json::to_string(&CapabilityKind::FileOutput).expect("encode");
    assert_eq!(encoded, "\"file_output\"");
}
