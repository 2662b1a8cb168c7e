//! Tests for resolution order, diagnostics, mixins, and adapter wrapping.

use std::sync::{Arc, Mutex};

use embulk_spi::{DataSource, PluginType};
use mockall::mock;
use rstest::rstest;
use serde_json::json;

use super::*;
use crate::class_loader::{
    DelegationPolicy, HostClasses, Linker, PluginClassLoaderFactory, SymbolTable,
};
use crate::source::{EmbeddedArchives, InjectedSource, SelfContainedSource};
use crate::testing::noop_instance;

mock! {
    Source {}
    impl PluginSource for Source {
        fn name(&self) -> &'static str;
        fn resolve(
            &self,
            kind: CapabilityKind,
            plugin: &PluginType,
        ) -> Result<SourceResolution, PluginError>;
        fn clear(&self) -> Result<(), PluginError>;
    }
}

fn noop_class(name: &str, kind: CapabilityKind) -> Arc<PluginClass> {
    Arc::new(PluginClass::from_fn(name, kind, move || Ok(noop_instance(kind))))
}

fn source_named(name: &'static str) -> MockSource {
    let mut source = MockSource::new();
    source.expect_name().return_const(name);
    source
}

fn declining(name: &'static str, diagnostic: Option<&'static str>) -> MockSource {
    let mut source = source_named(name);
    source
        .expect_resolve()
        .once()
        .returning(move |_, _| Ok(SourceResolution::NotApplicable(diagnostic.map(str::to_owned))));
    source
}

fn finding(name: &'static str, class: Arc<PluginClass>) -> MockSource {
    let mut source = source_named(name);
    source
        .expect_resolve()
        .once()
        .returning(move |_, _| Ok(SourceResolution::Found(Arc::clone(&class))));
    source
}

// ---------------------------------------------------------------------------
// Source order
// ---------------------------------------------------------------------------

#[rstest]
fn later_source_answers_when_earlier_declines() {
    let manager = PluginManager::builder()
        .source(declining("first", None))
        .source(finding("second", noop_class("csv.Parser", CapabilityKind::Parser)))
        .build()
        .expect("manager");

    let instance = manager
        .resolve(CapabilityKind::Parser, &PluginType::named("csv"))
        .expect("resolved");

    assert_eq!(instance.kind(), CapabilityKind::Parser);
}

#[rstest]
fn first_match_wins_and_later_sources_are_not_consulted() {
    let mut later = source_named("later");
    later.expect_resolve().never();
    let manager = PluginManager::builder()
        .source(finding("early", noop_class("early.Parser", CapabilityKind::Parser)))
        .source(later)
        .build()
        .expect("manager");

    manager.parser(&PluginType::named("csv")).expect("resolved");
}

#[rstest]
fn sources_are_listed_in_consultation_order() {
    let manager = PluginManager::builder()
        .source(source_named("a"))
        .source(source_named("b"))
        .build()
        .expect("manager");

    assert_eq!(manager.sources().collect::<Vec<_>>(), ["a", "b"]);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[rstest]
fn not_found_concatenates_diagnostics_in_source_order() {
    let manager = PluginManager::builder()
        .source(declining("a", Some("no archive")))
        .source(declining("quiet", None))
        .source(declining("b", Some("no bundle")))
        .build()
        .expect("manager");

    let err = manager
        .resolve(CapabilityKind::Input, &PluginType::named("s3"))
        .expect_err("nothing matches");

    let PluginError::PluginNotFound {
        kind,
        plugin,
        diagnostics,
        causes,
    } = &err
    else {
        panic!("expected PluginNotFound, got {err}");
    };
    assert_eq!(*kind, CapabilityKind::Input);
    assert_eq!(plugin, "s3");
    assert_eq!(diagnostics, &["a: no archive", "b: no bundle"]);
    assert!(causes.is_empty());
    assert_eq!(
        err.to_string(),
        "input plugin 's3' not found:\n  - a: no archive\n  - b: no bundle"
    );
}

#[rstest]
fn class_load_failure_falls_through_and_is_recorded() {
    let mut broken = source_named("broken");
    broken
        .expect_resolve()
        .once()
        .returning(|_, _| Err(PluginError::class_load("s3.Input", "corrupt archive")));
    let manager = PluginManager::builder()
        .source(broken)
        .source(declining("b", Some("no bundle")))
        .build()
        .expect("manager");

    let err = manager
        .resolve(CapabilityKind::Input, &PluginType::named("s3"))
        .expect_err("nothing matches");

    let PluginError::PluginNotFound {
        diagnostics,
        causes,
        ..
    } = err
    else {
        panic!("expected PluginNotFound");
    };
    assert_eq!(causes.len(), 1);
    assert!(matches!(
        causes.first(),
        Some(PluginError::ClassLoadFailure { class, .. }) if class == "s3.Input"
    ));
    assert_eq!(diagnostics.len(), 2);
}

#[rstest]
fn class_load_failure_before_a_match_is_ignored() {
    let mut broken = source_named("broken");
    broken
        .expect_resolve()
        .once()
        .returning(|_, _| Err(PluginError::class_load("s3.Input", "corrupt archive")));
    let manager = PluginManager::builder()
        .source(broken)
        .source(finding("good", noop_class("s3.Input", CapabilityKind::Input)))
        .build()
        .expect("manager");

    manager.input(&PluginType::named("s3")).expect("resolved");
}

#[rstest]
fn corrupt_embedded_archive_falls_through_to_later_sources() {
    let linker: Arc<dyn Linker> = Arc::new(SymbolTable::new());
    let loaders = Arc::new(PluginClassLoaderFactory::new(
        Arc::new(HostClasses::new()),
        DelegationPolicy::new(),
        linker,
    ));
    let embedded = SelfContainedSource::new(
        "embulk",
        EmbeddedArchives::new().with_bytes("embulk-parser-csv", b"not a zip".to_vec()),
        loaders,
    );
    let injected = InjectedSource::new().with_factory(CapabilityKind::Parser, "csv", || {
        Ok(noop_instance(CapabilityKind::Parser))
    });
    let manager = PluginManager::builder()
        .source(embedded)
        .source(injected)
        .build()
        .expect("manager");

    manager
        .parser(&PluginType::named("csv"))
        .expect("injected parser answers");

    let err = manager
        .resolve(CapabilityKind::Parser, &PluginType::named("tsv"))
        .expect_err("nothing provides tsv");
    assert!(matches!(err, PluginError::PluginNotFound { ref causes, .. } if causes.is_empty()));
}

#[rstest]
fn corrupt_embedded_archive_is_recorded_when_nothing_matches() {
    let linker: Arc<dyn Linker> = Arc::new(SymbolTable::new());
    let loaders = Arc::new(PluginClassLoaderFactory::new(
        Arc::new(HostClasses::new()),
        DelegationPolicy::new(),
        linker,
    ));
    let manager = PluginManager::builder()
        .source(SelfContainedSource::new(
            "embulk",
            EmbeddedArchives::new().with_bytes("embulk-parser-csv", b"not a zip".to_vec()),
            loaders,
        ))
        .source(declining("bundle", Some("no bundle")))
        .build()
        .expect("manager");

    let err = manager
        .resolve(CapabilityKind::Parser, &PluginType::named("csv"))
        .expect_err("nothing matches");

    let PluginError::PluginNotFound { causes, .. } = err else {
        panic!("expected PluginNotFound, got {err}");
    };
    assert!(matches!(
        causes.as_slice(),
        [PluginError::ClassLoadFailure { class, .. }] if class == "embulk-parser-csv"
    ));
}

#[rstest]
fn other_errors_stop_resolution() {
    let mut failing = source_named("failing");
    failing.expect_resolve().once().returning(|_, _| {
        Err(PluginError::AmbiguousOrMissingVersion {
            name: "org.embulk:s3".to_owned(),
            requested: Some("9.9".to_owned()),
            available: vec!["1.0".to_owned()],
        })
    });
    let mut later = source_named("later");
    later.expect_resolve().never();
    let manager = PluginManager::builder()
        .source(failing)
        .source(later)
        .build()
        .expect("manager");

    let err = manager
        .resolve(CapabilityKind::Input, &PluginType::named("s3"))
        .expect_err("aborts");

    assert!(matches!(err, PluginError::AmbiguousOrMissingVersion { .. }));
}

#[rstest]
#[case::parser_for_input(CapabilityKind::Input, CapabilityKind::Parser)]
#[case::file_input_for_output(CapabilityKind::Output, CapabilityKind::FileInput)]
#[case::input_for_file_input(CapabilityKind::FileInput, CapabilityKind::Input)]
fn mismatched_kind_is_rejected(
    #[case] requested: CapabilityKind,
    #[case] provided: CapabilityKind,
) {
    let manager = PluginManager::builder()
        .source(finding("only", noop_class("wrong.Kind", provided)))
        .build()
        .expect("manager");

    let err = manager
        .resolve(requested, &PluginType::named("x"))
        .expect_err("kind mismatch");

    assert!(matches!(
        err,
        PluginError::KindMismatch { requested: r, provided: p, .. } if r == requested && p == provided
    ));
}

// ---------------------------------------------------------------------------
// Mixins
// ---------------------------------------------------------------------------

#[rstest]
fn mixins_apply_once_each_in_declared_order() {
    let applied = Arc::new(Mutex::new(Vec::new()));
    let record = |label: &'static str| {
        let log = Arc::clone(&applied);
        move |instance: PluginInstance| {
            log.lock().expect("log").push(label);
            Ok::<_, PluginError>(instance)
        }
    };
    let class = PluginClass::from_fn("s3.Input", CapabilityKind::Input, || {
        Ok(noop_instance(CapabilityKind::Input))
    })
    .with_mixins(["retry", "metrics"]);
    let manager = PluginManager::builder()
        .source(finding("only", Arc::new(class)))
        .mixin("metrics", record("metrics"))
        .mixin("retry", record("retry"))
        .build()
        .expect("manager");

    manager.input(&PluginType::named("s3")).expect("resolved");

    assert_eq!(*applied.lock().expect("log"), ["retry", "metrics"]);
}

#[rstest]
fn undeclared_mixin_is_reported_before_decorating() {
    let applied = Arc::new(Mutex::new(0_usize));
    let counter = Arc::clone(&applied);
    let class = PluginClass::from_fn("s3.Input", CapabilityKind::Input, || {
        Ok(noop_instance(CapabilityKind::Input))
    })
    .with_mixins(["retry", "missing"]);
    let manager = PluginManager::builder()
        .source(finding("only", Arc::new(class)))
        .mixin("retry", move |instance: PluginInstance| {
            *counter.lock().expect("counter") += 1;
            Ok::<_, PluginError>(instance)
        })
        .build()
        .expect("manager");

    let err = manager
        .input(&PluginType::named("s3"))
        .err()
        .expect("missing mixin");

    assert!(matches!(
        err,
        PluginError::MixinNotFound { ref mixin, .. } if mixin == "missing"
    ));
    assert_eq!(*applied.lock().expect("counter"), 0);
}

#[rstest]
fn duplicate_mixin_names_conflict() {
    let identity = |instance: PluginInstance| Ok::<_, PluginError>(instance);
    let err = PluginManager::builder()
        .mixin("retry", identity)
        .mixin("retry", identity)
        .build()
        .expect_err("duplicate mixin");

    assert!(matches!(err, PluginError::ConfigurationConflict { .. }));
}

// ---------------------------------------------------------------------------
// File adapters
// ---------------------------------------------------------------------------

#[rstest]
#[case::input(CapabilityKind::Input, CapabilityKind::FileInput)]
#[case::output(CapabilityKind::Output, CapabilityKind::FileOutput)]
fn file_plugins_are_wrapped_for_record_requests(
    #[case] requested: CapabilityKind,
    #[case] provided: CapabilityKind,
) {
    let source = InjectedSource::new()
        .with_factory(provided, "local", move || Ok(noop_instance(provided)));
    let manager = PluginManager::builder()
        .source(source)
        .build()
        .expect("manager");

    let instance = manager
        .resolve(requested, &PluginType::named("local"))
        .expect("resolved");

    assert_eq!(instance.kind(), requested);
}

#[rstest]
fn file_plugins_stay_unwrapped_for_file_requests() {
    let source = InjectedSource::new().with_factory(CapabilityKind::FileInput, "local", || {
        Ok(noop_instance(CapabilityKind::FileInput))
    });
    let manager = PluginManager::builder()
        .source(source)
        .build()
        .expect("manager");

    manager
        .file_input(&PluginType::named("local"))
        .expect("file input");
}

// ---------------------------------------------------------------------------
// Configuration and lifecycle
// ---------------------------------------------------------------------------

#[rstest]
fn configured_type_selects_the_plugin() {
    let source = InjectedSource::new().with_factory(CapabilityKind::Decoder, "gzip", || {
        Ok(noop_instance(CapabilityKind::Decoder))
    });
    let manager = PluginManager::builder()
        .source(source)
        .build()
        .expect("manager");
    let config = DataSource::from_value(json!({"type": "gzip", "level": 9})).expect("config");

    let instance = manager
        .resolve_configured(CapabilityKind::Decoder, &config)
        .expect("resolved");

    assert_eq!(instance.kind(), CapabilityKind::Decoder);
}

#[rstest]
fn configuration_without_type_is_rejected() {
    let manager = PluginManager::builder().build().expect("manager");
    let config = DataSource::from_value(json!({"level": 9})).expect("config");

    let err = manager
        .resolve_configured(CapabilityKind::Decoder, &config)
        .expect_err("missing type");

    assert!(matches!(
        err,
        PluginError::Config(ConfigError::MissingKey { ref key }) if key == TYPE_KEY
    ));
}

#[rstest]
fn shutdown_clears_every_source_and_reports_the_first_failure() {
    let mut failing = source_named("failing");
    failing.expect_clear().once().returning(|| {
        Err(PluginError::LockPoisoned {
            resource: "plugin class cache",
        })
    });
    let mut healthy = source_named("healthy");
    healthy.expect_clear().once().returning(|| Ok(()));
    let manager = PluginManager::builder()
        .source(failing)
        .source(healthy)
        .build()
        .expect("manager");

    let err = manager.shutdown().expect_err("first failure");

    assert!(matches!(err, PluginError::LockPoisoned { .. }));
}
