//! Unit tests for class loading.

use std::fs;
use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;
use crate::testing::{ArchiveBuilder, noop_instance};

const CSV_CLASS: &str = "org.example.parser.CsvParserPlugin";
const SHARED_CLASS: &str = "org.embulk.spi.SharedPlugin";

fn parser_entry(class: &str, symbol: &str) -> PluginEntry {
    PluginEntry::new(CapabilityKind::Parser, "csv", class, symbol)
}

fn host_class(name: &str) -> PluginClass {
    PluginClass::from_fn(name, CapabilityKind::Parser, || {
        Ok(noop_instance(CapabilityKind::Parser))
    })
}

#[fixture]
fn symbols() -> Arc<SymbolTable> {
    Arc::new(
        SymbolTable::new()
            .with_symbol("csv", || Ok(noop_instance(CapabilityKind::Parser)))
            .with_symbol("shared", || Ok(noop_instance(CapabilityKind::Parser))),
    )
}

#[fixture]
fn archive() -> Arc<PluginArchive> {
    let built = ArchiveBuilder::new("embulk-parser-csv")
        .plugin(parser_entry(CSV_CLASS, "csv").with_mixin("retry"))
        .plugin(parser_entry(SHARED_CLASS, "shared"))
        .resource("META-INF/embulk/plugin.properties", b"child".to_vec())
        .resource("templates/header.txt", b"child header".to_vec())
        .build()
        .expect("archive");
    Arc::new(built)
}

fn host() -> Arc<HostClasses> {
    Arc::new(
        HostClasses::new()
            .with_class(host_class(CSV_CLASS))
            .with_class(host_class(SHARED_CLASS))
            .with_class(host_class("org.embulk.spi.HostOnly"))
            .with_resource("META-INF/embulk/plugin.properties", b"host".to_vec())
            .with_resource("templates/header.txt", b"host header".to_vec()),
    )
}

fn loader(
    archive: Arc<PluginArchive>,
    symbols: Arc<SymbolTable>,
    policy: DelegationPolicy,
) -> (Arc<HostClasses>, Arc<PluginClassLoader>) {
    let parent = host();
    let factory = PluginClassLoaderFactory::new(parent.clone(), policy, symbols);
    let created = factory.create(vec![archive]).expect("create loader");
    (parent, created)
}

fn spi_policy() -> DelegationPolicy {
    DelegationPolicy::new()
        .with_parent_first_package("org.embulk.spi")
        .with_parent_first_resource("META-INF/embulk/")
}

// ---------------------------------------------------------------------------
// Delegation
// ---------------------------------------------------------------------------

#[rstest]
fn archive_classes_shadow_the_host(archive: Arc<PluginArchive>, symbols: Arc<SymbolTable>) {
    let (parent, loader) = loader(archive, symbols, spi_policy());
    let host_csv = parent.find_class(CSV_CLASS).expect("host class");

    let loaded = loader.load_class(CSV_CLASS).expect("load");

    assert!(!Arc::ptr_eq(&loaded, &host_csv));
    assert_eq!(loaded.mixins(), ["retry".to_owned()]);
}

#[rstest]
fn parent_first_packages_prefer_the_host(
    archive: Arc<PluginArchive>,
    symbols: Arc<SymbolTable>,
) {
    let (parent, loader) = loader(archive, Arc::clone(&symbols), spi_policy());
    let host_shared = parent.find_class(SHARED_CLASS).expect("host class");

    let loaded = loader.load_class(SHARED_CLASS).expect("load");

    assert!(Arc::ptr_eq(&loaded, &host_shared));
    assert_eq!(symbols.link_count(), 0);
}

#[rstest]
fn parent_first_falls_back_to_the_archive(symbols: Arc<SymbolTable>) {
    let only_child = Arc::new(
        ArchiveBuilder::new("embulk-parser-extra")
            .plugin(parser_entry("org.embulk.spi.ChildOnly", "csv"))
            .build()
            .expect("archive"),
    );
    let (_, loader) = loader(only_child, symbols, spi_policy());

    let loaded = loader.load_class("org.embulk.spi.ChildOnly").expect("load");
    assert_eq!(loaded.name(), "org.embulk.spi.ChildOnly");
}

#[rstest]
fn child_first_falls_back_to_the_host(archive: Arc<PluginArchive>, symbols: Arc<SymbolTable>) {
    let (_, loader) = loader(archive, symbols, DelegationPolicy::new());
    let loaded = loader.load_class("org.embulk.spi.HostOnly").expect("load");
    assert_eq!(loaded.name(), "org.embulk.spi.HostOnly");
}

#[rstest]
#[case::exact("org.embulk.spi", true)]
#[case::subpackage("org.embulk.spi.Column", true)]
#[case::sibling_prefix("org.embulk.spix.Column", false)]
#[case::unrelated("com.example.Plugin", false)]
fn package_prefixes_match_whole_segments(#[case] class: &str, #[case] parent_first: bool) {
    assert_eq!(spi_policy().is_parent_first_class(class), parent_first);
}

#[rstest]
fn unknown_classes_fail_to_load(archive: Arc<PluginArchive>, symbols: Arc<SymbolTable>) {
    let (_, loader) = loader(archive, symbols, spi_policy());
    let err = loader.load_class("org.example.Missing").expect_err("missing");
    assert!(err.allows_fallthrough(), "got: {err}");
}

#[rstest]
fn resources_follow_the_delegation_policy(
    archive: Arc<PluginArchive>,
    symbols: Arc<SymbolTable>,
) {
    let (_, loader) = loader(archive, symbols, spi_policy());

    let parent_first = loader
        .find_resource("META-INF/embulk/plugin.properties")
        .expect("read");
    let child_first = loader.find_resource("templates/header.txt").expect("read");

    assert_eq!(parent_first.as_deref(), Some(b"host".as_slice()));
    assert_eq!(child_first.as_deref(), Some(b"child header".as_slice()));
    assert_eq!(loader.find_resource("absent.txt").expect("read"), None);
}

// ---------------------------------------------------------------------------
// Idempotent definition
// ---------------------------------------------------------------------------

#[rstest]
fn classes_are_defined_once(archive: Arc<PluginArchive>, symbols: Arc<SymbolTable>) {
    let (_, loader) = loader(archive, Arc::clone(&symbols), spi_policy());

    let first = loader.load_class(CSV_CLASS).expect("first");
    let second = loader.load_class(CSV_CLASS).expect("second");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(symbols.link_count(), 1);
    assert_eq!(loader.defined_count().expect("count"), 1);
}

#[rstest]
fn concurrent_loads_link_once(archive: Arc<PluginArchive>, symbols: Arc<SymbolTable>) {
    let (_, loader) = loader(archive, Arc::clone(&symbols), spi_policy());

    let loaded: Vec<Arc<PluginClass>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| loader.load_class(CSV_CLASS).expect("load")))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect()
    });

    assert_eq!(symbols.link_count(), 1);
    assert!(loaded.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[rstest]
fn instances_must_match_the_declared_kind() {
    let class = PluginClass::from_fn("org.example.Liar", CapabilityKind::Parser, || {
        Ok(noop_instance(CapabilityKind::Formatter))
    });
    let err = class.instantiate().expect_err("kind mismatch");
    assert!(err.to_string().contains("formatter"), "got: {err}");
}

// ---------------------------------------------------------------------------
// Factory retention
// ---------------------------------------------------------------------------

#[rstest]
fn hold_mode_keeps_loaders_until_released(archive: Arc<PluginArchive>) {
    let factory = PluginClassLoaderFactory::new(
        host(),
        DelegationPolicy::new(),
        Arc::new(SymbolTable::new()),
    );
    let first = factory.create(vec![Arc::clone(&archive)]).expect("create");
    let second = factory.create(vec![archive]).expect("create");

    assert_ne!(first.id(), second.id());
    assert_eq!(factory.held_count().expect("count"), 2);
    assert_eq!(factory.release_all().expect("release"), 2);
    assert_eq!(factory.held_count().expect("count"), 0);
}

#[rstest]
fn release_mode_holds_nothing(archive: Arc<PluginArchive>) {
    let factory = PluginClassLoaderFactory::new(
        host(),
        DelegationPolicy::new(),
        Arc::new(SymbolTable::new()),
    )
    .with_retention(RetentionMode::Release);
    let created = factory.create(vec![archive]).expect("create");

    assert_eq!(factory.held_count().expect("count"), 0);
    assert_eq!(Arc::strong_count(&created), 1);
}

// ---------------------------------------------------------------------------
// Archives
// ---------------------------------------------------------------------------

#[test]
fn directory_archives_are_readable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = ArchiveManifest::new("embulk-input-s3")
        .with_version("1.2.0")
        .with_plugin(PluginEntry::new(
            CapabilityKind::Input,
            "s3",
            "org.example.S3Input",
            "s3",
        ));
    fs::write(
        dir.path().join(MANIFEST_PATH),
        serde_json::to_vec(&manifest).expect("encode"),
    )
    .expect("write manifest");

    let opened = PluginArchive::open(dir.path()).expect("open");

    assert_eq!(opened.manifest(), &manifest);
    assert_eq!(opened.entries_for(CapabilityKind::FileInput, "s3").count(), 1);
}

#[test]
fn zip_archives_round_trip_through_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = ArchiveBuilder::new("embulk-output-stdout")
        .version("0.3.1")
        .plugin(PluginEntry::new(
            CapabilityKind::Output,
            "stdout",
            "org.example.Stdout",
            "stdout",
        ))
        .write_to(dir.path())
        .expect("write");

    let opened = PluginArchive::open(&path).expect("open");
    assert_eq!(opened.manifest().version(), Some("0.3.1"));
    assert!(opened.entry_for_class("org.example.Stdout").is_some());
}

#[rstest]
fn resource_paths_cannot_escape(archive: Arc<PluginArchive>) {
    let err = archive.resource("../secrets").expect_err("escape");
    assert!(err.to_string().contains("escapes"), "got: {err}");
}

#[test]
fn archives_without_manifest_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = PluginArchive::open(dir.path()).expect_err("no manifest");
    assert!(err.to_string().contains(MANIFEST_PATH), "got: {err}");
}

#[test]
fn non_zip_files_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.zip");
    fs::write(&path, b"definitely not a zip").expect("write");
    let err = PluginArchive::open(&path).expect_err("not a zip");
    assert!(matches!(err, PluginError::Archive { .. }), "got: {err}");
}

#[test]
fn duplicate_classes_are_rejected() {
    let manifest = ArchiveManifest::new("embulk-parser-csv")
        .with_plugin(parser_entry(CSV_CLASS, "a"))
        .with_plugin(parser_entry(CSV_CLASS, "b"));
    let err = manifest.validate().expect_err("duplicate");
    assert!(err.to_string().contains("twice"), "got: {err}");
}
