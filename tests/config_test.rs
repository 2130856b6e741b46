// ==========================================
// Import settings against a provisioned store
// ==========================================


use molmod_importer::config::{config_keys, load_mapping, ConfigManager, ImportSettings};
use molmod_importer::importer::{ErrorKind, ImportError, ImportOptions, ImportOrchestrator};
use rusqlite::params;
use std::path::PathBuf;
use test_helpers::{create_test_db, mapping_path, Annotation, BundleBuilder};

#[test]
fn test_provisioned_store_without_settings_uses_defaults() {
    let (_dir, conn) = create_test_db();

    let settings = ImportSettings::resolve(&ConfigManager::new(&conn), None, None).unwrap();

    assert_eq!(settings, ImportSettings::default());
    assert_eq!(settings.batch_size, 1000);
}

#[test]
fn test_store_settings_drive_an_import() {
    let (_dir, mut conn) = create_test_db();
    conn.execute(
        "INSERT INTO config_kv (key, value) VALUES (?1, ?2), (?3, ?4)",
        params![
            config_keys::BATCH_SIZE,
            "2",
            config_keys::MAPPING_FILE,
            mapping_path().display().to_string()
        ],
    )
    .unwrap();

    let settings = ImportSettings::resolve(&ConfigManager::new(&conn), None, None).unwrap();
    assert_eq!(settings.batch_size, 2);
    assert_eq!(settings.mapping_file, mapping_path());

    let orchestrator = ImportOrchestrator::new(
        load_mapping(&settings.mapping_file).unwrap(),
        ImportOptions {
            batch_size: settings.batch_size,
            ..Default::default()
        },
    )
    .unwrap();
    let input = BundleBuilder::new("ds-1")
        .event("E1")
        .event("E2")
        .event("E3")
        .asv("A1", "ACGTACGTAA", &[1, 2, 3])
        .annotation(Annotation::new("A1", "16S rRNA", true))
        .build();

    let report = orchestrator.run_with_connection(&mut conn, input).unwrap();

    let occurrence = report.table("occurrence").unwrap();
    assert_eq!(occurrence.inserted, 3);
    assert_eq!(occurrence.statements, 2);
}

#[test]
fn test_bad_stored_mapping_path_is_configuration_error() {
    let (_dir, conn) = create_test_db();
    conn.execute(
        "INSERT INTO config_kv (key, value) VALUES (?1, ?2)",
        params![config_keys::MAPPING_FILE, "/nonexistent/mapping.json"],
    )
    .unwrap();

    let settings = ImportSettings::resolve(&ConfigManager::new(&conn), None, None).unwrap();
    assert_eq!(settings.mapping_file, PathBuf::from("/nonexistent/mapping.json"));

    let err = load_mapping(&settings.mapping_file).unwrap_err();
    assert!(matches!(err, ImportError::MappingFile { .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
