//! # Manifest Parsing Unit Tests / 清单解析单元测试

use fleet_runner::core::manifest::{ManifestParseError, parse_manifest};

#[test]
fn test_parse_full_manifest() {
    let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<module name="Core">
    <depends>
        <module name="Env" />
        <submodule name="Core/_private" />
        <module name="Types" />
    </depends>
    <unit_test browser="true" />
</module>"#;

    let manifest = parse_manifest(xml).unwrap();

    assert_eq!(manifest.name, "Core");
    // Module-type and submodule-type dependencies share one ordered list.
    assert_eq!(manifest.dependencies, vec!["Env", "Core/_private", "Types"]);
    assert!(manifest.has_unit_tests);
    assert!(manifest.test_in_browser);
}

#[test]
fn test_parse_minimal_manifest() {
    let manifest = parse_manifest(r#"<module name="Theme" />"#).unwrap();

    assert_eq!(manifest.name, "Theme");
    assert!(manifest.dependencies.is_empty());
    assert!(!manifest.has_unit_tests);
    assert!(!manifest.test_in_browser);
}

#[test]
fn test_unit_test_without_browser_attribute() {
    let xml = r#"<module name="Shop"><unit_test /></module>"#;

    let manifest = parse_manifest(xml).unwrap();

    assert!(manifest.has_unit_tests);
    assert!(!manifest.test_in_browser);
}

#[test]
fn test_unknown_sections_are_skipped() {
    let xml = r#"<module name="Shop">
    <description>storefront</description>
    <resources>
        <file path="a.css" />
    </resources>
    <depends>
        <module name="Core" />
    </depends>
</module>"#;

    let manifest = parse_manifest(xml).unwrap();

    assert_eq!(manifest.dependencies, vec!["Core"]);
}

#[test]
fn test_module_elements_outside_depends_are_not_dependencies() {
    let xml = r#"<module name="Shop">
    <bundle>
        <module name="NotADependency" />
    </bundle>
</module>"#;

    let manifest = parse_manifest(xml).unwrap();

    assert!(manifest.dependencies.is_empty());
}

#[test]
fn test_missing_root_name_fails() {
    let result = parse_manifest(r#"<module><unit_test /></module>"#);

    assert!(matches!(result, Err(ManifestParseError::MissingName(_))));
}

#[test]
fn test_missing_dependency_name_fails() {
    let xml = r#"<module name="Shop"><depends><module /></depends></module>"#;

    let result = parse_manifest(xml);

    assert!(matches!(result, Err(ManifestParseError::MissingName(_))));
}

#[test]
fn test_unexpected_root_fails() {
    let result = parse_manifest(r#"<service name="Shop" />"#);

    assert!(matches!(result, Err(ManifestParseError::UnexpectedRoot(_))));
}

#[test]
fn test_empty_document_fails() {
    assert!(matches!(parse_manifest(""), Err(ManifestParseError::Empty)));
}

#[test]
fn test_malformed_xml_fails() {
    let result = parse_manifest(r#"<module name="Shop"><depends></module>"#);

    assert!(matches!(result, Err(ManifestParseError::Xml(_))));
}
