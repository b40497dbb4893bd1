//! Schema modification tests
//!
//! Drives the server root through its modify operations against real
//! schema files and checks what readers and the files see afterwards:
//! - A valid add is visible and persisted
//! - A rejected request leaves the catalog and the files untouched
//! - Superior chains stay acyclic across replacement
//! - Referenced elements cannot be removed until nothing references them
//! - Exclusive associations are enforced

mod common;

use common::{Fixture, ADMIN};
use dirschema::handler::ModifyRequest;
use dirschema::schema::{
    DefinitionDecoder, ElementKind, Modification, Rfc4512Decoder, SchemaError, SchemaErrorCode,
    USER_SCHEMA_FILE,
};
use dirschema::server::{SchemaServer, ServerError};

fn schema_error(err: ServerError) -> SchemaError {
    match err {
        ServerError::Schema(e) => e,
        other => panic!("expected a schema error, got {other}"),
    }
}

fn add(server: &SchemaServer, kind: ElementKind, definition: &str) -> Result<(), SchemaError> {
    server
        .add(ADMIN, kind, definition)
        .map(|_| ())
        .map_err(schema_error)
}

// =============================================================================
// Add
// =============================================================================

#[test]
fn test_add_then_lookup_returns_equal_element() {
    let fixture = Fixture::new();
    let server = fixture.open();
    let definition = "( 1.3.6.1.4.1.9.2.1 NAME ( 'nickName' 'nick' ) DESC 'short name' SUP name SINGLE-VALUE )";

    add(&server, ElementKind::AttributeType, definition).unwrap();

    let expected = Rfc4512Decoder::new()
        .decode(ElementKind::AttributeType, definition)
        .unwrap();
    let by_name = server.lookup(ElementKind::AttributeType, "NICK").unwrap();
    let by_oid = server
        .lookup(ElementKind::AttributeType, "1.3.6.1.4.1.9.2.1")
        .unwrap();
    assert_eq!(*by_name.element, expected);
    assert_eq!(by_name.id, by_oid.id);
    assert_eq!(by_name.schema_file, USER_SCHEMA_FILE);
}

#[test]
fn test_schema_file_outside_loader_view_rejected() {
    let fixture = Fixture::new();
    let server = fixture.open();
    let before = fixture.schema_files();

    for (oid, file) in [("1.9.80", "<builtin>"), ("1.9.81", "custom"), ("1.9.82", "../escaped.ldif")] {
        let definition = format!("( {} NAME 'misplacedAttr' SUP name X-SCHEMA-FILE '{}' )", oid, file);
        let err = add(&server, ElementKind::AttributeType, &definition).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::DsSchemaDecode, "{file}");
        assert!(server.lookup(ElementKind::AttributeType, oid).is_none());
    }

    assert_eq!(fixture.schema_files(), before);
    assert!(!fixture.root.path().join("escaped.ldif").exists());
}

#[test]
fn test_named_schema_file_survives_restart() {
    let fixture = Fixture::new();
    {
        let server = fixture.open();
        add(
            &server,
            ElementKind::AttributeType,
            "( 1.9.83 NAME 'placedAttr' SUP name X-SCHEMA-FILE '98-site.ldif' )",
        )
        .unwrap();
    }

    let server = fixture.open();
    let placed = server.lookup(ElementKind::AttributeType, "placedAttr").unwrap();
    assert_eq!(placed.schema_file, "98-site.ldif");
    assert!(server.remove(ADMIN, ElementKind::AttributeType, "placedAttr").is_ok());
}

#[test]
fn test_added_element_survives_restart() {
    let fixture = Fixture::new();
    {
        let server = fixture.open();
        add(
            &server,
            ElementKind::ObjectClass,
            "( 1.3.6.1.4.1.9.3.1 NAME 'account' SUP top STRUCTURAL MUST cn MAY description )",
        )
        .unwrap();
    }

    let text = fixture.read_schema_file(USER_SCHEMA_FILE).unwrap();
    assert!(text.starts_with("dn: cn=schema"));
    assert!(text.contains("'account'"));

    let server = fixture.open();
    let account = server.lookup(ElementKind::ObjectClass, "account").unwrap();
    assert_eq!(account.element.oid(), "1.3.6.1.4.1.9.3.1");
    assert!(server.offline_changes().is_empty());
}

#[test]
fn test_later_value_may_reference_earlier_value_in_same_request() {
    let fixture = Fixture::new();
    let server = fixture.open();
    let request = ModifyRequest::new(ADMIN)
        .with(Modification::add(
            ElementKind::AttributeType,
            "( 1.9.10 NAME 'employeeCode' SUP name )",
        ))
        .with(Modification::add(
            ElementKind::ObjectClass,
            "( 1.9.11 NAME 'employee' SUP person STRUCTURAL MUST employeeCode )",
        ));

    let outcome = server.modify(&request).unwrap();

    assert_eq!(outcome.changes, 2);
    assert_eq!(outcome.modified_files, vec![USER_SCHEMA_FILE.to_string()]);
    let dependents = server
        .repository()
        .dependents_of(ElementKind::AttributeType, "employeeCode");
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].0.name_or_oid(), "employee");
}

#[test]
fn test_undefined_superior_leaves_repository_unchanged() {
    let fixture = Fixture::new();
    let server = fixture.open();
    let generation = server.repository().generation();
    let files_before = fixture.schema_files();

    let err = add(
        &server,
        ElementKind::AttributeType,
        "( 1.9.20 NAME 'orphan' SUP doesNotExist )",
    )
    .unwrap_err();

    assert_eq!(err.code(), SchemaErrorCode::DsSchemaUndefinedReference);
    assert!(server.lookup(ElementKind::AttributeType, "orphan").is_none());
    assert_eq!(server.repository().generation(), generation);
    assert_eq!(fixture.schema_files(), files_before);
}

#[test]
fn test_name_collision_is_conflict() {
    let fixture = Fixture::new();
    let server = fixture.open();

    let err = add(&server, ElementKind::AttributeType, "( 1.9.21 NAME 'cn' SUP name )").unwrap_err();

    assert_eq!(err.code(), SchemaErrorCode::DsSchemaConflict);
    assert_eq!(
        server.lookup(ElementKind::AttributeType, "cn").unwrap().element.oid(),
        "2.5.4.3"
    );
}

// =============================================================================
// Superior Chains
// =============================================================================

#[test]
fn test_cycle_through_replacement_rejected() {
    let fixture = Fixture::new();
    let server = fixture.open();
    add(&server, ElementKind::ObjectClass, "( 1.9.30 NAME 'classA' SUP top AUXILIARY )").unwrap();
    add(&server, ElementKind::ObjectClass, "( 1.9.31 NAME 'classB' SUP classA AUXILIARY )").unwrap();
    add(&server, ElementKind::ObjectClass, "( 1.9.32 NAME 'classC' SUP classB AUXILIARY )").unwrap();

    let request = ModifyRequest::new(ADMIN)
        .with(Modification::delete(ElementKind::ObjectClass, "classA"))
        .with(Modification::add(
            ElementKind::ObjectClass,
            "( 1.9.30 NAME 'classA' SUP classC AUXILIARY )",
        ));
    let err = schema_error(server.modify(&request).unwrap_err());

    assert_eq!(err.code(), SchemaErrorCode::DsSchemaCircularReference);
    let a = server.lookup(ElementKind::ObjectClass, "classA").unwrap();
    assert_eq!(a.element.as_object_class().unwrap().superiors, vec!["top".to_string()]);
}

// =============================================================================
// Removal
// =============================================================================

#[test]
fn test_remove_referenced_attribute_after_redefining_dependent() {
    let fixture = Fixture::new();
    let server = fixture.open();

    let err = schema_error(server.remove(ADMIN, ElementKind::AttributeType, "cn").unwrap_err());
    assert_eq!(err.code(), SchemaErrorCode::DsSchemaDependentsExist);
    assert!(err.to_string().contains("person"));

    let redefine = ModifyRequest::new(ADMIN)
        .with(Modification::delete(
            ElementKind::ObjectClass,
            "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) MAY description )",
        ))
        .with(Modification::add(
            ElementKind::ObjectClass,
            "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST sn MAY description X-SCHEMA-FILE '00-core.ldif' )",
        ));
    let outcome = server.modify(&redefine).unwrap();
    assert_eq!(outcome.modified_files, vec!["00-core.ldif".to_string()]);

    server.remove(ADMIN, ElementKind::AttributeType, "cn").unwrap();

    assert!(server.lookup(ElementKind::AttributeType, "cn").is_none());
    let core = fixture.read_schema_file("00-core.ldif").unwrap();
    assert!(!core.contains("'cn'"));
    assert!(core.contains("'person'"));
}

#[test]
fn test_remove_unknown_element_is_not_found() {
    let fixture = Fixture::new();
    let server = fixture.open();
    let err = schema_error(
        server
            .remove(ADMIN, ElementKind::NameForm, "missingForm")
            .unwrap_err(),
    );
    assert_eq!(err.code(), SchemaErrorCode::DsSchemaNotFound);
}

// =============================================================================
// Exclusive Associations
// =============================================================================

#[test]
fn test_second_content_rule_for_class_rejected() {
    let fixture = Fixture::new();
    let server = fixture.open();
    add(
        &server,
        ElementKind::DitContentRule,
        "( 2.5.6.6 NAME 'personRule' AUX extensibleExtra )",
    )
    .unwrap();

    let err = add(&server, ElementKind::DitContentRule, "( 2.5.6.6 NAME 'otherPersonRule' )").unwrap_err();

    assert_eq!(err.code(), SchemaErrorCode::DsSchemaDuplicateAssociation);
    assert!(matches!(err, SchemaError::DuplicateAssociation { ref existing, .. } if existing == "personRule"));
    assert!(server.lookup(ElementKind::DitContentRule, "otherPersonRule").is_none());
}

#[test]
fn test_second_name_form_for_class_rejected() {
    let fixture = Fixture::new();
    let server = fixture.open();
    add(&server, ElementKind::NameForm, "( 1.9.40 NAME 'personNameForm' OC person MUST cn )").unwrap();

    let err = add(&server, ElementKind::NameForm, "( 1.9.41 NAME 'personSnForm' OC person MUST sn )").unwrap_err();

    assert_eq!(err.code(), SchemaErrorCode::DsSchemaDuplicateAssociation);
}

// =============================================================================
// Readers
// =============================================================================

#[test]
fn test_readers_never_see_partial_requests() {
    let fixture = Fixture::new();
    let server = fixture.open();

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut last = 0;
            for _ in 0..500 {
                let snapshot = server.snapshot();
                assert!(snapshot.generation() >= last);
                last = snapshot.generation();
                // Both halves of each request land in the same snapshot.
                for i in 0..10 {
                    let at = snapshot.lookup(ElementKind::AttributeType, &format!("pairAttr{i}"));
                    let oc = snapshot.lookup(ElementKind::ObjectClass, &format!("pairClass{i}"));
                    assert_eq!(at.is_some(), oc.is_some());
                }
            }
        });

        for i in 0..10 {
            let request = ModifyRequest::new(ADMIN)
                .with(Modification::add(
                    ElementKind::AttributeType,
                    format!("( 1.9.50.{i} NAME 'pairAttr{i}' SUP name )"),
                ))
                .with(Modification::add(
                    ElementKind::ObjectClass,
                    format!("( 1.9.51.{i} NAME 'pairClass{i}' SUP top AUXILIARY MAY pairAttr{i} )"),
                ));
            server.modify(&request).unwrap();
        }

        reader.join().unwrap();
    });

    assert!(server.lookup(ElementKind::ObjectClass, "pairClass9").is_some());
}
