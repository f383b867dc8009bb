mod common;

use serde_json::json;
use service_ppt::compiler::core::{Compiler, SYMBOLED_DIRECTORY};
use service_ppt::compiler::symbols::SymbolTable;
use service_ppt::dsl::builder::ServiceBuilder;
use service_ppt::error::ServiceError;
use service_ppt::runtime::engine::Prepared;
use service_ppt::runtime::monitor::RecordingMonitor;
use std::collections::BTreeMap;
use std::sync::Arc;

#[test]
fn test_compile_linear_service() {
    // 1. Build DSL
    let service = ServiceBuilder::new()
        .open_file("open", "$(TEMPLATES)/service.pptx")
        .command("InsertSlides", "hymns")
            .param("filelist", json!(["$(SONGS)/a.pptx", "/elsewhere/b.pptx"]))
            .build()
        .command("ExportSlides", "images")
            .param("out_dirname", "$(OUTPUT)/images")
            .param("image_type", "$(OUTPUT)")
            .build()
        .build();

    // 2. Compile with config symbols
    let mut entries = BTreeMap::new();
    entries.insert("TEMPLATES".to_string(), "/church/templates".to_string());
    entries.insert("SONGS".to_string(), "/church/songs".to_string());
    entries.insert("OUTPUT".to_string(), "/church/out".to_string());
    let plan = Compiler::new(SymbolTable::new(entries)).compile(&service);

    // 3. Assert plan structure
    assert_eq!(plan.len(), 3);
    let indices: Vec<usize> = plan.steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);

    assert_eq!(plan.steps[0].data["filename"], json!("/church/templates/service.pptx"));
    assert_eq!(
        plan.steps[1].data["filelist"],
        json!(["/church/songs/a.pptx", "/elsewhere/b.pptx"])
    );
    assert_eq!(plan.steps[2].data["out_dirname"], json!("/church/out/images"));
    // only path fields are expanded
    assert_eq!(plan.steps[2].data["image_type"], json!("$(OUTPUT)"));
}

#[test]
fn test_symboled_directory_overrides_config() {
    let service = ServiceBuilder::new()
        .command(SYMBOLED_DIRECTORY, "dirs")
            .param("TEMPLATES", "/override")
            .build()
        .open_file("open", "$(TEMPLATES)/service.pptx")
        .build();

    let mut config = SymbolTable::default();
    config.insert("TEMPLATES", "/church/templates");
    let plan = Compiler::new(config).compile(&service);

    assert_eq!(plan.steps[1].data["filename"], json!("/override/service.pptx"));
    assert_eq!(plan.symbols.get("TEMPLATES"), Some("/override"));
}

#[test]
fn test_prepare_marks_invalid_steps_in_place() {
    let service = ServiceBuilder::new()
        .new_presentation("open")
        .command("SaveFiles", "no filename")
            .build()
        .command("NoSuchCommand", "unknown")
            .build()
        .command("GenerateBibleVerse", "skipped")
            .disabled()
            .build()
        .popup("check", "Look at the slides")
        .build();

    let engine = common::pptx_engine(Arc::new(RecordingMonitor::new()));
    let prepared = engine.prepare(&service);
    assert_eq!(prepared.len(), 5);

    assert!(matches!(prepared[0].prepared, Prepared::Ready(_)));
    assert!(matches!(
        prepared[1].prepared,
        Prepared::Invalid(ServiceError::Validation(_))
    ));
    match &prepared[2].prepared {
        Prepared::Invalid(ServiceError::Validation(msg)) => assert!(msg.contains("NoSuchCommand")),
        _ => panic!("unknown type should be invalid"),
    }
    // disabled records are not validated at all
    assert!(matches!(prepared[3].prepared, Prepared::Disabled));
    assert!(matches!(prepared[4].prepared, Prepared::Ready(_)));
    assert_eq!(prepared[4].step.index, 4);
}
