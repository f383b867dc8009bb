use serde_json::json;
use service_ppt::dsl::builder::ServiceBuilder;
use service_ppt::dsl::{CommandRecord, ServiceDefinition};

#[test]
fn test_build_linear_service() {
    let service = ServiceBuilder::new()
        .open_file("open", "template.pptx")
        .set_variables("info", &[("{pastor}", "Kim"), ("{sermon}", "Grace")])
        .command("InsertSlides", "hymns")
            .param("insert_location", "note.contains_text('MK_hymn')")
            .param("filelist", json!(["hymn1.pptx", "hymn2.pptx"]))
            .build()
        .save_files("save", "{service_date:%Y%m%d}.pptx")
        .build();

    assert_eq!(service.len(), 4);
    assert_eq!(service.enabled_count(), 4);

    let kinds: Vec<&str> = service.commands.iter().map(|c| c.kind.as_str()).collect();
    assert_eq!(kinds, vec!["OpenFile", "SetVariables", "InsertSlides", "SaveFiles"]);

    // 检查 SetVariables 命令
    let vars = &service.commands[1];
    assert_eq!(vars.data["str_dict"]["{pastor}"], json!("Kim"));
    assert_eq!(vars.data["format_dict"], json!({}));

    let insert = &service.commands[2];
    assert_eq!(insert.name, "hymns");
    assert_eq!(insert.data["filelist"][1], json!("hymn2.pptx"));
}

#[test]
fn test_disabled_commands_are_counted_separately() {
    let service = ServiceBuilder::new()
        .new_presentation("blank")
        .popup("check", "Look at the slides")
        .command("ExportSlides", "images")
            .param("out_dirname", "out")
            .disabled()
            .build()
        .build();

    assert_eq!(service.len(), 3);
    assert_eq!(service.enabled_count(), 2);
    assert_eq!(service.commands[0].str_param("filename"), Some(""));
    assert!(!service.commands[2].enabled);
}

#[test]
fn test_record_encoding() {
    let record: CommandRecord = serde_json::from_value(json!({
        "type": "PopupMessage",
        "data": { "message": "hi" }
    }))
    .unwrap();
    assert!(record.enabled);
    assert_eq!(record.name, "");

    let service = ServiceDefinition::new(vec![record]);
    let value = serde_json::to_value(&service).unwrap();
    assert_eq!(
        value,
        json!([{ "type": "PopupMessage", "name": "", "enabled": true, "data": { "message": "hi" } }])
    );
}
