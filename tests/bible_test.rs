mod common;

use serde_json::json;
use service_ppt::backend::Presentation;
use service_ppt::bible::JsonBibleSource;
use service_ppt::compiler::loader;
use service_ppt::dsl::builder::ServiceBuilder;
use service_ppt::dsl::{CommandRecord, ServiceDefinition};
use service_ppt::error::ServiceError;
use service_ppt::runtime::monitor::RecordingMonitor;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const ESV: &str = r#"{
  "name": "English Standard Version",
  "books": [
    { "name": "Genesis", "short_name": "Gen", "chapters": [
      { "no": 1, "verses": [
        { "no": 1, "text": "In the beginning, God created the heavens and the earth." },
        { "no": 2, "text": "The earth was without form and void." },
        { "no": 3, "text": "And God said, Let there be light." }
      ] }
    ] }
  ]
}"#;

const KOR: &str = r#"{
  "name": "Korean",
  "books": [
    { "name": "Genesis", "short_name": "창", "chapters": [
      { "no": 1, "verses": [
        { "no": 1, "text": "태초에 하나님이 천지를 창조하시니라" },
        { "no": 2, "text": "땅이 혼돈하고 공허하며" }
      ] }
    ] }
  ]
}"#;

const SIX_PLACEHOLDERS: [&str; 6] = [
    "{main_verse}",
    "{each_verse:%B}",
    "{each_verse:%b}",
    "{each_verse:%c}",
    "{each_verse:%v}",
    "{each_verse:%t}",
];

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn bible_dir(root: &Path) -> PathBuf {
    let dir = root.join("bibles");
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("ESV.json"), ESV).unwrap();
    fs::write(dir.join("KOR.json"), KOR).unwrap();
    dir
}

/// Title slide, one verse slide carrying every placeholder, closing slide.
async fn verse_deck(path: &Path) {
    let mut pres = common::pptx_backend().blank().unwrap();
    pres.add_text_slide(&["Scripture: {main_verse}"], Some("MK_bible_title"))
        .unwrap();
    pres.add_text_slide(&SIX_PLACEHOLDERS, Some("MK_bible_verse:repeat"))
        .unwrap();
    pres.add_text_slide(&["Amen"], None).unwrap();
    pres.save(path).await.unwrap();
}

fn sample_bible_record() -> CommandRecord {
    let sample = Path::new(env!("CARGO_MANIFEST_DIR")).join("sample/service.sdf");
    let service = loader::load_service(&sample).expect("sample definition should load");
    service
        .commands
        .into_iter()
        .find(|c| c.kind == "GenerateBibleVerse")
        .expect("sample has a GenerateBibleVerse command")
}

#[tokio::test]
async fn test_sample_definition_fills_every_placeholder() {
    let temp_dir = tempfile::tempdir().unwrap();
    let deck = temp_dir.path().join("service.pptx");
    let out = temp_dir.path().join("out.pptx");
    let verses = temp_dir.path().join("verses.txt");
    verse_deck(&deck).await;

    let record = sample_bible_record();
    assert_eq!(record.str_param("main_verses"), Some("Genesis 1:1"));
    assert_eq!(record.str_param("bible_version1"), Some("ESV"));

    let mut commands = ServiceBuilder::new().open_file("open", &path_str(&deck)).build().commands;
    commands.push(record);
    commands.extend(
        ServiceBuilder::new()
            .command("SaveFiles", "save")
                .param("filename", path_str(&out))
                .param("verses_filename", path_str(&verses))
                .build()
            .build()
            .commands,
    );
    let service = ServiceDefinition::new(commands);

    let mut engine = common::pptx_engine(Arc::new(RecordingMonitor::new()))
        .with_bible(Arc::new(JsonBibleSource::new(bible_dir(temp_dir.path()))));
    let report = engine.run(&service).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.errors);

    let texts = common::deck_texts(&out).await;
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[0], "Scripture: Genesis 1:1");
    assert_eq!(
        texts[1],
        "Genesis 1:1\nGenesis\nGen\n1\n1\nIn the beginning, God created the heavens and the earth."
    );
    assert!(!texts.iter().any(|t| t.contains('{')));

    let sheet = fs::read_to_string(&verses).unwrap();
    assert_eq!(
        sheet,
        "\u{feff}Genesis 1:1\n1 In the beginning, God created the heavens and the earth.\n"
    );
}

#[tokio::test]
async fn test_each_verse_repeats_the_slide_and_notes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let deck = temp_dir.path().join("service.pptx");
    let notes_in = temp_dir.path().join("notes.txt");
    let out = temp_dir.path().join("out.pptx");
    let notes_out = temp_dir.path().join("out.txt");
    verse_deck(&deck).await;
    fs::write(&notes_in, "Reading {main_verse}\n{each_verse:%v}. {each_verse:%t}\nPrayer\n").unwrap();

    let service = ServiceBuilder::new()
        .command("OpenFile", "open")
            .param("filename", path_str(&deck))
            .param("notes_filename", path_str(&notes_in))
            .build()
        .command("GenerateBibleVerse", "reading")
            .param("bible_version1", "ESV")
            .param("main_verse_name1", "main_verse")
            .param("each_verse_name1", "each_verse")
            .param("main_verses", "Genesis 1:1, 3")
            .param("additional_verses", "Gen 1:2")
            .param("repeat_range", "note.contains_text('MK_bible_verse:repeat')")
            .build()
        .command("SaveFiles", "save")
            .param("filename", path_str(&out))
            .param("notes_filename", path_str(&notes_out))
            .build()
        .build();

    let mut engine = common::pptx_engine(Arc::new(RecordingMonitor::new()))
        .with_bible(Arc::new(JsonBibleSource::new(bible_dir(temp_dir.path()))));
    let report = engine.run(&service).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.errors);

    // one verse slide per resolved verse, in reference order
    let texts = common::deck_texts(&out).await;
    assert_eq!(texts.len(), 5);
    let numbers: Vec<&str> = texts[1..4]
        .iter()
        .map(|t| t.lines().nth(4).unwrap())
        .collect();
    assert_eq!(numbers, vec!["1", "3", "2"]);
    assert_eq!(texts[4], "Amen");

    let notes = fs::read_to_string(&notes_out).unwrap();
    assert_eq!(
        notes,
        "Reading Genesis 1:1, 3\n\
         1. In the beginning, God created the heavens and the earth.\n\
         3. And God said, Let there be light.\n\
         2. The earth was without form and void.\n\
         Prayer\n"
    );
}

#[tokio::test]
async fn test_two_translations_pair_by_position() {
    let temp_dir = tempfile::tempdir().unwrap();
    let deck = temp_dir.path().join("service.pptx");
    let out = temp_dir.path().join("out.pptx");
    let mut pres = common::pptx_backend().blank().unwrap();
    pres.add_text_slide(&["{en:%v} {en:%t} / {ko:%b} {ko:%t}"], Some("MK_bible_verse:repeat"))
        .unwrap();
    pres.save(&deck).await.unwrap();

    let service = ServiceBuilder::new()
        .open_file("open", &path_str(&deck))
        .command("GenerateBibleVerse", "reading")
            .param("bible_version1", "ESV")
            .param("each_verse_name1", "en")
            .param("bible_version2", "KOR")
            .param("each_verse_name2", "ko")
            .param("main_verses", "Genesis 1:1-2")
            .param("repeat_range", "note.contains_text('MK_bible_verse')")
            .build()
        .save_files("save", &path_str(&out))
        .build();

    let mut engine = common::pptx_engine(Arc::new(RecordingMonitor::new()))
        .with_bible(Arc::new(JsonBibleSource::new(bible_dir(temp_dir.path()))));
    engine.run(&service).await.unwrap();

    assert_eq!(
        common::deck_texts(&out).await,
        vec![
            "1 In the beginning, God created the heavens and the earth. / 창 태초에 하나님이 천지를 창조하시니라",
            "2 The earth was without form and void. / 창 땅이 혼돈하고 공허하며",
        ]
    );
}

#[tokio::test]
async fn test_missing_verse_leaves_slides_untouched() {
    let temp_dir = tempfile::tempdir().unwrap();
    let deck = temp_dir.path().join("service.pptx");
    let out = temp_dir.path().join("out.pptx");
    verse_deck(&deck).await;

    let service = ServiceBuilder::new()
        .open_file("open", &path_str(&deck))
        .command("GenerateBibleVerse", "reading")
            .param("bible_version1", "ESV")
            .param("main_verse_name1", "main_verse")
            .param("each_verse_name1", "each_verse")
            .param("main_verses", "Exodus 20:1")
            .param("repeat_range", json!("note.contains_text('MK_bible_verse:repeat')"))
            .build()
        .save_files("save", &path_str(&out))
        .build();

    let mut engine = common::pptx_engine(Arc::new(RecordingMonitor::new()))
        .with_bible(Arc::new(JsonBibleSource::new(bible_dir(temp_dir.path()))));
    let report = engine.run(&service).await.unwrap();

    assert_eq!(report.executed, vec![0, 2]);
    assert!(matches!(
        &report.errors[0].source,
        ServiceError::VerseNotFound { reference, version } if reference == "Exodus 20:1" && version == "ESV"
    ));
    let texts = common::deck_texts(&out).await;
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[1], SIX_PLACEHOLDERS.join("\n"));
}

#[tokio::test]
async fn test_repeat_range_past_the_deck_is_a_data_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let deck = temp_dir.path().join("service.pptx");
    let out = temp_dir.path().join("out.pptx");
    verse_deck(&deck).await;

    let service = ServiceBuilder::new()
        .open_file("open", &path_str(&deck))
        .command("GenerateBibleVerse", "reading")
            .param("bible_version1", "ESV")
            .param("main_verse_name1", "main_verse")
            .param("each_verse_name1", "each_verse")
            .param("main_verses", "Genesis 1:1-2")
            .param("repeat_range", "[7]")
            .build()
        .save_files("save", &path_str(&out))
        .build();

    let mut engine = common::pptx_engine(Arc::new(RecordingMonitor::new()))
        .with_bible(Arc::new(JsonBibleSource::new(bible_dir(temp_dir.path()))));
    let report = engine.run(&service).await.unwrap();

    assert_eq!(report.executed, vec![0, 2]);
    assert_eq!(report.errors[0].index, 1);
    assert!(matches!(report.errors[0].source, ServiceError::Validation(_)));

    // nothing was substituted, not even the main verse
    let texts = common::deck_texts(&out).await;
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[0], "Scripture: {main_verse}");
    assert_eq!(texts[1], SIX_PLACEHOLDERS.join("\n"));
}
