#![allow(dead_code)]

use service_ppt::backend::Presentation;
use service_ppt::backend::pptx::PptxBackend;
use service_ppt::commands::register_standard_commands;
use service_ppt::runtime::engine::Engine;
use service_ppt::runtime::monitor::RecordingMonitor;
use std::path::Path;
use std::sync::Arc;

pub fn pptx_backend() -> PptxBackend {
    PptxBackend::new(320)
}

/// Writes a deck with one text box per slide; `notes` pairs up by index.
pub async fn write_deck(path: &Path, slides: &[(&str, Option<&str>)]) {
    let mut pres = pptx_backend().blank().unwrap();
    for (text, notes) in slides {
        pres.add_text_slide(&[text], *notes).unwrap();
    }
    pres.save(path).await.unwrap();
}

/// Every slide's text, one entry per slide.
pub async fn deck_texts(path: &Path) -> Vec<String> {
    let mut pres = pptx_backend().open_pptx(path).await.unwrap();
    let mut out = Vec::new();
    for i in 0..pres.slide_count().await.unwrap() {
        out.push(pres.slide_texts(i).await.unwrap().join("\n"));
    }
    out
}

pub fn pptx_engine(monitor: Arc<RecordingMonitor>) -> Engine {
    let mut engine = Engine::new(Arc::new(pptx_backend())).with_monitor(monitor);
    register_standard_commands(&mut engine);
    engine
}
