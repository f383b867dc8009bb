use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::error::{Result, ServiceError};

/// 进度监视器
///
/// Receives progress and error reports from a run, and blocks the pipeline
/// on `acknowledge` until the user confirms a message.
#[async_trait]
pub trait Monitor: Send + Sync {
    fn progress(&self, percent: u8, message: &str);

    fn error(&self, message: &str);

    async fn acknowledge(&self, message: &str) -> Result<()>;
}

/// Writes reports to the log and reads acknowledgements from stdin.
#[derive(Debug, Default)]
pub struct LogMonitor {
    auto_acknowledge: bool,
}

impl LogMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never waits for input; for unattended runs.
    pub fn unattended() -> Self {
        Self {
            auto_acknowledge: true,
        }
    }
}

#[async_trait]
impl Monitor for LogMonitor {
    fn progress(&self, percent: u8, message: &str) {
        info!(percent, "{}", message);
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }

    async fn acknowledge(&self, message: &str) -> Result<()> {
        info!(prompt = message, "waiting for acknowledgement");
        if self.auto_acknowledge {
            return Ok(());
        }
        println!("{}", message);
        println!("Press Enter to continue...");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await {
            Ok(Some(_)) => Ok(()),
            // stdin closed: nobody is there to confirm
            Ok(None) => Err(ServiceError::Aborted),
            Err(e) => Err(ServiceError::io("<stdin>", e)),
        }
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    pub progress: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    pub acknowledged: Mutex<Vec<String>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Monitor for RecordingMonitor {
    fn progress(&self, _percent: u8, message: &str) {
        if let Ok(mut progress) = self.progress.lock() {
            progress.push(message.to_string());
        }
    }

    fn error(&self, message: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message.to_string());
        }
    }

    async fn acknowledge(&self, message: &str) -> Result<()> {
        if let Ok(mut acknowledged) = self.acknowledged.lock() {
            acknowledged.push(message.to_string());
        }
        Ok(())
    }
}
