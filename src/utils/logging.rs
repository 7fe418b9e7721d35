use chrono::Local;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Plain-text transcript of a chat session.
pub struct LoggingState {
    file_path: Option<PathBuf>,
}

impl LoggingState {
    /// Start logging to `log_file` if one was given; the file must be writable.
    pub fn new(log_file: Option<PathBuf>) -> Result<Self, std::io::Error> {
        if let Some(path) = &log_file {
            Self::test_file_access(path)?;
        }
        Ok(LoggingState {
            file_path: log_file,
        })
    }

    pub fn is_active(&self) -> bool {
        self.file_path.is_some()
    }

    pub fn log_user(&self, text: &str) -> Result<(), std::io::Error> {
        self.log_entry("user", text)
    }

    pub fn log_reply(&self, text: &str) -> Result<(), std::io::Error> {
        self.log_entry("assistant", text)
    }

    fn log_entry(&self, speaker: &str, content: &str) -> Result<(), std::io::Error> {
        let Some(file_path) = self.file_path.as_ref() else {
            return Ok(());
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::new(file);

        writeln!(
            writer,
            "## {} {speaker}",
            Local::now().format(TIMESTAMP_FORMAT)
        )?;
        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        // Blank line between entries
        writeln!(writer)?;

        writer.flush()
    }

    pub fn get_status_string(&self) -> String {
        match &self.file_path {
            None => "disabled".to_string(),
            Some(path) => format!(
                "active ({})",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
        }
    }

    fn test_file_access(path: &Path) -> Result<(), std::io::Error> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.flush()
    }
}
