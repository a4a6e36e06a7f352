//! Text recognition for receipt photos through an external OCR program.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use crate::Error;

/// The placeholder replaced with the image path in OCR command lines.
pub const IMAGE_PLACEHOLDER: &str = "{image}";

/// The OCR command used when none is configured.
pub const DEFAULT_OCR_COMMAND: &str = "tesseract {image} stdout -l chi_sim+eng";

/// Something that can read the text in an image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Return the text found in the image at `image_path`.
    async fn extract_text(&self, image_path: &Path) -> Result<String, Error>;
}

/// Runs an OCR program and reads the recognised text from its stdout.
#[derive(Debug, Clone)]
pub struct CommandOcr {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandOcr {
    /// Parse a whitespace separated command line such as [DEFAULT_OCR_COMMAND].
    ///
    /// Every [IMAGE_PLACEHOLDER] argument is replaced with the image path. If
    /// there is no placeholder the path is passed as the last argument.
    ///
    /// # Errors
    /// Returns an [Error::OcrError] if `command_line` is empty.
    pub fn from_command_line(command_line: &str, timeout: Duration) -> Result<Self, Error> {
        let mut words = command_line.split_whitespace().map(str::to_owned);
        let program = words
            .next()
            .ok_or_else(|| Error::OcrError("the OCR command is empty".to_owned()))?;
        let mut args: Vec<String> = words.collect();

        if !args.iter().any(|arg| arg.contains(IMAGE_PLACEHOLDER)) {
            args.push(IMAGE_PLACEHOLDER.to_owned());
        }

        Ok(Self {
            program,
            args,
            timeout,
        })
    }
}

#[async_trait]
impl OcrEngine for CommandOcr {
    async fn extract_text(&self, image_path: &Path) -> Result<String, Error> {
        let image_path = image_path.to_string_lossy();
        let args = self
            .args
            .iter()
            .map(|arg| arg.replace(IMAGE_PLACEHOLDER, &image_path));

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::OcrError(format!("timed out after {:?}", self.timeout)))?
        .map_err(|error| Error::OcrError(format!("could not run {}: {error}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::OcrError(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::Error;

    use super::{CommandOcr, OcrEngine};

    #[test]
    fn appends_image_when_there_is_no_placeholder() {
        let ocr = CommandOcr::from_command_line("my-ocr --lang chi", Duration::from_secs(1))
            .unwrap();

        assert_eq!(ocr.program, "my-ocr");
        assert_eq!(ocr.args, ["--lang", "chi", "{image}"]);
    }

    #[test]
    fn empty_command_is_an_error() {
        let result = CommandOcr::from_command_line("   ", Duration::from_secs(1));

        assert!(matches!(result, Err(Error::OcrError(_))));
    }

    #[tokio::test]
    async fn returns_trimmed_stdout() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("receipt.txt");
        std::fs::write(&image, "\nTotal HKD 45.00\n\n").unwrap();
        let ocr = CommandOcr::from_command_line("cat {image}", Duration::from_secs(5)).unwrap();

        let text = ocr.extract_text(&image).await.unwrap();

        assert_eq!(text, "Total HKD 45.00");
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let dir = TempDir::new().unwrap();
        let ocr = CommandOcr::from_command_line("cat", Duration::from_secs(5)).unwrap();

        let result = ocr.extract_text(&dir.path().join("missing.jpg")).await;

        assert!(matches!(result, Err(Error::OcrError(_))));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let ocr = CommandOcr::from_command_line(
            "definitely-not-an-ocr-program {image}",
            Duration::from_secs(5),
        )
        .unwrap();

        let result = ocr.extract_text(std::path::Path::new("x.jpg")).await;

        assert!(matches!(result, Err(Error::OcrError(_))));
    }
}
