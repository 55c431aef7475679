//! Encoding of local files into request payloads.
//!
use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};

/// MIME type of an image or audio file, guessed from its extension.
pub fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// Read a file as plain base64.
pub fn read_base64(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

/// Read a file as a base64 data URL, the way browsers send captured frames.
pub fn read_data_url(path: &Path) -> Result<String> {
    Ok(format!(
        "data:{};base64,{}",
        mime_type(path),
        read_base64(path)?
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mime_type_from_extension() {
        assert_eq!(mime_type(Path::new("face.JPG")), "image/jpeg");
        assert_eq!(mime_type(Path::new("clip.wav")), "audio/wav");
        assert_eq!(mime_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_read_data_url() -> Result<()> {
        let path = std::env::temp_dir().join(format!("emotion_client_{}.png", std::process::id()));
        std::fs::write(&path, b"hello")?;

        let url = read_data_url(&path)?;
        std::fs::remove_file(&path)?;

        assert_eq!(url, "data:image/png;base64,aGVsbG8=");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(read_base64(Path::new("/nonexistent/face.png")).is_err());
    }
}
