//! Utility functions
//!
use std::{fs::File, io::Cursor, path::Path};

use anyhow::{Context, Result};
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use reqwest::Client;

/// Standard base64 that accepts input with or without trailing padding.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a base64 payload, ignoring ASCII whitespace such as line breaks.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    BASE64.decode(compact).context("invalid base64 payload")
}

/// Drop a data URL header such as `data:image/png;base64,` from a payload.
pub fn strip_data_url(encoded: &str) -> &str {
    match encoded.split_once(',') {
        Some((_header, data)) => data,
        None => encoded,
    }
}

/// Download a file from a URL to a given filepath.
///
/// The content is written next to the target first and moved into place once complete.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let filepath = filepath.as_ref();
    let resp = client.get(url).send().await?.error_for_status()?;

    let partial = filepath.with_extension("part");
    let mut file = File::create(&partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;
    std::fs::rename(&partial, filepath)?;

    Ok(())
}
