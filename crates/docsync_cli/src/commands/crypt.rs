//! Encrypt and decrypt command implementation.

use docsync_document::{Document, DocumentTransform, PasswordCipher};
use std::path::Path;
use tracing::{info, warn};

/// Direction of the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Encrypt eligible fields and set `encrypted: true`.
    Encrypt,
    /// Decrypt eligible fields and set `encrypted: false`.
    Decrypt,
}

/// Runs the encrypt or decrypt command.
pub fn run(
    mode: Mode,
    input: &Path,
    password: &str,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(input)
        .map_err(|e| format!("cannot read {}: {e}", input.display()))?;
    let doc = Document::from_json(serde_json::from_str(&text)?)?;

    let result = transform(mode, doc, password)?;
    let rendered = serde_json::to_string_pretty(&result.to_json())?;

    match output {
        Some(path) => {
            std::fs::write(path, rendered + "\n")?;
            info!(path = %path.display(), ?mode, "document written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Applies `mode` to a parsed document.
///
/// Documents without an `encrypted` flag are treated as plaintext when
/// encrypting. Documents already in the target state pass through.
pub fn transform(
    mode: Mode,
    mut doc: Document,
    password: &str,
) -> Result<Document, Box<dyn std::error::Error>> {
    let transform = DocumentTransform::new(PasswordCipher::new());
    let out = match mode {
        Mode::Encrypt => {
            if doc.encrypted().is_none() {
                doc.set_encrypted(false);
            }
            if doc.encrypted() == Some(true) {
                warn!("document is already encrypted");
            }
            transform.seal(doc, Some(password))?
        }
        Mode::Decrypt => {
            if doc.encrypted() != Some(true) {
                warn!("document is not marked encrypted");
            }
            transform.open(doc, Some(password))?
        }
    };
    Ok(out)
}
