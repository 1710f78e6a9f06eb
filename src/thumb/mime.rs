//! Content-type resolution.
//!
//! The file extension is consulted first. When it says nothing useful
//! (unknown, or the generic `application/octet-stream`) the first 512 bytes
//! of the file are matched against a table of magic-byte signatures.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Number of leading bytes inspected when sniffing.
pub const SNIFF_LEN: usize = 512;

/// A run of bytes expected at a fixed offset.
struct Signature {
    parts: &'static [(usize, &'static [u8])],
    mime: &'static str,
}

impl Signature {
    fn matches(&self, buf: &[u8]) -> bool {
        self.parts.iter().all(|(offset, bytes)| {
            buf.get(*offset..offset + bytes.len())
                .is_some_and(|window| window == *bytes)
        })
    }
}

/// Ordered most specific first.
#[rustfmt::skip]
const SIGNATURES: &[Signature] = &[
    Signature { parts: &[(0, b"\xFF\xD8\xFF")], mime: "image/jpeg" },
    Signature { parts: &[(0, b"\x89PNG\r\n\x1A\n")], mime: "image/png" },
    Signature { parts: &[(0, b"GIF87a")], mime: "image/gif" },
    Signature { parts: &[(0, b"GIF89a")], mime: "image/gif" },
    Signature { parts: &[(0, b"RIFF"), (8, b"WEBP")], mime: "image/webp" },
    Signature { parts: &[(0, b"II*\0")], mime: "image/tiff" },
    Signature { parts: &[(0, b"MM\0*")], mime: "image/tiff" },
    Signature { parts: &[(0, b"BM")], mime: "image/bmp" },
    Signature { parts: &[(0, b"%PDF-")], mime: "application/pdf" },
    Signature { parts: &[(0, b"%!PS")], mime: "application/postscript" },
    Signature { parts: &[(0, b"RIFF"), (8, b"AVI ")], mime: "video/x-msvideo" },
    Signature { parts: &[(4, b"ftypqt  ")], mime: "video/quicktime" },
    Signature { parts: &[(4, b"ftyp3gp")], mime: "video/3gpp" },
    Signature { parts: &[(4, b"ftyp")], mime: "video/mp4" },
    Signature { parts: &[(0, b"\x1A\x45\xDF\xA3")], mime: "video/webm" },
    Signature { parts: &[(0, b"FLV\x01")], mime: "video/x-flv" },
    Signature { parts: &[(0, b"\x00\x00\x01\xBA")], mime: "video/mpeg" },
    Signature { parts: &[(0, b"\x00\x00\x01\xB3")], mime: "video/mpeg" },
    Signature { parts: &[(0, b"OggS")], mime: "application/ogg" },
    Signature { parts: &[(0, b"PK\x03\x04")], mime: "application/zip" },
];

/// Classify a buffer of leading file bytes.
pub fn sniff(buf: &[u8]) -> &'static str {
    let buf = &buf[..buf.len().min(SNIFF_LEN)];
    if let Some(signature) = SIGNATURES.iter().find(|s| s.matches(buf)) {
        return signature.mime;
    }
    if looks_like_svg(buf) {
        return "image/svg+xml";
    }
    if is_text(buf) {
        return "text/plain";
    }
    OCTET_STREAM
}

/// MIME type guessed from the extension alone, if it is informative.
pub fn from_extension(path: &Path) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .filter(|mime| mime != OCTET_STREAM)
}

/// Resolve the content type of the file at `path`, sniffing its content
/// when the extension is not informative.
pub fn resolve(path: &Path) -> io::Result<String> {
    if let Some(mime) = from_extension(path) {
        return Ok(mime);
    }
    let mut buf = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut buf)?;
    Ok(sniff(&buf).to_string())
}

fn looks_like_svg(buf: &[u8]) -> bool {
    let text = String::from_utf8_lossy(buf);
    let trimmed = text.trim_start();
    (trimmed.starts_with("<?xml") || trimmed.starts_with("<svg") || trimmed.starts_with("<!"))
        && text.contains("<svg")
}

fn is_text(buf: &[u8]) -> bool {
    !buf.is_empty()
        && std::str::from_utf8(buf).is_ok()
        && !buf
            .iter()
            .any(|b| b.is_ascii_control() && !b.is_ascii_whitespace())
}
