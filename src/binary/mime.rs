//! Mime allow-lists per attachment field.

use std::path::Path;

use super::AttachmentField;
use crate::error::{Error, Result};

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif", "image/heic"];

const DOCUMENT_TYPES: &[&str] = &[
  "application/pdf",
  "application/msword",
  "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
  "application/vnd.ms-excel",
  "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
  "application/vnd.ms-powerpoint",
  "application/vnd.openxmlformats-officedocument.presentationml.presentation",
  "text/plain",
  "text/csv",
];

pub fn allowed_types(field: AttachmentField) -> &'static [&'static str] {
  match field {
    AttachmentField::Images => IMAGE_TYPES,
    AttachmentField::SupportingDocs => DOCUMENT_TYPES,
  }
}

pub fn validate(field: AttachmentField, mime_type: &str) -> Result<()> {
  let normalized = mime_type.trim().to_lowercase();
  if allowed_types(field).contains(&normalized.as_str()) {
    Ok(())
  } else {
    Err(Error::UnsupportedMimeType {
      field: field.as_str().to_string(),
      mime: mime_type.to_string(),
    })
  }
}

/// Whether a thumbnail should be derived for this type
pub fn is_thumbnailable(mime_type: &str) -> bool {
  // heic has no decoder here; it is stored without a preview
  matches!(mime_type, "image/jpeg" | "image/png" | "image/webp" | "image/gif")
}

/// Guess a mime type from a file extension.
pub fn guess_from_path(path: &Path) -> Option<&'static str> {
  let ext = path.extension()?.to_str()?.to_lowercase();
  let mime = match ext.as_str() {
    "jpg" | "jpeg" => "image/jpeg",
    "png" => "image/png",
    "webp" => "image/webp",
    "gif" => "image/gif",
    "heic" => "image/heic",
    "pdf" => "application/pdf",
    "doc" => "application/msword",
    "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "xls" => "application/vnd.ms-excel",
    "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "ppt" => "application/vnd.ms-powerpoint",
    "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "txt" => "text/plain",
    "csv" => "text/csv",
    _ => return None,
  };
  Some(mime)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_allow_list_differs_by_field() {
    assert!(validate(AttachmentField::Images, "image/png").is_ok());
    assert!(validate(AttachmentField::Images, "IMAGE/JPEG").is_ok());
    assert!(validate(AttachmentField::Images, "application/pdf").is_err());
    assert!(validate(AttachmentField::SupportingDocs, "application/pdf").is_ok());
    assert!(validate(AttachmentField::SupportingDocs, "image/png").is_err());
  }

  #[test]
  fn test_guess_from_path() {
    assert_eq!(guess_from_path(Path::new("site/photo.JPG")), Some("image/jpeg"));
    assert_eq!(guess_from_path(Path::new("report.pdf")), Some("application/pdf"));
    assert_eq!(guess_from_path(Path::new("archive.tar.gz")), None);
  }
}
