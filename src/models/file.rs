use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Classification of a stored file, derived from the upload's MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    File,
}

impl FileKind {
    /// `Image` when the content type is present and starts with `image/`
    pub fn from_mime(mime_type: Option<&str>) -> Self {
        match mime_type {
            Some(mime) if mime.starts_with("image/") => FileKind::Image,
            _ => FileKind::File,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Image => "image",
            FileKind::File => "file",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "image" => Some(FileKind::Image),
            "file" => Some(FileKind::File),
            _ => None,
        }
    }

    /// Subdirectory of the upload root this kind is written to
    pub fn subdir(&self) -> Option<&'static str> {
        match self {
            FileKind::Image => Some("images"),
            FileKind::File => None,
        }
    }

    pub fn upload_message(&self) -> &'static str {
        match self {
            FileKind::Image => "Image uploaded successfully!",
            FileKind::File => "File uploaded successfully!",
        }
    }
}

/// File metadata row
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub file_type: String,
    pub parent_folder_id: Option<i64>,
    pub created_at: String,
}

impl FileRecord {
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_str(&self.file_type)
    }
}

/// Insert payload for a new metadata row; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub path: String,
    pub size: i64,
    pub kind: FileKind,
    pub parent_folder_id: Option<i64>,
    pub created_at: String,
}

/// Outcome of a successful upload
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub kind: FileKind,
    pub file: FileRecord,
}

impl SavedFile {
    pub fn message(&self) -> &'static str {
        self.kind.upload_message()
    }
}

/// File list query parameters
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub parent_folder_id: Option<i64>,
}
