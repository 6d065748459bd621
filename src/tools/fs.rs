use serde::Deserialize;
use std::io;
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::tools::error::ToolError;
use crate::tools::safety::{truncate_string, SandboxRoot};

/// Characters returned by `get_file_content` before the output is cut.
pub const DEFAULT_MAX_CHARS: usize = 10_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListDirectoryArgs {
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileArgs {
    pub file_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteFileArgs {
    pub file_path: String,
    pub content: String,
}

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

impl EntryInfo {
    fn to_line(&self) -> String {
        format!(
            "- {}: file_size={} bytes, is_dir={}",
            self.name, self.size, self.is_dir
        )
    }
}

pub async fn list_directory(
    root: &SandboxRoot,
    args: ListDirectoryArgs,
) -> Result<String, ToolError> {
    let directory = args.directory.unwrap_or_else(|| ".".to_string());
    let dir_path = root
        .resolve(&directory)
        .map_err(|e| ToolError::containment("list", e))?;

    if !is_dir(&dir_path).await {
        return Err(ToolError::NotADirectory { path: directory });
    }

    let entries = read_entries(&dir_path)
        .await
        .map_err(|source| ToolError::List {
            path: directory.clone(),
            source,
        })?;

    let lines: Vec<String> = entries.iter().map(EntryInfo::to_line).collect();
    Ok(lines.join("\n"))
}

/// Non-recursive listing, sorted by name so repeated calls agree.
pub async fn read_entries(dir_path: &Path) -> io::Result<Vec<EntryInfo>> {
    let mut reader = tokio::fs::read_dir(dir_path).await?;
    let mut entries = vec![];

    while let Some(entry) = reader.next_entry().await? {
        let meta = tokio::fs::metadata(entry.path()).await?;
        entries.push(EntryInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
            is_dir: meta.is_dir(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub async fn read_file(
    root: &SandboxRoot,
    args: ReadFileArgs,
    max_chars: usize,
) -> Result<String, ToolError> {
    let full_path = root
        .resolve(&args.file_path)
        .map_err(|e| ToolError::containment("read", e))?;

    if !is_file(&full_path).await {
        return Err(ToolError::NotAFile {
            path: args.file_path,
        });
    }

    let read_err = |message: String| ToolError::Read {
        path: args.file_path.clone(),
        message,
    };

    // A char is at most 4 bytes, so one byte past 4 * max_chars is enough to
    // see whether anything follows the first max_chars characters.
    let limit = (max_chars as u64).saturating_mul(4).saturating_add(1);
    let file = tokio::fs::File::open(&full_path)
        .await
        .map_err(|e| read_err(e.to_string()))?;
    let mut bytes = Vec::new();
    file.take(limit)
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| read_err(e.to_string()))?;

    let valid_len = match std::str::from_utf8(&bytes) {
        Ok(_) => bytes.len(),
        Err(e) => e.valid_up_to(),
    };
    let text = String::from_utf8_lossy(&bytes[..valid_len]);
    let (mut content, _) = truncate_string(&text, max_chars);

    if content.chars().count() < max_chars && valid_len < bytes.len() {
        return Err(read_err(format!(
            "file is not valid UTF-8 (invalid byte at offset {valid_len})"
        )));
    }

    if content.len() < bytes.len() {
        content.push_str(&format!(
            "[...File \"{}\" truncated at {} characters]",
            args.file_path, max_chars
        ));
    }
    Ok(content)
}

pub async fn write_file(root: &SandboxRoot, args: WriteFileArgs) -> Result<String, ToolError> {
    let full_path = root
        .resolve(&args.file_path)
        .map_err(|e| ToolError::containment("write to", e))?;

    if is_dir(&full_path).await {
        return Err(ToolError::IsADirectory {
            path: args.file_path,
        });
    }

    let chars = args.content.chars().count();
    let write_err = |source: io::Error| ToolError::Write {
        path: args.file_path.clone(),
        chars,
        source,
    };

    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(&full_path, args.content.as_bytes())
        .await
        .map_err(write_err)?;

    Ok(format!(
        "Successfully wrote to \"{}\" ({} characters written)",
        args.file_path, chars
    ))
}

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
