use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;

use crate::error::RxScreenError;

pub fn rxscreen_data_dir() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join("rxscreen"),
        None => std::env::temp_dir().join("rxscreen"),
    }
}

/// Writes `content` to `path` through a sibling temporary file and a rename,
/// so readers never observe a partially written report.
pub async fn write_atomic(path: &Path, content: &str) -> Result<(), RxScreenError> {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Err(RxScreenError::InvalidArgument(format!(
            "Invalid output path: {}",
            path.display()
        )));
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await?;

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut tmp_path = None;
    let mut file_opt = None;
    for attempt in 0..32_u32 {
        let candidate = dir.join(format!(
            ".{file_name}.{}.{}.tmp",
            std::process::id(),
            seed.saturating_add(attempt as u128)
        ));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => {
                tmp_path = Some(candidate);
                file_opt = Some(file);
                break;
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let (Some(tmp_path), Some(mut file)) = (tmp_path, file_opt) else {
        return Err(RxScreenError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "Unable to allocate temporary output file",
        )));
    };
    {
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }
    Ok(())
}
