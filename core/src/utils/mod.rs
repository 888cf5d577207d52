use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::Serialize;
use which::which;

/// Resolves the full path to a helper binary.
/// Search order: ./tools/{name} → ./{name} → System PATH
pub fn get_binary_path(tool_name: &str) -> Option<String> {
    let binary_name = if cfg!(target_os = "windows") && !tool_name.ends_with(".exe") {
        format!("{}.exe", tool_name)
    } else {
        tool_name.to_string()
    };

    let tools_path = PathBuf::from("./tools").join(&binary_name);
    if tools_path.is_file() {
        return Some(tools_path.to_string_lossy().to_string());
    }

    let local_path = PathBuf::from("./").join(&binary_name);
    if local_path.is_file() {
        return Some(local_path.to_string_lossy().to_string());
    }

    if let Ok(path) = which(&binary_name) {
        return Some(path.to_string_lossy().to_string());
    }

    None
}

/// Atomic write: serialize to `<path>.tmp`, then rename over the real file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut tmp = path.to_path_buf().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let json = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, &json).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
}
