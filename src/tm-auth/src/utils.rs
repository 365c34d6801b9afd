//! Utility functions for the tm-auth crate.

use std::path::Path;

/// Mask an API key or token for safe display.
pub fn safe_format_key(key: &str) -> String {
    if key.len() <= 13 || !key.is_char_boundary(8) || !key.is_char_boundary(key.len() - 5) {
        return "***".to_string();
    }
    let prefix = &key[..8];
    let suffix = &key[key.len() - 5..];
    format!("{prefix}***{suffix}")
}

/// Set owner-only file permissions (0600 on Unix).
pub(crate) fn set_file_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

/// Set owner-only directory permissions (0700 on Unix).
pub(crate) fn set_dir_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}
