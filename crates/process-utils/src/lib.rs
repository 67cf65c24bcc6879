//! Helpers for launching external tools.
//!
//! Commands are created without a console window on Windows, and program
//! names can be resolved against `PATH` before anything is spawned.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` that never opens a console window.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Resolve `program` to an existing file.
///
/// A path with more than one component (`./ffmpeg`, `/usr/bin/ffmpeg`) is
/// checked as given. A bare name (`ffmpeg`) is checked in the working
/// directory first and then in every `PATH` entry.
pub fn find_executable(program: impl AsRef<Path>) -> Option<PathBuf> {
    let program = program.as_ref();
    if program.as_os_str().is_empty() {
        return None;
    }
    if program.is_file() {
        return Some(program.to_path_buf());
    }
    if program.components().count() > 1 {
        return None;
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| candidates(&dir, program))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    let plain = dir.join(program);
    if program.extension().is_some() {
        return vec![plain];
    }
    vec![plain.clone(), plain.with_extension("exe")]
}

#[cfg(not(windows))]
fn candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    vec![dir.join(program)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_absolute_path() {
        assert!(find_executable("/nonexistent/dir/ffmpeg").is_none());
    }

    #[test]
    fn test_empty_program() {
        assert!(find_executable("").is_none());
    }

    #[test]
    fn test_bare_name_not_on_path() {
        assert!(find_executable("definitely-not-a-real-transcoder-binary").is_none());
    }

    #[test]
    fn test_existing_file_is_returned_as_given() {
        let exe = std::env::current_exe().unwrap();
        assert_eq!(find_executable(&exe), Some(exe));
    }
}
