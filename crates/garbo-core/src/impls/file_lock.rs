//! FileLockManager - advisory locks as files in a shared directory.
//!
//! Each task name maps to `<dir>/garbo-<name>.lock`, locked with a
//! non-blocking exclusive `flock`. The lock belongs to the open file
//! description, so two workers in the same process exclude each other just
//! like two processes do. Nobody reads the file contents.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;

use fs4::FileExt;

use crate::domain::TaskName;
use crate::error::GarboError;
use crate::ports::{LockManager, TaskLock};

#[derive(Debug, Clone)]
pub struct FileLockManager {
    dir: PathBuf,
}

impl FileLockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn lock_path(&self, name: &TaskName) -> PathBuf {
        self.dir.join(format!("garbo-{name}.lock"))
    }
}

impl LockManager for FileLockManager {
    fn try_acquire(&self, name: &TaskName) -> Result<Option<Box<dyn TaskLock>>, GarboError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(name);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Box::new(FileTaskLock {
                name: name.clone(),
                path,
                file: Some(file),
            }))),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            #[cfg(windows)]
            Err(err) if matches!(err.raw_os_error(), Some(32 | 33)) => Ok(None),
            Err(err) => Err(GarboError::Lock {
                name: name.clone(),
                message: format!("{}: {err}", path.display()),
            }),
        }
    }
}

struct FileTaskLock {
    name: TaskName,
    path: PathBuf,
    file: Option<File>,
}

impl TaskLock for FileTaskLock {
    fn name(&self) -> &TaskName {
        &self.name
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn release(mut self: Box<Self>) -> Result<(), GarboError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        file.unlock().map_err(|err| GarboError::Lock {
            name: self.name.clone(),
            message: format!("{}: {err}", self.path.display()),
        })
    }
}

impl Drop for FileTaskLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // closing the file drops the flock as well
            let _ = file.unlock();
        }
    }
}
