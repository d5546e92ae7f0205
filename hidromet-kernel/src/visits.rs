/**
 * VISITAS - Compteur de visites persistant
 *
 * RÔLE :
 * Entier unique dans `visitas.json` ({"num_visitas": n}), incrémenté sous
 * verrou exclusif partagé entre processus (`visitas.json.lock`).
 *
 * FONCTIONNEMENT :
 * - flock(2) non bloquant réessayé jusqu'à 10 s, puis LockTimeout
 * - Lecture / +1 / écriture atomique (fichier temporaire + rename)
 * - Déverrouillage au drop du garde, quel que soit le chemin de sortie
 * - Les E/S bloquantes tournent sur le pool spawn_blocking de tokio
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::task;
use tracing::{debug, warn};

const LOCK_WAIT: Duration = Duration::from_secs(10);
#[cfg(unix)]
const LOCK_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum VisitError {
    #[error("No se pudo bloquear el contador de visitas en {0:?}")]
    LockTimeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Task error: {0}")]
    Join(#[from] task::JoinError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VisitCount {
    pub num_visitas: u64,
}

#[cfg(unix)]
mod lock {
    use super::{VisitError, LOCK_POLL};
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;
    use std::time::{Duration, Instant};

    /// Verrou consultatif inter-processus, relâché au drop
    pub struct LockGuard {
        file: File,
    }

    impl LockGuard {
        pub fn acquire(path: &Path, wait: Duration) -> Result<Self, VisitError> {
            let file = OpenOptions::new().create(true).truncate(false).write(true).open(path)?;
            let deadline = Instant::now() + wait;
            loop {
                match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                    Ok(()) => return Ok(Self { file }),
                    Err(Errno::EAGAIN) => {
                        if Instant::now() >= deadline {
                            return Err(VisitError::LockTimeout(wait));
                        }
                        std::thread::sleep(LOCK_POLL);
                    }
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(std::io::Error::from(e).into()),
                }
            }
        }
    }

    impl Drop for LockGuard {
        fn drop(&mut self) {
            let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
        }
    }
}

#[cfg(not(unix))]
mod lock {
    //! Repli mono-processus : mutex global à attente bornée

    use super::VisitError;
    use parking_lot::{const_mutex, Mutex, MutexGuard};
    use std::path::Path;
    use std::time::Duration;

    static LOCAL: Mutex<()> = const_mutex(());

    pub struct LockGuard {
        _guard: MutexGuard<'static, ()>,
    }

    impl LockGuard {
        pub fn acquire(path: &Path, wait: Duration) -> Result<Self, VisitError> {
            std::fs::OpenOptions::new().create(true).truncate(false).write(true).open(path)?;
            LOCAL
                .try_lock_for(wait)
                .map(|guard| Self { _guard: guard })
                .ok_or(VisitError::LockTimeout(wait))
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisitCounter {
    path: PathBuf,
    lock_path: PathBuf,
    wait: Duration,
}

fn read_count(path: &Path) -> Result<u64, VisitError> {
    match fs::read_to_string(path) {
        Ok(txt) => Ok(serde_json::from_str::<VisitCount>(&txt)?.num_visitas),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn write_count(path: &Path, num_visitas: u64) -> Result<(), VisitError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(&VisitCount { num_visitas })?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl VisitCounter {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self { path, lock_path: lock_path.into(), wait: LOCK_WAIT }
    }

    #[cfg(test)]
    fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    fn increment_blocking(&self) -> Result<u64, VisitError> {
        let started = Instant::now();
        let _guard = lock::LockGuard::acquire(&self.lock_path, self.wait)?;
        let next = read_count(&self.path)? + 1;
        write_count(&self.path, next)?;
        debug!("[visitas] {} (lock held after {:?})", next, started.elapsed());
        Ok(next)
    }

    /// +1 sous verrou, renvoie la nouvelle valeur
    pub async fn increment(&self) -> Result<u64, VisitError> {
        let counter = self.clone();
        let result = task::spawn_blocking(move || counter.increment_blocking()).await?;
        if let Err(VisitError::LockTimeout(_)) = &result {
            warn!("[visitas] lock not acquired within {:?}", self.wait);
        }
        result
    }

    /// Valeur courante ; fichier absent = 0
    pub async fn current(&self) -> Result<u64, VisitError> {
        let path = self.path.clone();
        task::spawn_blocking(move || read_count(&path)).await?
    }

    /// Crée le fichier à 0 s'il n'existe pas encore
    pub async fn ensure_initialized(&self) -> Result<u64, VisitError> {
        let counter = self.clone();
        task::spawn_blocking(move || {
            let _guard = lock::LockGuard::acquire(&counter.lock_path, counter.wait)?;
            if !counter.path.exists() {
                write_count(&counter.path, 0)?;
            }
            read_count(&counter.path)
        })
        .await?
    }
}
