//! Durable JSONL audit trail.
//!
//! One file per stream under `<state_dir>/audit/`. Appends take an exclusive lock so
//! concurrent `concord` processes never interleave half rows.
//!
//! `record` is called from async tasks, so a contended lock is given up after a
//! short wait; callers log the failed row and carry on.

use concord_core::{AuditEvent, AuditSink, AuditStream};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const CONSENSUS_FILE: &str = "consensus.jsonl";
const REMEDIATION_FILE: &str = "remediation.jsonl";
const LOCK_FILE: &str = ".lock";
const LOCK_TIMEOUT: Duration = Duration::from_millis(250);
const LOCK_RETRY: Duration = Duration::from_millis(5);

pub struct AuditLog {
    dir: PathBuf,
}

struct AuditLock {
    file: fs::File,
}

impl Drop for AuditLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn stream_path(&self, stream: AuditStream) -> PathBuf {
        match stream {
            AuditStream::Consensus => self.dir.join(CONSENSUS_FILE),
            AuditStream::Remediation => self.dir.join(REMEDIATION_FILE),
        }
    }

    fn lock(&self) -> anyhow::Result<AuditLock> {
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(AuditLock { file }),
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for audit lock ({}ms)",
                            LOCK_TIMEOUT.as_millis()
                        ));
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
            }
        }
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        let _lock = self.lock()?;
        let path = self.stream_path(event.stream);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let row = serde_json::to_string(event)?;
        writeln!(file, "{}", row)?;
        Ok(())
    }
}
