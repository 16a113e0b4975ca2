use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::error::ProductionError;

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed {
        output_dir: PathBuf,
        files: Vec<PathBuf>,
    },
    Failed {
        error: String,
    },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }
}

struct JobEntry {
    run: u64,
    status: JobStatus,
    handle: Option<JoinHandle<()>>,
}

type JobMap = HashMap<String, JobEntry>;

/// Process-wide order id -> run status. Nothing here survives a restart.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<JobMap>>,
    runs: Arc<AtomicU64>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JobMap> {
        // entries are replaced whole, so a poisoned map is still consistent
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Updates the entry only while it still belongs to `run`.
    fn set_status(jobs: &Mutex<JobMap>, order_id: &str, run: u64, status: JobStatus) {
        let mut map = jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = map.get_mut(order_id).filter(|entry| entry.run == run) {
            entry.status = status;
        }
    }

    /// Runs `job` on a worker thread for `order_id`.
    ///
    /// Fails with `AlreadyRunning` while an earlier run for the same id is
    /// pending or running. With `clean`, `output_dir` is removed before the
    /// worker exists, so no write of the new run can race the delete.
    pub fn start<F>(
        &self,
        order_id: &str,
        output_dir: impl Into<PathBuf>,
        clean: bool,
        job: F,
    ) -> Result<(), ProductionError>
    where
        F: FnOnce() -> Result<Vec<PathBuf>, ProductionError> + Send + 'static,
    {
        let output_dir = output_dir.into();
        let run = self.runs.fetch_add(1, Ordering::Relaxed);
        {
            let mut map = self.lock();
            if let Some(entry) = map.get(order_id) {
                if !entry.status.is_finished() {
                    return Err(ProductionError::AlreadyRunning(order_id.to_string()));
                }
            }
            map.insert(
                order_id.to_string(),
                JobEntry {
                    run,
                    status: JobStatus::Pending,
                    handle: None,
                },
            );
        }

        if clean {
            if let Err(err) = clean_dir(&output_dir) {
                Self::set_status(
                    &self.jobs,
                    order_id,
                    run,
                    JobStatus::Failed {
                        error: format!("clean {}: {}", output_dir.display(), err),
                    },
                );
                return Err(err.into());
            }
        }

        let jobs = Arc::clone(&self.jobs);
        let id = order_id.to_string();
        let spawned = std::thread::Builder::new()
            .name(format!("order-{id}"))
            .spawn(move || {
                Self::set_status(&jobs, &id, run, JobStatus::Running);
                log::info!("order {} started", id);
                let status = match job() {
                    Ok(files) => {
                        log::info!("order {} completed ({} files)", id, files.len());
                        JobStatus::Completed { output_dir, files }
                    }
                    Err(err) => {
                        log::error!("order {} failed: {}", id, err);
                        JobStatus::Failed {
                            error: err.to_string(),
                        }
                    }
                };
                Self::set_status(&jobs, &id, run, status);
            });
        match spawned {
            Ok(handle) => {
                // a newer run may already own the entry if this worker was quick
                let mut map = self.lock();
                if let Some(entry) = map.get_mut(order_id).filter(|entry| entry.run == run) {
                    entry.handle = Some(handle);
                }
                Ok(())
            }
            Err(err) => {
                Self::set_status(
                    &self.jobs,
                    order_id,
                    run,
                    JobStatus::Failed {
                        error: format!("worker spawn failed: {err}"),
                    },
                );
                Err(err.into())
            }
        }
    }

    pub fn status(&self, order_id: &str) -> Option<JobStatus> {
        self.lock().get(order_id).map(|entry| entry.status.clone())
    }

    /// Blocks until the worker for `order_id` exits and returns its final
    /// status.
    pub fn wait(&self, order_id: &str) -> Option<JobStatus> {
        let (run, handle) = {
            let mut map = self.lock();
            let entry = map.get_mut(order_id)?;
            (entry.run, entry.handle.take())
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                Self::set_status(
                    &self.jobs,
                    order_id,
                    run,
                    JobStatus::Failed {
                        error: "worker panicked".to_string(),
                    },
                );
            }
        }
        self.status(order_id)
    }

    pub fn order_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn clean_dir(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            log::info!("removed {}", dir.display());
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn completed_job_reports_its_files() {
        let registry = JobRegistry::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("o1");
        let file = out.join("a.txt");
        let target = file.clone();
        registry
            .start("o1", &out, false, move || {
                std::fs::create_dir_all(target.parent().expect("parent"))?;
                std::fs::write(&target, b"x")?;
                Ok(vec![target])
            })
            .expect("start");
        assert_eq!(
            registry.wait("o1"),
            Some(JobStatus::Completed {
                output_dir: out,
                files: vec![file],
            })
        );
    }

    #[test]
    fn second_start_while_running_is_rejected() {
        let registry = JobRegistry::new();
        let (release, gate) = mpsc::channel::<()>();
        registry
            .start("busy", "unused", false, move || {
                let _ = gate.recv_timeout(Duration::from_secs(10));
                Ok(Vec::new())
            })
            .expect("first start");
        assert!(matches!(
            registry.start("busy", "unused", false, || Ok(Vec::new())),
            Err(ProductionError::AlreadyRunning(id)) if id == "busy"
        ));
        release.send(()).expect("release");
        assert!(matches!(registry.wait("busy"), Some(JobStatus::Completed { .. })));

        // finished runs can be re-triggered
        registry
            .start("busy", "unused", false, || Ok(Vec::new()))
            .expect("restart");
        registry.wait("busy");
    }

    #[test]
    fn failures_keep_the_message() {
        let registry = JobRegistry::new();
        registry
            .start("bad", "unused", false, || {
                Err(ProductionError::NoCards("bad".to_string()))
            })
            .expect("start");
        match registry.wait("bad") {
            Some(JobStatus::Failed { error }) => assert!(error.contains("no cards")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn clean_removes_old_output_before_the_worker_runs() {
        let registry = JobRegistry::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("order");
        std::fs::create_dir_all(&out).expect("mkdir");
        std::fs::write(out.join("stale.pdf"), b"old").expect("stale");

        let seen = out.join("stale.pdf");
        registry
            .start("order", &out, true, move || {
                if seen.exists() {
                    return Err(ProductionError::Layout("stale output survived".into()));
                }
                Ok(Vec::new())
            })
            .expect("start");
        assert!(matches!(registry.wait("order"), Some(JobStatus::Completed { .. })));
    }

    #[test]
    fn quick_restarts_keep_the_latest_worker() {
        let registry = JobRegistry::new();
        let starters: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let mut started = 0;
                    while started < 25 {
                        if registry.start("hot", "unused", false, || Ok(Vec::new())).is_ok() {
                            started += 1;
                        }
                    }
                })
            })
            .collect();
        for starter in starters {
            starter.join().expect("starter");
        }
        assert!(matches!(registry.wait("hot"), Some(JobStatus::Completed { .. })));
        assert_eq!(registry.order_ids(), vec!["hot".to_string()]);
    }

    #[test]
    fn unknown_orders_have_no_status() {
        let registry = JobRegistry::new();
        assert_eq!(registry.status("nope"), None);
        assert_eq!(registry.wait("nope"), None);
        assert!(registry.order_ids().is_empty());
    }
}
