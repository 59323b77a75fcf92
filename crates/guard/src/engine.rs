#![forbid(unsafe_code)]

use crate::control::{ControlChannel, ControlServer, socket_path};
use crate::error::Error;
use crate::fsops::{AttributeStore, FileLock, ImmutableFlag, NoopLock, XattrStore};
use crate::interception::FanotifyGuard;
use crate::persistence::{DatabaseMetadata, DbOptions, PatternDb};
use crate::stores::PatternStore;
use crate::taint::TaintCache;
use config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// External collaborators of the engine.
pub struct Services {
    pub attributes: Arc<dyn AttributeStore>,
    pub lock: Arc<dyn FileLock>,
}

impl Services {
    /// Extended attributes, and the immutable flag when the config asks for it.
    pub fn system(config: &Config) -> Self {
        let lock: Arc<dyn FileLock> = if config.database.lock_immutable {
            Arc::new(ImmutableFlag)
        } else {
            Arc::new(NoopLock)
        };
        Self {
            attributes: Arc::new(XattrStore),
            lock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    DumpStatus,
    SaveNow,
}

/// One guarded mount point: its pattern database, taint cache, control
/// socket and interception front end.
pub struct GuardEngine {
    config: Config,
    mount_point: PathBuf,
    patterns: Arc<PatternStore>,
    db: Arc<PatternDb>,
    taint: Arc<TaintCache>,
    channel: Arc<ControlChannel>,
    saved_changes: u64,
    last_save: Instant,
}

impl GuardEngine {
    /// Load the pattern database of `mount_point`. Failing to read it is fatal.
    pub fn load(config: Config, mount_point: &Path, services: Services) -> Result<Self, Error> {
        let options = DbOptions::from_config(&config, mount_point);
        let metadata = Arc::new(DatabaseMetadata::new());
        let db = Arc::new(PatternDb::new(
            options,
            services.lock,
            Arc::clone(&services.attributes),
            Arc::clone(&metadata),
        ));
        let patterns = Arc::new(db.load()?);

        let taint = Arc::new(TaintCache::new(
            Arc::clone(&patterns),
            metadata,
            services.attributes,
            config.attributes.taint(),
            config.intercept.read_chunk,
        ));
        let channel = Arc::new(ControlChannel::new(
            Arc::clone(&patterns),
            Arc::clone(&db),
            Arc::clone(&taint),
        ));

        Ok(Self {
            config,
            mount_point: mount_point.to_path_buf(),
            patterns,
            db,
            taint,
            channel,
            saved_changes: 0,
            last_save: Instant::now(),
        })
    }

    pub fn channel(&self) -> &Arc<ControlChannel> {
        &self.channel
    }

    pub fn taint(&self) -> &Arc<TaintCache> {
        &self.taint
    }

    pub fn socket_path(&self) -> PathBuf {
        socket_path(&self.config.control.runtime_dir, &self.mount_point)
    }

    /// Serve until `cancel` fires, then flush and release everything.
    pub async fn run_until(
        &mut self,
        cancel: CancellationToken,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    ) -> Result<(), Error> {
        let interception = if self.config.intercept.enabled {
            Some(FanotifyGuard::start(
                &self.mount_point,
                Arc::clone(&self.taint),
                (&self.config.intercept).into(),
            )?)
        } else {
            info!("interception disabled");
            None
        };

        let server = ControlServer::bind(self.socket_path(), Arc::clone(&self.channel))?;
        let server_cancel = cancel.child_token();
        let mut server_task = tokio::spawn(server.serve(server_cancel.clone()));

        let autosave = self
            .config
            .persistence
            .autosave_interval
            .filter(|interval| !interval.is_zero());
        debug!(?autosave, "autosave interval");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                Some(event) = control_rx.recv() => {
                    self.handle_control(event).await;
                }
                _ = autosave_due(self.last_save, autosave) => {
                    if self.channel.changes() != self.saved_changes {
                        debug!("autosaving pattern database");
                        let _ = self.save().await;
                    }
                    self.last_save = Instant::now();
                }
                res = &mut server_task => {
                    match res {
                        Ok(Err(err)) => error!(%err, "control server failed"),
                        Err(err) => error!(%err, "control server panicked"),
                        Ok(Ok(())) => warn!("control server stopped"),
                    }
                    break;
                }
            }
        }

        if let Some(guard) = interception {
            // joins the reader thread
            if let Err(err) = tokio::task::spawn_blocking(move || drop(guard)).await {
                warn!(%err, "interception did not stop cleanly");
            }
        }
        server_cancel.cancel();
        if !server_task.is_finished() {
            if let Err(err) = (&mut server_task).await {
                warn!(%err, "control server did not stop cleanly");
            }
        }

        let result = if self.config.persistence.save_on_shutdown {
            self.save().await
        } else {
            Ok(())
        };
        self.patterns.clear();
        self.db.close();
        info!(mount = %self.mount_point.display(), "guard stopped");
        result
    }

    /// Flush the pattern database. Failures are logged and returned.
    pub async fn save(&mut self) -> Result<(), Error> {
        let changes = self.channel.changes();
        let channel = Arc::clone(&self.channel);
        tokio::task::spawn_blocking(move || channel.flush())
            .await
            .map_err(|err| Error::Io(std::io::Error::other(err)))??;
        self.saved_changes = changes;
        Ok(())
    }

    /// Log the current status at `info`.
    pub fn dump_status(&self) {
        let status = self.channel.status();
        info!(
            mount = %self.mount_point.display(),
            database = status.database,
            patterns = status.patterns,
            serialized_len = status.serialized_len,
            removal_count = status.removal_count,
            scans = status.scans,
            short_circuits = status.short_circuits,
            denials = status.denials,
            attribute_errors = status.attribute_errors,
            "guard status"
        );
    }

    async fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::DumpStatus => self.dump_status(),
            ControlEvent::SaveNow => {
                if self.save().await.is_ok() {
                    self.last_save = Instant::now();
                    info!("pattern database saved");
                }
            }
        }
    }
}

async fn autosave_due(last_save: Instant, interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep_until(last_save + interval).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for GuardEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardEngine")
            .field("mount_point", &self.mount_point)
            .field("db", &self.db)
            .field("channel", &self.channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops::MemoryAttributeStore;
    use tempfile::TempDir;

    fn engine(contents: &str) -> (TempDir, GuardEngine) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pattern.db"), contents).unwrap();
        let mut config = Config::default();
        config.intercept.enabled = false;
        config.control.runtime_dir = dir.path().join("run");
        let services = Services {
            attributes: Arc::new(MemoryAttributeStore::new()),
            lock: Arc::new(NoopLock),
        };
        let engine = GuardEngine::load(config, dir.path(), services).unwrap();
        (dir, engine)
    }

    #[test]
    fn load_fails_without_database() {
        let dir = tempfile::tempdir().unwrap();
        let services = Services {
            attributes: Arc::new(MemoryAttributeStore::new()),
            lock: Arc::new(NoopLock),
        };
        assert!(matches!(
            GuardEngine::load(Config::default(), dir.path(), services),
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_flushes_and_releases() {
        let (dir, mut engine) = engine("evil\n");
        engine.channel().add_pattern(b"worm").unwrap();
        let patterns = Arc::clone(engine.channel().patterns());

        let cancel = CancellationToken::new();
        let (_tx, rx) = mpsc::unbounded_channel();
        cancel.cancel();
        engine.run_until(cancel, rx).await.unwrap();

        let on_disk = std::fs::read(dir.path().join("pattern.db")).unwrap();
        assert_eq!(on_disk, b"evil\nworm\n".to_vec());
        assert!(patterns.is_empty());
        assert!(!engine.socket_path().exists());
    }

    #[tokio::test]
    async fn save_now_event_flushes() {
        let (dir, mut engine) = engine("");
        engine.config.persistence.save_on_shutdown = false;
        engine.channel().add_pattern(b"evil").unwrap();

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ControlEvent::SaveNow).unwrap();
        tx.send(ControlEvent::DumpStatus).unwrap();

        let stopper = cancel.clone();
        let path = dir.path().join("pattern.db");
        let watcher = tokio::spawn(async move {
            for _ in 0..200 {
                if std::fs::read(&path).unwrap() == b"evil\n" {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            stopper.cancel();
        });
        engine.run_until(cancel, rx).await.unwrap();
        watcher.await.unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("pattern.db")).unwrap(),
            b"evil\n".to_vec()
        );
    }
}
