//! Change-triggered re-execution.
//!
//! Watches source files and re-executes each one whenever it changes, one
//! execution at a time, in the order changes were observed.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::context::FrameId;
use crate::engine::HotReloadEngine;
use crate::error::{Result, WatchError};

/// Time to wait after a change before reading the file, so writers can finish.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Something that can execute a source file.
pub trait ExecuteFile {
    fn execute_file(&mut self, path: &Path) -> Result<FrameId>;
}

impl ExecuteFile for HotReloadEngine {
    fn execute_file(&mut self, path: &Path) -> Result<FrameId> {
        HotReloadEngine::execute_file(self, path)
    }
}

/// Options for [`WatchLoop::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Execute once as soon as the loop starts.
    pub run_now: bool,
    /// Execute on change. When off, changes are only logged.
    pub auto_reload: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            run_now: true,
            auto_reload: true,
        }
    }
}

/// A file under watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedSource {
    /// Canonical path.
    pub path: PathBuf,
    /// Whether the file existed at the last change.
    pub exists: bool,
    pub auto_reload: bool,
    /// Subscribed through the parent directory, because the file is missing
    /// or because that directory is already watched for another source.
    watching_parent: bool,
}

impl WatchedSource {
    /// Whether changes currently reach the loop through the parent directory.
    ///
    /// Stays set while any source in the same directory needs the directory
    /// watch.
    pub fn watching_parent(&self) -> bool {
        self.watching_parent
    }
}

type Notification = notify::Result<Event>;

/// Feeds file changes into an [`ExecuteFile`] target.
///
/// ```rust,ignore
/// let mut engine = HotReloadEngine::new(BuildConfig::default());
/// let mut watch = WatchLoop::new()?;
/// watch.watch("scene.rs", WatchOptions::default())?;
/// watch.run_until(&mut engine, async {
///     let _ = tokio::signal::ctrl_c().await;
/// })
/// .await;
/// ```
pub struct WatchLoop {
    watcher: RecommendedWatcher,
    tx: mpsc::UnboundedSender<Notification>,
    rx: mpsc::UnboundedReceiver<Notification>,
    sources: Vec<WatchedSource>,
    /// Directories watched on behalf of missing files, with their user count.
    parents: HashMap<PathBuf, usize>,
    /// Executions requested by `run_now`, performed when the loop starts.
    pending: Vec<PathBuf>,
    settle_delay: Duration,
}

impl WatchLoop {
    /// Start the notification backend.
    pub fn new() -> std::result::Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend_tx = tx.clone();
        let watcher = notify::recommended_watcher(move |event: Notification| {
            let _ = backend_tx.send(event);
        })
        .map_err(|e| WatchError::Backend(e.to_string()))?;

        Ok(Self {
            watcher,
            tx,
            rx,
            sources: Vec::new(),
            parents: HashMap::new(),
            pending: Vec::new(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        })
    }

    /// Change the delay between a notification and the execution it triggers.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Watched files.
    pub fn sources(&self) -> &[WatchedSource] {
        &self.sources
    }

    /// Start watching `path`.
    ///
    /// Watching a path twice keeps one subscription and updates its
    /// `auto_reload` flag.
    pub fn watch(
        &mut self,
        path: impl AsRef<Path>,
        options: WatchOptions,
    ) -> std::result::Result<(), WatchError> {
        let path = path.as_ref();
        let path = path
            .canonicalize()
            .map_err(|_| WatchError::PathNotFound(path.to_path_buf()))?;

        if let Some(source) = self.sources.iter_mut().find(|s| s.path == path) {
            source.auto_reload = options.auto_reload;
        } else {
            let watching_parent = match path.parent() {
                Some(dir) if self.parents.contains_key(dir) => {
                    let dir = dir.to_path_buf();
                    self.acquire_parent(&dir);
                    true
                }
                _ => {
                    self.watcher
                        .watch(&path, RecursiveMode::NonRecursive)
                        .map_err(|e| WatchError::Subscribe {
                            path: path.clone(),
                            message: e.to_string(),
                        })?;
                    false
                }
            };
            tracing::info!("Watching {}", path.display());
            self.sources.push(WatchedSource {
                path: path.clone(),
                exists: true,
                auto_reload: options.auto_reload,
                watching_parent,
            });
        }

        if options.run_now {
            self.pending.push(path);
        }
        Ok(())
    }

    /// Turn re-execution on change on or off. Returns `false` for paths that
    /// are not watched.
    pub fn set_auto_reload(&mut self, path: impl AsRef<Path>, enabled: bool) -> bool {
        let path = path.as_ref();
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        match self.sources.iter_mut().find(|s| s.path == path) {
            Some(source) => {
                source.auto_reload = enabled;
                true
            }
            None => false,
        }
    }

    /// Queue a change notification for `path` as if the backend had seen one.
    pub fn trigger(&self, path: impl AsRef<Path>, kind: EventKind) {
        let event = Event::new(kind).add_path(path.as_ref().to_path_buf());
        // The receiver lives in `self`, so the channel cannot be closed here.
        let _ = self.tx.send(Ok(event));
    }

    /// Process changes forever.
    pub async fn run<T: ExecuteFile>(&mut self, target: &mut T) {
        self.run_until(target, std::future::pending()).await
    }

    /// Process changes until `shutdown` completes.
    ///
    /// Each change is handled to completion, execution included, before the
    /// next notification is read, so executions never overlap.
    pub async fn run_until<T, F>(&mut self, target: &mut T, shutdown: F)
    where
        T: ExecuteFile,
        F: Future<Output = ()>,
    {
        for path in std::mem::take(&mut self.pending) {
            execute(target, &path);
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::debug!("Watch loop stopped");
                    break;
                }
                notification = self.rx.recv() => match notification {
                    Some(Ok(event)) => self.handle_event(target, event).await,
                    Some(Err(e)) => tracing::warn!("File watcher error: {}", e),
                    None => break,
                },
            }
        }
    }

    async fn handle_event<T: ExecuteFile>(&mut self, target: &mut T, event: Event) {
        if !is_relevant(&event.kind) {
            return;
        }

        let changed: Vec<PathBuf> = self
            .sources
            .iter()
            .filter(|s| event.paths.iter().any(|p| *p == s.path))
            .map(|s| s.path.clone())
            .collect();

        for path in changed {
            tracing::debug!("{:?} on {}", event.kind, path.display());
            tokio::time::sleep(self.settle_delay).await;

            let Some(source) = self.rearm(&path) else {
                continue;
            };

            if !source.exists {
                tracing::info!("{} was removed, waiting for it to reappear", path.display());
            } else if source.auto_reload {
                execute(target, &path);
            } else {
                tracing::info!("{} changed (auto-reload off)", path.display());
            }
        }
    }

    /// Drop and recreate the subscription for a source. Editors that save by
    /// replacing the file leave the old subscription pointing at nothing.
    fn rearm(&mut self, path: &Path) -> Option<WatchedSource> {
        let index = self.sources.iter().position(|s| s.path == path)?;
        let exists = path.exists();

        self.unsubscribe(index);
        let watching_parent = self.subscribe(index, exists);

        tracing::debug!(
            "Re-armed {} (exists: {}, via parent: {})",
            path.display(),
            exists,
            watching_parent
        );

        let source = &mut self.sources[index];
        source.exists = exists;
        source.watching_parent = watching_parent;
        Some(source.clone())
    }

    fn unsubscribe(&mut self, index: usize) {
        let path = self.sources[index].path.clone();
        if self.sources[index].watching_parent {
            if let Some(dir) = path.parent() {
                self.release_parent(dir);
            }
        } else {
            // Fails when the watched inode is already gone.
            let _ = self.watcher.unwatch(&path);
        }
    }

    /// Subscribe a source again. Returns whether it now goes through its
    /// parent directory.
    ///
    /// A directory watch also reports changes of every file inside it, so
    /// once a directory is watched all sources in it share that watch.
    /// Otherwise their changes would arrive twice.
    fn subscribe(&mut self, index: usize, exists: bool) -> bool {
        let path = self.sources[index].path.clone();
        let Some(dir) = path.parent().map(Path::to_path_buf) else {
            if exists && let Err(e) = self.watcher.watch(&path, RecursiveMode::NonRecursive) {
                tracing::warn!("Failed to re-watch {}: {}", path.display(), e);
            }
            return false;
        };

        let dir_watched = self.parents.contains_key(&dir);
        if exists && !dir_watched {
            match self.watcher.watch(&path, RecursiveMode::NonRecursive) {
                Ok(()) => return false,
                Err(e) => tracing::warn!("Failed to re-watch {}: {}", path.display(), e),
            }
        }

        self.acquire_parent(&dir);
        if !dir_watched {
            self.move_siblings_to_parent(&dir, index);
        }
        true
    }

    fn move_siblings_to_parent(&mut self, dir: &Path, except: usize) {
        let siblings: Vec<usize> = self
            .sources
            .iter()
            .enumerate()
            .filter(|(i, s)| *i != except && !s.watching_parent)
            .filter(|(_, s)| s.path.parent() == Some(dir))
            .map(|(i, _)| i)
            .collect();

        for i in siblings {
            let _ = self.watcher.unwatch(&self.sources[i].path);
            self.acquire_parent(dir);
            self.sources[i].watching_parent = true;
            tracing::debug!(
                "{} now watched through {}",
                self.sources[i].path.display(),
                dir.display()
            );
        }
    }

    fn acquire_parent(&mut self, dir: &Path) {
        let count = self.parents.entry(dir.to_path_buf()).or_insert(0);
        *count += 1;
        if *count == 1
            && let Err(e) = self.watcher.watch(dir, RecursiveMode::NonRecursive)
        {
            tracing::warn!("Failed to watch directory {}: {}", dir.display(), e);
        }
    }

    fn release_parent(&mut self, dir: &Path) {
        let Some(count) = self.parents.get_mut(dir) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.parents.remove(dir);
            let _ = self.watcher.unwatch(dir);
        }
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any)
            | EventKind::Any
    )
}

fn execute<T: ExecuteFile>(target: &mut T, path: &Path) {
    match target.execute_file(path) {
        Ok(frame) => tracing::info!("Executed {} in frame {}", path.display(), frame),
        // The target reports its own failures; the loop keeps going.
        Err(e) => tracing::debug!("Execution of {} failed: {}", path.display(), e),
    }
}
