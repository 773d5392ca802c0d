//! Discovery engine: turns glob-matched local sockets into registry entries.
//!
//! The engine watches the parent directories of everything the glob matches
//! (plus the glob's own literal directory, when it exists), re-tests every
//! filesystem event against the glob, and translates:
//!
//! - create → [`TargetRegistry::add`]
//! - remove / rename → [`TargetRegistry::remove_by_address`]
//!
//! A poll timer re-runs the bootstrap scan whenever no event arrived within
//! the configured interval. The timer lives in the same `select!` as the
//! event source, so it is reset by every real event and can never race it.
//! The loop ends when the event source closes.

use crate::registry::TargetRegistry;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vncgate_types::error::{GatewayError, GatewayResult};
use vncgate_types::target::{TargetDescriptor, Transport};

/// How long [`DiscoveryHandle::shutdown`] waits for the loop to notice.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Kind of a normalised filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Create,
    Remove,
    /// The path was renamed away; the new name arrives as a separate `Create`.
    Rename,
    Other,
}

/// A filesystem event for a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Split a notify event into per-path events.
    pub fn from_notify(event: notify::Event) -> Vec<FsEvent> {
        let paths = event.paths;
        match event.kind {
            EventKind::Create(_) => paths
                .into_iter()
                .map(|p| FsEvent::new(FsEventKind::Create, p))
                .collect(),
            EventKind::Remove(_) => paths
                .into_iter()
                .map(|p| FsEvent::new(FsEventKind::Remove, p))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
                .into_iter()
                .map(|p| FsEvent::new(FsEventKind::Rename, p))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
                .into_iter()
                .map(|p| FsEvent::new(FsEventKind::Create, p))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut out = Vec::with_capacity(paths.len());
                let mut iter = paths.into_iter();
                if let Some(from) = iter.next() {
                    out.push(FsEvent::new(FsEventKind::Rename, from));
                }
                out.extend(iter.map(|to| FsEvent::new(FsEventKind::Create, to)));
                out
            }
            // Backends that cannot tell old from new name.
            EventKind::Modify(ModifyKind::Name(_)) => paths
                .into_iter()
                .map(|p| {
                    let kind = if p.exists() {
                        FsEventKind::Create
                    } else {
                        FsEventKind::Rename
                    };
                    FsEvent::new(kind, p)
                })
                .collect(),
            _ => paths
                .into_iter()
                .map(|p| FsEvent::new(FsEventKind::Other, p))
                .collect(),
        }
    }
}

/// A compiled discovery glob.
#[derive(Debug, Clone)]
pub struct SocketGlob {
    raw: String,
    pattern: glob::Pattern,
}

impl SocketGlob {
    /// Compile `raw`. Relative patterns are anchored at the working directory.
    pub fn new(raw: &str) -> GatewayResult<Self> {
        let anchored = if Path::new(raw).is_absolute() {
            raw.to_string()
        } else {
            std::env::current_dir()?.join(raw).to_string_lossy().into_owned()
        };
        let pattern = glob::Pattern::new(&anchored).map_err(|e| GatewayError::InvalidGlob {
            pattern: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            raw: anchored,
            pattern,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `path` matches. `*` never crosses a path separator.
    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.matches_path_with(path, match_options())
    }

    /// Current matches on disk.
    pub fn expand(&self) -> Vec<PathBuf> {
        match glob::glob_with(&self.raw, match_options()) {
            Ok(paths) => paths
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        debug!(error = %e, "Unreadable glob entry");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                error!(pattern = %self.raw, error = %e, "Glob expansion failed");
                Vec::new()
            }
        }
    }

    /// Directories to register for change notification.
    pub fn watch_dirs(&self) -> BTreeSet<PathBuf> {
        let mut dirs: BTreeSet<PathBuf> = self
            .expand()
            .into_iter()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect();

        if let Some(parent) = Path::new(&self.raw).parent() {
            let literal = !parent.to_string_lossy().contains(['*', '?', '[']);
            if literal && parent.is_dir() {
                dirs.insert(parent.to_path_buf());
            }
        }
        dirs
    }
}

fn match_options() -> glob::MatchOptions {
    glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// Where the discovery loop gets its events from.
enum EventSource {
    Notify(RecommendedWatcher),
    /// No notification backend; holding the sender keeps the loop alive.
    PollOnly(mpsc::UnboundedSender<FsEvent>),
}

/// A running discovery loop.
pub struct DiscoveryHandle {
    source: EventSource,
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// Whether the loop runs without filesystem notifications.
    pub fn is_poll_only(&self) -> bool {
        matches!(self.source, EventSource::PollOnly(_))
    }

    /// Close the event source and wait for the loop to finish.
    pub async fn shutdown(self) {
        let DiscoveryHandle { source, mut task } = self;
        drop(source);
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("Discovery loop did not stop in time, aborting");
            task.abort();
        }
    }
}

/// Reconciles one glob with the registry.
pub struct DiscoveryEngine {
    glob: SocketGlob,
    registry: Arc<TargetRegistry>,
    poll_interval: Option<Duration>,
}

impl DiscoveryEngine {
    /// Create an engine. A malformed glob is an error.
    pub fn new(
        pattern: &str,
        registry: Arc<TargetRegistry>,
        poll_interval: Option<Duration>,
    ) -> GatewayResult<Self> {
        Ok(Self {
            glob: SocketGlob::new(pattern)?,
            registry,
            poll_interval,
        })
    }

    pub fn glob(&self) -> &SocketGlob {
        &self.glob
    }

    /// Establish watches and spawn the loop.
    ///
    /// If the notification backend cannot start, the engine falls back to
    /// polling when a poll interval is configured and refuses to start
    /// otherwise.
    pub fn start(self) -> GatewayResult<DiscoveryHandle> {
        self.start_with(Self::spawn_watcher)
    }

    /// [`start`](Self::start) with a custom watcher factory.
    fn start_with<F>(self, make_watcher: F) -> GatewayResult<DiscoveryHandle>
    where
        F: FnOnce(&Self, mpsc::UnboundedSender<FsEvent>) -> notify::Result<RecommendedWatcher>,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        let source = match make_watcher(&self, tx.clone()) {
            Ok(watcher) => {
                drop(tx);
                EventSource::Notify(watcher)
            }
            Err(e) if self.poll_interval.is_some() => {
                warn!(error = %e, "Filesystem notifications unavailable, polling only");
                EventSource::PollOnly(tx)
            }
            Err(e) => return Err(GatewayError::DiscoveryUnavailable(e.to_string())),
        };

        let task = tokio::spawn(self.run(rx));
        Ok(DiscoveryHandle { source, task })
    }

    fn spawn_watcher(&self, tx: mpsc::UnboundedSender<FsEvent>) -> notify::Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for fs_event in FsEvent::from_notify(event) {
                        let _ = tx.send(fs_event);
                    }
                }
                Err(e) => error!("watch error: {:?}", e),
            },
            Config::default(),
        )?;

        let dirs = self.glob.watch_dirs();
        let mut watched = 0usize;
        for dir in &dirs {
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    info!(path = %dir.display(), "Adding watch path");
                    watched += 1;
                }
                Err(e) => warn!(path = %dir.display(), error = %e, "Failed to watch directory"),
            }
        }
        // Partial coverage is left to the poll; a watcher that sees nothing is a failed backend.
        if watched == 0 && !dirs.is_empty() {
            return Err(notify::Error::generic("no matching directory could be watched"));
        }
        Ok(watcher)
    }

    /// Bootstrap scan, then the event/poll loop until `events` closes.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<FsEvent>) {
        self.scan();
        info!(pattern = %self.glob.as_str(), "Socket watch loop started");

        loop {
            let poll = async {
                match self.poll_interval {
                    Some(interval) => tokio::time::sleep(interval).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(&event),
                    None => break,
                },
                _ = poll => {
                    debug!("Watch poll timeout: doing manual poll");
                    self.poll();
                }
            }
        }

        info!(pattern = %self.glob.as_str(), "Socket watch loop finished");
    }

    /// Register every current glob match that is not a directory.
    /// Returns the number of newly added targets.
    pub fn scan(&self) -> usize {
        self.glob
            .expand()
            .into_iter()
            .filter(|path| match std::fs::metadata(path) {
                Ok(meta) => !meta.is_dir(),
                Err(_) => false,
            })
            .filter(|path| self.registry.add(socket_target(path)))
            .count()
    }

    /// Remove local-socket entries matching the glob that vanished from disk.
    /// Returns the number of removed entries.
    pub fn reconcile(&self) -> usize {
        let stale: BTreeSet<String> = self
            .registry
            .list()
            .into_values()
            .filter(|t| t.transport == Transport::Unix)
            .filter(|t| {
                let path = Path::new(&t.address);
                self.glob.matches(path) && !path.exists()
            })
            .map(|t| t.address)
            .collect();

        stale
            .iter()
            .map(|address| self.registry.remove_by_address(address))
            .sum()
    }

    fn poll(&self) {
        let added = self.scan();
        let removed = self.reconcile();
        if added + removed > 0 {
            info!(added, removed, "Manual poll picked up missed changes");
        }
    }

    /// Apply a single filesystem event.
    pub fn handle_event(&self, event: &FsEvent) {
        if !self.glob.matches(&event.path) {
            debug!(path = %event.path.display(), kind = ?event.kind, "Ignoring non-matching path");
            return;
        }

        match event.kind {
            FsEventKind::Create => {
                if event.path.is_dir() {
                    debug!(path = %event.path.display(), "Ignoring directory");
                    return;
                }
                self.registry.add(socket_target(&event.path));
            }
            FsEventKind::Remove | FsEventKind::Rename => {
                self.registry
                    .remove_by_address(&event.path.to_string_lossy());
            }
            FsEventKind::Other => {
                debug!(path = %event.path.display(), "Ignoring event");
            }
        }
    }
}

fn socket_target(path: &Path) -> TargetDescriptor {
    TargetDescriptor::unix(path.to_string_lossy().into_owned())
}
