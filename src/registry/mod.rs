// ABOUTME: Session registry - single-owner in-memory view of windows and agent sessions
// Owns Map<tmuxTarget, Window> and Map<sessionId, AgentSession>; all mutation funnels through its mailbox

pub mod presentation;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::logs::ScannedLogEntry;
use crate::matcher::{MatchRequest, MatcherHandle};
use crate::status::{classify, ClassifierInput, Status};
use crate::store::{AgentSessionPatch, AgentSessionRecord, Store};
use crate::tmux::{TmuxAdapter, Window, WindowSource};

pub use presentation::PresentationSession;

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Snapshot(Vec<PresentationSession>),
    SessionCreated(PresentationSession),
    SessionUpdate(PresentationSession),
    SessionRemoved { session_id: String },
    SessionOrphaned(PresentationSession),
    AgentSessionsPartition {
        active: Vec<PresentationSession>,
        inactive: Vec<PresentationSession>,
    },
}

pub enum RegistryCommand {
    CreateSession {
        project_path: String,
        command: String,
        reply: oneshot::Sender<Result<PresentationSession, AppError>>,
    },
    KillSession {
        session_id: String,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    RenameSession {
        session_id: String,
        name: String,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    SetPinned {
        session_id: String,
        pinned: bool,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    RefreshNow,
    Snapshot {
        reply: oneshot::Sender<Vec<PresentationSession>>,
    },
    AgentSessionsPartition {
        reply: oneshot::Sender<(Vec<PresentationSession>, Vec<PresentationSession>)>,
    },
    /// Used by the resume manager after launching the reborn window, so the
    /// registry's next tick gives it priority in matching.
    NewWindowHint {
        tmux_target: String,
    },
}

#[derive(Clone)]
pub struct RegistryHandle {
    commands: mpsc::Sender<RegistryCommand>,
    events: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub async fn create_session(
        &self,
        project_path: String,
        command: String,
    ) -> Result<PresentationSession, AppError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RegistryCommand::CreateSession {
                project_path,
                command,
                reply,
            })
            .await
            .map_err(|_| AppError::Internal("registry closed".into()))?;
        rx.await.map_err(|_| AppError::Internal("registry dropped reply".into()))?
    }

    pub async fn kill_session(&self, session_id: String) -> Result<(), AppError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RegistryCommand::KillSession { session_id, reply })
            .await
            .map_err(|_| AppError::Internal("registry closed".into()))?;
        rx.await.map_err(|_| AppError::Internal("registry dropped reply".into()))?
    }

    pub async fn rename_session(&self, session_id: String, name: String) -> Result<(), AppError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RegistryCommand::RenameSession { session_id, name, reply })
            .await
            .map_err(|_| AppError::Internal("registry closed".into()))?;
        rx.await.map_err(|_| AppError::Internal("registry dropped reply".into()))?
    }

    pub async fn set_pinned(&self, session_id: String, pinned: bool) -> Result<(), AppError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RegistryCommand::SetPinned { session_id, pinned, reply })
            .await
            .map_err(|_| AppError::Internal("registry closed".into()))?;
        rx.await.map_err(|_| AppError::Internal("registry dropped reply".into()))?
    }

    pub async fn refresh_now(&self) {
        let _ = self.commands.send(RegistryCommand::RefreshNow).await;
    }

    pub async fn snapshot(&self) -> Vec<PresentationSession> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(RegistryCommand::Snapshot { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn agent_sessions_partition(&self) -> (Vec<PresentationSession>, Vec<PresentationSession>) {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(RegistryCommand::AgentSessionsPartition { reply })
            .await
            .is_err()
        {
            return (Vec::new(), Vec::new());
        }
        rx.await.unwrap_or_default()
    }

    pub async fn hint_new_window(&self, tmux_target: String) {
        let _ = self.commands.send(RegistryCommand::NewWindowHint { tmux_target }).await;
    }
}

struct TrackedSession {
    record: AgentSessionRecord,
    /// Last time this session's log was observed to grow.
    grew_at: Option<Instant>,
}

pub struct SessionRegistry {
    config: AppConfig,
    store: Store,
    matcher: MatcherHandle,
    local_adapter: Arc<dyn TmuxAdapter>,
    remote_adapters: Vec<Arc<dyn TmuxAdapter>>,

    windows: HashMap<String, Window>,
    sessions_by_id: HashMap<String, TrackedSession>,
    log_entries: HashMap<String, ScannedLogEntry>, // log_path -> latest entry, for matching only

    previous_active: Vec<PresentationSession>,
    previous_inactive_ids: std::collections::HashSet<String>,

    commands_rx: mpsc::Receiver<RegistryCommand>,
    events_tx: broadcast::Sender<RegistryEvent>,
    log_rx: mpsc::Receiver<Vec<ScannedLogEntry>>,
}

impl SessionRegistry {
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        config: AppConfig,
        store: Store,
        local_adapter: Arc<dyn TmuxAdapter>,
        remote_adapters: Vec<Arc<dyn TmuxAdapter>>,
        matcher: MatcherHandle,
        log_rx: mpsc::Receiver<Vec<ScannedLogEntry>>,
    ) -> RegistryHandle {
        let (commands_tx, commands_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(1024);

        // Preload persisted sessions so resume/pin state survives restarts.
        let mut sessions_by_id = HashMap::new();
        if let Ok(records) = store.get_active_sessions().await {
            for r in records {
                sessions_by_id.insert(r.session_id.clone(), TrackedSession { record: r, grew_at: None });
            }
        }
        if let Ok(records) = store.get_pinned_orphaned().await {
            for r in records {
                sessions_by_id
                    .entry(r.session_id.clone())
                    .or_insert(TrackedSession { record: r, grew_at: None });
            }
        }

        let registry = Self {
            config,
            store,
            matcher,
            local_adapter,
            remote_adapters,
            windows: HashMap::new(),
            sessions_by_id,
            log_entries: HashMap::new(),
            previous_active: Vec::new(),
            previous_inactive_ids: std::collections::HashSet::new(),
            commands_rx,
            events_tx: events_tx.clone(),
            log_rx,
        };

        let handle = RegistryHandle {
            commands: commands_tx,
            events: events_tx,
        };

        tokio::spawn(registry.run());
        handle
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "registry tick failed, skipping");
                    }
                }
                Some(cmd) = self.commands_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                else => {
                    info!("registry mailbox closed, stopping");
                    break;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::CreateSession { project_path, command, reply } => {
                let result = self.create_session(&project_path, &command).await;
                let _ = reply.send(result);
            }
            RegistryCommand::KillSession { session_id, reply } => {
                let result = self.kill_session(&session_id).await;
                let _ = reply.send(result);
            }
            RegistryCommand::RenameSession { session_id, name, reply } => {
                let result = self.rename_session(&session_id, &name).await;
                let _ = reply.send(result);
            }
            RegistryCommand::SetPinned { session_id, pinned, reply } => {
                let result = self.store.set_pinned(&session_id, pinned).await;
                if let Ok(()) = &result {
                    if let Some(t) = self.sessions_by_id.get_mut(&session_id) {
                        t.record.is_pinned = pinned;
                    }
                }
                let _ = reply.send(result.map_err(|e| AppError::Internal(e.to_string())));
            }
            RegistryCommand::RefreshNow => {
                if let Err(e) = self.tick().await {
                    error!(error = %e, "forced refresh failed");
                }
            }
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(self.previous_active.clone());
            }
            RegistryCommand::AgentSessionsPartition { reply } => {
                let (active, inactive) = self.partition();
                let _ = reply.send((active, inactive));
            }
            RegistryCommand::NewWindowHint { tmux_target } => {
                debug!(tmux_target, "registry received new-window hint");
            }
        }
    }

    async fn create_session(&mut self, project_path: &str, command: &str) -> Result<PresentationSession, AppError> {
        let target = self
            .local_adapter
            .new_window(&self.config.tmux_session, project_path, command)
            .await
            .map_err(|e| AppError::SessionCreateFailed(e.to_string()))?;

        let window = Window {
            tmux_target: target.clone(),
            window_name: command.to_string(),
            session_name: self.config.tmux_session.clone(),
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
            source: WindowSource::Managed,
            host: None,
        };
        self.windows.insert(target.clone(), window.clone());

        let placeholder = PresentationSession::from_window_and_session(&window, None, Status::Unknown);
        Ok(placeholder)
    }

    async fn kill_session(&mut self, session_id: &str) -> Result<(), AppError> {
        let target = self
            .sessions_by_id
            .get(session_id)
            .and_then(|t| t.record.current_window.clone())
            .ok_or(AppError::NotFound)?;

        self.local_adapter
            .kill_window(&target)
            .await
            .map_err(|e| AppError::ResumeFailed(e.to_string()))?;
        self.windows.remove(&target);
        Ok(())
    }

    async fn rename_session(&mut self, session_id: &str, name: &str) -> Result<(), AppError> {
        let tracked = self.sessions_by_id.get_mut(session_id).ok_or(AppError::NotFound)?;
        tracked.record.display_name = name.to_string();
        self.store
            .update_session(
                session_id,
                AgentSessionPatch {
                    display_name: Some(name.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| AppError::Internal(e.to_string()))
    }

    fn partition(&self) -> (Vec<PresentationSession>, Vec<PresentationSession>) {
        let active = self.previous_active.clone();
        let cutoff = self.config.inactive_max_age_hours_default;
        let now = Utc::now();
        let inactive = self
            .sessions_by_id
            .values()
            .filter(|t| t.record.current_window.is_none())
            .filter(|t| {
                t.record.is_pinned
                    || (now - t.record.last_activity_at).num_hours() < cutoff
            })
            .map(|t| PresentationSession::from_inactive_session(&t.record))
            .collect();
        (active, inactive)
    }

    /// Derive a unique display name from a project path, disambiguating on
    /// collision the way the teacher derives `branch_name` from `name`.
    fn derive_display_name(&self, project_path: &str) -> String {
        let base = std::path::Path::new(project_path)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("session")
            .to_string();
        let mut candidate = base.clone();
        let mut suffix = 2;
        while self.sessions_by_id.values().any(|t| t.record.display_name == candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        candidate
    }

    fn managed_and_discovered_sessions(&self) -> Vec<(String, WindowSource)> {
        let mut out = vec![(self.config.tmux_session.clone(), WindowSource::Managed)];
        // Discovery-prefixed sessions are resolved at tick time against
        // `tmux list-sessions`, since their exact names aren't known ahead.
        out.extend(
            self.config
                .discover_prefixes
                .iter()
                .map(|p| (p.clone(), WindowSource::External)),
        );
        out
    }

    async fn tick(&mut self) -> Result<(), AppError> {
        self.ingest_log_deltas().await;

        let new_windows = self.poll_windows().await;
        let previous_targets: std::collections::HashSet<String> =
            self.windows.keys().cloned().collect();
        let new_targets: std::collections::HashSet<String> =
            new_windows.iter().map(|w| w.identity()).collect();

        self.windows = new_windows.into_iter().map(|w| (w.identity(), w)).collect();

        self.run_matcher_pass().await;
        self.orphan_dead_windows(&previous_targets, &new_targets).await;

        let classified = self.classify_windows().await;
        self.emit_diffs(classified).await;

        Ok(())
    }

    async fn poll_windows(&self) -> Vec<Window> {
        let mut windows = self
            .local_adapter
            .list_windows(&self.managed_and_discovered_sessions())
            .await
            .unwrap_or_default();
        for remote in &self.remote_adapters {
            if let Ok(mut remote_windows) = remote
                .list_windows(&[(self.config.tmux_session.clone(), WindowSource::Managed)])
                .await
            {
                windows.append(&mut remote_windows);
            }
        }
        windows
    }

    async fn ingest_log_deltas(&mut self) {
        while let Ok(batch) = self.log_rx.try_recv() {
            for entry in batch {
                self.log_entries.insert(entry.log_path.clone(), entry.clone());
                self.upsert_session_from_log(entry).await;
            }
        }
    }

    async fn upsert_session_from_log(&mut self, entry: ScannedLogEntry) {
        let existing_by_log = self
            .sessions_by_id
            .values()
            .find(|t| t.record.log_file_path == entry.log_path)
            .map(|t| t.record.session_id.clone());

        if let Some(session_id) = existing_by_log.or_else(|| {
            self.sessions_by_id.contains_key(&entry.session_id).then(|| entry.session_id.clone())
        }) {
            let grew = self
                .sessions_by_id
                .get(&session_id)
                .map(|t| t.record.last_known_log_size != Some(entry.last_known_log_size as i64))
                .unwrap_or(true);

            if let Some(tracked) = self.sessions_by_id.get_mut(&session_id) {
                tracked.record.last_activity_at = entry.last_activity_at_from_mtime;
                tracked.record.last_user_message = entry.last_user_message.clone();
                tracked.record.last_known_log_size = Some(entry.last_known_log_size as i64);
                if grew {
                    tracked.grew_at = Some(Instant::now());
                }
            }

            let _ = self
                .store
                .update_session(
                    &session_id,
                    AgentSessionPatch {
                        last_activity_at: Some(entry.last_activity_at_from_mtime),
                        last_user_message: Some(entry.last_user_message.clone()),
                        last_known_log_size: Some(Some(entry.last_known_log_size as i64)),
                        ..Default::default()
                    },
                )
                .await;
            return;
        }

        let display_name = self.derive_display_name(&entry.project_path);
        let record = AgentSessionRecord {
            session_id: entry.session_id.clone(),
            log_file_path: entry.log_path.clone(),
            project_path: entry.project_path.clone(),
            agent_type: entry.agent_type,
            display_name,
            created_at: Utc::now(),
            last_activity_at: entry.last_activity_at_from_mtime,
            current_window: None,
            last_user_message: entry.last_user_message.clone(),
            is_pinned: false,
            last_resume_error: None,
            last_known_log_size: Some(entry.last_known_log_size as i64),
            is_codex_exec: entry.is_codex_subagent,
        };

        if self.store.insert_session(record.clone()).await.is_ok() {
            info!(session_id = %record.session_id, "session-created");
            self.sessions_by_id.insert(
                record.session_id.clone(),
                TrackedSession { record, grew_at: Some(Instant::now()) },
            );
        }
    }

    async fn run_matcher_pass(&mut self) {
        if !self.config.log_match_worker {
            return;
        }
        let mut already_correlated = HashMap::new();
        for tracked in self.sessions_by_id.values() {
            if let Some(target) = &tracked.record.current_window {
                if self.windows.contains_key(target) {
                    let stable = self
                        .log_entries
                        .get(&tracked.record.log_file_path)
                        .map(|e| Some(e.last_known_log_size as i64) == tracked.record.last_known_log_size)
                        .unwrap_or(true);
                    if stable {
                        already_correlated.insert(target.clone(), tracked.record.log_file_path.clone());
                    }
                }
            }
        }

        let request = MatchRequest {
            windows: self.windows.values().cloned().collect(),
            already_correlated,
            logs: self.log_entries.values().cloned().collect(),
            scrollback_lines: self.config.scrollback_lines,
        };

        let rx = self.matcher.submit(request);
        match tokio::time::timeout(Duration::from_secs(5), rx).await {
            Ok(Ok(response)) => {
                if response.match_skipped {
                    debug!("matcher fast-path skip this tick");
                }
                for (log_path, target) in response.matches {
                    if let Some(session_id) = self
                        .sessions_by_id
                        .values()
                        .find(|t| t.record.log_file_path == log_path)
                        .map(|t| t.record.session_id.clone())
                    {
                        // Enforce single-owner: clear any other session
                        // already claiming this target.
                        for other in self.sessions_by_id.values_mut() {
                            if other.record.session_id != session_id
                                && other.record.current_window.as_deref() == Some(target.as_str())
                            {
                                other.record.current_window = None;
                            }
                        }
                        if let Some(tracked) = self.sessions_by_id.get_mut(&session_id) {
                            if tracked.record.current_window.as_deref() != Some(target.as_str()) {
                                tracked.record.current_window = Some(target.clone());
                                let _ = self
                                    .store
                                    .update_session(
                                        &session_id,
                                        AgentSessionPatch {
                                            current_window: Some(Some(target.clone())),
                                            ..Default::default()
                                        },
                                    )
                                    .await;
                            }
                        }
                    }
                }
            }
            Ok(Err(_)) => debug!("matcher result discarded (superseded by a newer request)"),
            Err(_) => warn!("matcher pass timed out this tick"),
        }
    }

    async fn orphan_dead_windows(
        &mut self,
        previous_targets: &std::collections::HashSet<String>,
        new_targets: &std::collections::HashSet<String>,
    ) {
        let closed: Vec<String> = previous_targets.difference(new_targets).cloned().collect();
        for target in &closed {
            let ids: Vec<String> = self
                .sessions_by_id
                .values()
                .filter(|t| t.record.current_window.as_deref() == Some(target.as_str()))
                .map(|t| t.record.session_id.clone())
                .collect();
            for id in ids {
                if let Some(tracked) = self.sessions_by_id.get_mut(&id) {
                    tracked.record.current_window = None;
                }
                let _ = self.store.orphan_session(&id).await;
            }
        }
    }

    async fn classify_windows(&mut self) -> HashMap<String, Status> {
        let targets: Vec<String> = self.windows.keys().cloned().collect();
        let mut statuses = HashMap::new();

        for target in targets {
            let scrollback = match self.window_adapter(&target) {
                Some(adapter) => adapter
                    .capture_pane(&target, 50)
                    .await
                    .unwrap_or_default(),
                None => String::new(),
            };

            let tracked = self
                .sessions_by_id
                .values()
                .find(|t| t.record.current_window.as_deref() == Some(target.as_str()));

            let grew_within_working_window = tracked
                .and_then(|t| t.grew_at)
                .map(|at| at.elapsed() <= self.config.working_window)
                .unwrap_or(false);
            let idle_for_at_least = tracked.map(|t| {
                let secs = (Utc::now() - t.record.last_activity_at).num_seconds().max(0) as u64;
                Duration::from_secs(secs)
            });

            let status = classify(
                &scrollback,
                ClassifierInput {
                    log_grew_within_working_window: grew_within_working_window,
                    idle_for_at_least,
                    working_window: self.config.working_window,
                    idle_window: self.config.idle_window,
                },
            );
            statuses.insert(target, status);
        }

        statuses
    }

    /// Whether a session's log has been touched recently enough that the
    /// closed-window session should be orphaned (kept, recoverable) instead
    /// of fully removed. Mirrors the `idle_window` threshold used for status
    /// classification.
    fn has_fresh_log_activity(&self, record: &crate::store::AgentSessionRecord) -> bool {
        let age = chrono::Utc::now() - record.last_activity_at;
        age.to_std().map(|age| age < self.config.idle_window).unwrap_or(false)
    }

    fn window_adapter(&self, target: &str) -> Option<Arc<dyn TmuxAdapter>> {
        if let Some(window) = self.windows.get(target) {
            if window.host.is_some() {
                return self.remote_adapters.first().cloned();
            }
        }
        Some(self.local_adapter.clone())
    }

    async fn emit_diffs(&mut self, statuses: HashMap<String, Status>) {
        let mut current_active = Vec::new();
        for (target, window) in &self.windows {
            let tracked = self
                .sessions_by_id
                .values()
                .find(|t| t.record.current_window.as_deref() == Some(target.as_str()));
            let status = statuses.get(target).copied().unwrap_or(Status::Unknown);
            current_active.push(PresentationSession::from_window_and_session(
                window,
                tracked.map(|t| &t.record),
                status,
            ));
        }

        let (created, updated, removed) = presentation::diff_sessions(&self.previous_active, &current_active);
        let shape_changed = !created.is_empty() || !removed.is_empty();

        for s in created {
            let _ = self.events_tx.send(RegistryEvent::SessionCreated(s));
        }
        for s in updated {
            let _ = self.events_tx.send(RegistryEvent::SessionUpdate(s));
        }
        for id in &removed {
            let was_pinned_or_fresh = self
                .sessions_by_id
                .values()
                .find(|t| &t.record.session_id == id)
                .map(|t| {
                    t.record.is_pinned || self.has_fresh_log_activity(&t.record)
                })
                .unwrap_or(false);
            if was_pinned_or_fresh {
                if let Some(t) = self.sessions_by_id.values().find(|t| &t.record.session_id == id) {
                    let _ = self
                        .events_tx
                        .send(RegistryEvent::SessionOrphaned(PresentationSession::from_inactive_session(&t.record)));
                }
            } else {
                let _ = self.events_tx.send(RegistryEvent::SessionRemoved { session_id: id.clone() });
            }
        }

        if shape_changed {
            let _ = self.events_tx.send(RegistryEvent::Snapshot(current_active.clone()));
            let (active, inactive) = self.partition();
            let _ = self.events_tx.send(RegistryEvent::AgentSessionsPartition { active, inactive });
        }

        self.previous_active = current_active;
    }
}
