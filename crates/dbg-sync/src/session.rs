//! Session controller.
//!
//! Owns the attach/detach lifecycle, runs the post-attach synchronization and turns remote
//! events into store updates and host notifications.
//!
//! Every remote call suspends the caller. Before a continuation touches state it checks
//! that the session it started under is still the current one, so responses that land
//! after a detach are dropped.
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::breakpoints::{self, Ack, BreakpointRegistry};
use crate::client::{DebugClient, NORMAL_SCRIPTS};
use crate::config::SessionConfig;
use crate::connection::{Connection, EventHandler, SubscriptionId};
use crate::error::{Result, SyncError};
use crate::model::{FrameRecord, ScriptRecord, UiBreakpoint};
use crate::notify::{Host, Notification, RunState};
use crate::paths::PathMapper;
use crate::protocol::{AfterCompileBody, Event, ExceptionEventBody, RemoteBreakpoint};
use crate::scripts::ScriptIndex;
use crate::serialize::{script_record, serialize_variable};
use crate::stack::{self, ReconcileMode};
use crate::store::{Node, read};
use crate::transport::Transport;

/// Lifecycle phase. While attached, [`SessionController::run_state`] tells running from
/// stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Detached,
    Attaching,
    Attached,
    Detaching,
}

const SUBSCRIBED_EVENTS: [&str; 4] = [
    Event::CHANGE_RUNNING,
    Event::BREAK,
    Event::EXCEPTION,
    Event::AFTER_COMPILE,
];

struct Session {
    client: DebugClient,
    subscriptions: Vec<SubscriptionId>,
    registry: BreakpointRegistry,
}

struct ControllerState {
    phase: SessionPhase,
    /// Bumped on every attach and detach.
    generation: u64,
    session: Option<Session>,
    active_frame: Option<Node<FrameRecord>>,
    run_state: Option<RunState>,
    paths: PathMapper,
    scripts: ScriptIndex,
}

impl ControllerState {
    fn session(&self, generation: u64) -> Option<&Session> {
        self.session.as_ref().filter(|_| self.generation == generation)
    }
}

struct Inner {
    config: SessionConfig,
    host: Host,
    transport: Arc<dyn Transport>,
    state: Mutex<ControllerState>,
}

/// Cloneable handle to the single debug session of a host.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionController")
            .field("phase", &state.phase)
            .field("generation", &state.generation)
            .field("run_state", &state.run_state)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(config: SessionConfig, host: Host, transport: Arc<dyn Transport>) -> Self {
        let paths = PathMapper::from_config(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                host,
                transport,
                state: Mutex::new(ControllerState {
                    phase: SessionPhase::Detached,
                    generation: 0,
                    session: None,
                    active_frame: None,
                    run_state: None,
                    paths,
                    scripts: ScriptIndex::new(),
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Locks the state only if `generation` is still the live session.
    fn lock_current(&self, generation: u64, command: &str) -> Result<MutexGuard<'_, ControllerState>> {
        let state = self.lock();
        if state.session(generation).is_some() {
            Ok(state)
        } else {
            debug!(generation, command, "Dropping result for a defunct session");
            Err(SyncError::Detached(command.to_string()))
        }
    }

    fn publish(&self, notification: Notification) {
        self.inner.host.notifier.publish(notification);
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn is_attached(&self) -> bool {
        self.lock().session.is_some()
    }

    /// `None` while no process is attached.
    pub fn run_state(&self) -> Option<RunState> {
        self.lock().run_state
    }

    pub fn active_frame(&self) -> Option<Node<FrameRecord>> {
        self.lock().active_frame.clone()
    }

    /// Location keys of the breakpoints currently registered remotely.
    pub fn registered_breakpoints(&self) -> Vec<String> {
        self.lock()
            .session
            .as_ref()
            .map(|session| session.registry.locations())
            .unwrap_or_default()
    }

    pub fn set_strip(&self, strip_prefix: &str) {
        self.lock().paths.set_strip(strip_prefix);
    }

    /// Selects the frame the host inspects.
    pub fn set_frame(&self, frame: Option<Node<FrameRecord>>) {
        self.lock().active_frame = frame.clone();
        self.publish(Notification::FrameChanged { frame });
    }

    fn current_generation(&self) -> Result<u64> {
        let state = self.lock();
        match state.session {
            Some(_) => Ok(state.generation),
            None => Err(SyncError::NotAttached),
        }
    }

    fn client_for(&self, generation: u64) -> Result<DebugClient> {
        self.lock()
            .session(generation)
            .map(|session| session.client.clone())
            .ok_or(SyncError::NotAttached)
    }

    pub(crate) fn client(&self) -> Result<DebugClient> {
        self.lock()
            .session
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or(SyncError::NotAttached)
    }

    pub(crate) fn with_scripts<T>(&self, f: impl FnOnce(&PathMapper, &ScriptIndex) -> T) -> T {
        let state = self.lock();
        f(&state.paths, &state.scripts)
    }

    /// Opens the transport, subscribes to remote events and synchronizes scripts, stack and
    /// breakpoints.
    ///
    /// Returns once the session is live. Synchronization failures are logged; the session
    /// stays attached. Attaching while a session exists is a no-op.
    pub async fn attach(&self) -> Result<()> {
        let generation = {
            let mut state = self.lock();
            if state.phase != SessionPhase::Detached {
                debug!(phase = ?state.phase, "Ignoring attach, session already active");
                return Ok(());
            }
            state.phase = SessionPhase::Attaching;
            state.generation += 1;
            state.generation
        };

        let inbound = match self.inner.transport.attach().await {
            Ok(inbound) => inbound,
            Err(e) => {
                error!(error = %e, "Failed to attach to debug endpoint");
                let mut state = self.lock();
                if state.generation == generation {
                    state.phase = SessionPhase::Detached;
                }
                return Err(SyncError::AttachFailure(e));
            }
        };

        let connection = Arc::new(Connection::new(Arc::clone(&self.inner.transport), inbound));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscriptions = SUBSCRIBED_EVENTS
            .iter()
            .map(|name| {
                let events_tx = events_tx.clone();
                let handler: EventHandler = Arc::new(move |event: &Event| {
                    let _ = events_tx.send(event.clone());
                });
                connection.subscribe(name, handler)
            })
            .collect::<Vec<_>>();
        drop(events_tx);

        let installed = {
            let mut state = self.lock();
            if state.generation == generation {
                state.session = Some(Session {
                    client: DebugClient::new(Arc::clone(&connection)),
                    subscriptions,
                    registry: BreakpointRegistry::default(),
                });
                state.phase = SessionPhase::Attached;
                true
            } else {
                false
            }
        };
        if !installed {
            // detached while the transport was opening
            connection.shutdown();
            if let Err(e) = self.inner.transport.detach().await {
                warn!(error = %e, "Failed to close abandoned transport");
            }
            return Err(SyncError::Detached("attach".to_string()));
        }

        tokio::spawn(run_events(
            Arc::downgrade(&self.inner),
            generation,
            events_rx,
            connection.closed(),
        ));

        info!(generation, "Attached to debug endpoint");
        self.set_frame(None);
        self.publish(Notification::Attached);
        self.recompute_state();

        if let Err(e) = self.sync_after_attach(generation).await {
            warn!(error = %e, "Post-attach synchronization did not complete");
        }
        Ok(())
    }

    /// Loads scripts, rebuilds the stack, registers breakpoints and hides the remote's own
    /// initial stop, strictly in that order.
    ///
    /// Only a failed script load ends the sequence early. Later failures are logged and
    /// the remaining steps still run.
    async fn sync_after_attach(&self, generation: u64) -> Result<()> {
        self.load_scripts(generation).await?;

        if let Err(e) = self.refresh_stack(generation, ReconcileMode::Rebuild).await {
            warn!(error = %e, "Failed to fetch the initial stack");
        }
        if let Err(e) = self.reconcile_breakpoints(generation).await {
            warn!(error = %e, "Failed to register breakpoints");
        }
        let suppressed = match self.client_for(generation)?.list_breakpoints().await {
            Ok(listed) => {
                self.suppress_initial_stop(generation, &listed.breakpoints)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = suppressed {
            warn!(error = %e, "Failed to apply the initial stop policy");
        }

        let frame = {
            let state = self.lock_current(generation, "attach")?;
            state.active_frame.clone()
        };
        self.publish(Notification::Break { frame });
        self.recompute_state();
        Ok(())
    }

    async fn load_scripts(&self, generation: u64) -> Result<()> {
        let scripts = self
            .client_for(generation)?
            .scripts(NORMAL_SCRIPTS, None, false)
            .await?;

        let mut state = self.lock_current(generation, "scripts")?;
        let records = scripts
            .iter()
            .filter(|script| {
                !script
                    .name
                    .as_deref()
                    .is_some_and(|name| self.inner.config.is_excluded(name))
            })
            .map(|script| script_record(script, &state.paths))
            .collect::<Vec<_>>();
        state.scripts.load(&records);
        debug!(loaded = state.scripts.len(), total = scripts.len(), "Loaded scripts");
        self.inner.host.sources.load(records);
        Ok(())
    }

    /// Fetches a backtrace, reconciles the stack store and makes its top frame active.
    async fn refresh_stack(
        &self,
        generation: u64,
        mode: ReconcileMode,
    ) -> Result<Option<Node<FrameRecord>>> {
        let (body, refs) = self
            .client_for(generation)?
            .backtrace(None, None, None, true)
            .await?;

        let top = {
            let mut state = self.lock_current(generation, "backtrace")?;
            let (_, top) = stack::reconcile(
                self.inner.host.stack.as_ref(),
                &body.frames,
                &refs,
                &state.paths,
                mode,
            );
            state.active_frame = top.clone();
            top
        };
        self.publish(Notification::FrameChanged { frame: top.clone() });
        Ok(top)
    }

    /// Refreshes the stack, patching frames in place when the stack is unchanged.
    pub async fn backtrace(&self) -> Result<Option<Node<FrameRecord>>> {
        let generation = self.current_generation()?;
        self.refresh_stack(generation, ReconcileMode::Incremental)
            .await
    }

    /// Registers the host's breakpoints remotely. Completes once every add is acknowledged.
    pub async fn update_breakpoints(&self) -> Result<()> {
        let generation = self.current_generation()?;
        self.reconcile_breakpoints(generation).await
    }

    async fn reconcile_breakpoints(&self, generation: u64) -> Result<()> {
        let desired = self
            .inner
            .host
            .breakpoints
            .all()
            .iter()
            .map(|node| read(node).clone())
            .collect::<Vec<UiBreakpoint>>();

        let (client, plan) = {
            let mut guard = self.lock_current(generation, "update_breakpoints")?;
            let ControllerState {
                session,
                scripts,
                paths,
                ..
            } = &mut *guard;
            let Some(session) = session.as_mut() else {
                return Err(SyncError::NotAttached);
            };
            let mut plan = breakpoints::plan(&desired, &session.registry, |path| {
                scripts
                    .name_for_path(path)
                    .map(str::to_string)
                    .or_else(|| paths.remote_name_for_path(path))
            });
            session.registry = std::mem::take(&mut plan.registry);
            debug!(registered = session.registry.len(), "Breakpoint registry replaced");
            (session.client.clone(), plan)
        };
        debug!(
            add = plan.add.len(),
            remove = plan.remove.len(),
            kept = plan.kept,
            "Reconciling breakpoints"
        );

        for stale in &plan.remove {
            if let Some(id) = stale.id {
                spawn_clear(&client, id, &stale.location);
            }
        }

        let acks = join_all(plan.add.iter().map(|breakpoint| {
            let client = &client;
            async move { (breakpoint, client.set_breakpoint(&breakpoint.set_args()).await) }
        }))
        .await;

        for (breakpoint, ack) in acks {
            match ack {
                Ok(ack) => {
                    let Ok(mut state) = self.lock_current(generation, "setbreakpoint") else {
                        continue;
                    };
                    let Some(session) = state.session.as_mut() else {
                        continue;
                    };
                    if let Ack::Orphaned(id) = session.registry.apply_ack(&ack, &breakpoint.location) {
                        spawn_clear(&client, id, &breakpoint.location);
                    }
                }
                Err(e) => warn!(error = %e, location = %breakpoint.location, "Failed to set breakpoint"),
            }
        }
        Ok(())
    }

    /// Continues past the remote's implicit first-line stop unless the host has an enabled
    /// breakpoint at that location.
    async fn suppress_initial_stop(
        &self,
        generation: u64,
        remote: &[RemoteBreakpoint],
    ) -> Result<()> {
        let Some(first) = remote.first() else {
            return Ok(());
        };
        let (client, frame) = {
            let state = self.lock_current(generation, "listbreakpoints")?;
            match (state.session(generation), &state.active_frame) {
                (Some(session), Some(frame)) => (session.client.clone(), Arc::clone(frame)),
                _ => return Ok(()),
            }
        };
        let sentinel = self.inner.config.sentinel_breakpoint;
        if first.number != sentinel {
            return Ok(());
        }

        let (line, path) = {
            let frame = read(&frame);
            (frame.line, frame.script_path.clone())
        };
        let requested = self
            .inner
            .host
            .breakpoints
            .query_node(&|bp| bp.enabled && bp.line == line && bp.path == path);
        if requested.is_some() {
            return Ok(());
        }

        debug!(line, path = %path, "Continuing past the initial stop");
        let clearing = client.clone();
        tokio::spawn(async move {
            if let Err(e) = clearing.clear_breakpoint(sentinel).await {
                warn!(error = %e, "Failed to clear sentinel breakpoint");
            }
        });
        client.continue_script(None, None).await?;

        if self.lock_current(generation, "continue").is_ok() {
            self.recompute_state();
        }
        Ok(())
    }

    /// Derives the run state from the remote running flag. Anything but stopped clears the
    /// active frame.
    fn recompute_state(&self) {
        let run_state = {
            let mut state = self.lock();
            let run_state = state.session.as_ref().map(|session| {
                if session.client.is_running() {
                    RunState::Running
                } else {
                    RunState::Stopped
                }
            });
            state.run_state = run_state;
            run_state
        };
        debug!(state = ?run_state, "Run state recomputed");
        self.publish(Notification::StateChanged { state: run_state });
        if run_state != Some(RunState::Stopped) {
            self.set_frame(None);
        }
    }

    async fn handle_event(&self, generation: u64, event: Event) {
        if self.lock_current(generation, &event.event).is_err() {
            return;
        }
        debug!(event = %event.event, "Handling remote event");

        match event.event.as_str() {
            Event::CHANGE_RUNNING => self.recompute_state(),
            Event::BREAK => match self.refresh_stack(generation, ReconcileMode::Incremental).await {
                Ok(frame) => self.publish(Notification::Break { frame }),
                Err(e) => warn!(error = %e, "Failed to refresh stack on break"),
            },
            Event::EXCEPTION => {
                let body = decode_body::<ExceptionEventBody>(&event).unwrap_or_default();
                match self.refresh_stack(generation, ReconcileMode::Incremental).await {
                    Ok(frame) => self.publish(Notification::Exception {
                        frame,
                        exception: serialize_variable("exception", &body.exception),
                    }),
                    Err(e) => warn!(error = %e, "Failed to refresh stack on exception"),
                }
            }
            Event::AFTER_COMPILE => {
                if let Some(body) = decode_body::<AfterCompileBody>(&event) {
                    self.upsert_script(generation, body);
                }
            }
            other => debug!(event = other, "Ignoring unsubscribed event"),
        }
    }

    fn upsert_script(&self, generation: u64, body: AfterCompileBody) {
        if body
            .script
            .name
            .as_deref()
            .is_some_and(|name| self.inner.config.is_excluded(name))
        {
            return;
        }
        let Ok(mut state) = self.lock_current(generation, Event::AFTER_COMPILE) else {
            return;
        };
        let record = script_record(&body.script, &state.paths);
        let sources = &self.inner.host.sources;
        for previous in sources.query_nodes(&|script: &ScriptRecord| script.script_id == record.script_id) {
            sources.remove(&previous);
        }
        debug!(script_id = record.script_id, name = %record.name, "Script compiled");
        state.scripts.upsert(record.clone());
        sources.append(record);
    }

    async fn on_transport_closed(&self, generation: u64) {
        if self.lock_current(generation, "transport").is_err() {
            return;
        }
        warn!(generation, "Transport closed, detaching");
        if let Err(e) = self.detach().await {
            warn!(error = %e, "Implicit detach failed");
        }
    }

    /// Tears the session down.
    ///
    /// Local state (no active frame, no run state) is final before the transport is asked
    /// to detach; a transport error is logged and returned but never undoes it.
    pub async fn detach(&self) -> Result<()> {
        let session = {
            let mut state = self.lock();
            state.active_frame = None;
            state.generation += 1;
            let session = state.session.take();
            state.phase = if session.is_some() {
                SessionPhase::Detaching
            } else {
                SessionPhase::Detached
            };
            session
        };
        self.set_frame(None);

        let Some(session) = session else {
            return Ok(());
        };
        let connection = Arc::clone(session.client.connection());
        for id in session.subscriptions {
            connection.unsubscribe(id);
        }
        self.recompute_state();
        connection.shutdown();

        let result = self.inner.transport.detach().await;
        {
            let mut state = self.lock();
            if state.phase == SessionPhase::Detaching {
                state.phase = SessionPhase::Detached;
            }
        }
        info!("Detached from debug endpoint");
        result.map_err(|e| {
            warn!(error = %e, "Transport detach failed");
            SyncError::Transport(e)
        })
    }
}

/// Clears a remote breakpoint without waiting for the answer.
fn spawn_clear(client: &DebugClient, id: u64, location: &str) {
    let client = client.clone();
    let location = location.to_string();
    tokio::spawn(async move {
        if let Err(e) = client.clear_breakpoint(id).await {
            warn!(error = %e, id, location = %location, "Failed to clear breakpoint");
        }
    });
}

fn decode_body<T: DeserializeOwned>(event: &Event) -> Option<T> {
    serde_json::from_value(event.body.clone())
        .map_err(|e| warn!(error = %e, event = %event.event, "Malformed event body"))
        .ok()
}

/// Serially handles the events of one session until it ends.
async fn run_events(
    inner: Weak<Inner>,
    generation: u64,
    mut events: UnboundedReceiver<Event>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let (Some(event), Some(inner)) = (event, inner.upgrade()) else {
                    break;
                };
                SessionController { inner }.handle_event(generation, event).await;
            }
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    if let Some(inner) = inner.upgrade() {
                        SessionController { inner }.on_transport_closed(generation).await;
                    }
                    break;
                }
            }
        }
    }
    debug!(generation, "Event loop finished");
}
