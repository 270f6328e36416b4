//! Step controller: owns one flow's state machine.
//!
//! Each started session runs as a single task that consumes one event
//! channel. Prompt playback, listening episodes and timers run in helper
//! tasks and only ever report back through that channel, tagged with the
//! [`Ticket`] of the step entry that spawned them. All state mutation happens
//! in the session task, one event at a time, and the [`RaceResolver`] decides
//! which of a step's events is allowed to move the flow on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::navigation::Navigator;
use super::race::{RaceResolver, Ticket};
use super::step::{SessionPhase, Step};
use super::timer::{TimerSlot, TimerStats};
use crate::config::{FlowPlan, VerbalAckPlan};
use crate::error::FlowError;
use crate::speech::{SpeechRecognizer, SpeechSynthesizer};
use crate::voice::{
    CommandListener, CommandMatcher, ListenOutcome, PromptPlayer, RecognitionResult, RetryPolicy,
    RetryState,
};

/// Default broadcast channel capacity for flow notices.
const DEFAULT_NOTICE_CAPACITY: usize = 256;

/// Shown while the recognizer cannot be reached.
pub const SERVER_UNREACHABLE: &str = "Failed to connect to the server.";

/// External collaborators of a controller.
#[derive(Clone)]
pub struct FlowDeps {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub navigator: Arc<dyn Navigator>,
}

/// Snapshot of a flow for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct FlowStatus {
    pub flow: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub phase: SessionPhase,
    pub step: Step,
    pub step_index: u8,
    /// Human-readable status line.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognized_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Attempts made in the current listening episode.
    pub listen_attempts: u32,
    pub timers: TimerStats,
    pub updated_at: DateTime<Utc>,
}

impl FlowStatus {
    fn idle(flow: &str) -> Self {
        Self {
            flow: flow.to_string(),
            session_id: None,
            phase: SessionPhase::Idle,
            step: Step::Intro,
            step_index: Step::Intro.index(),
            status: "Idle".to_string(),
            recognized_text: None,
            last_error: None,
            listen_attempts: 0,
            timers: TimerStats::default(),
            updated_at: Utc::now(),
        }
    }
}

/// Events broadcast to observers (WebSocket clients, tests).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowNotice {
    SessionStarted {
        flow: String,
        session_id: Uuid,
    },
    StepChanged {
        flow: String,
        step: Step,
        index: u8,
        at: DateTime<Utc>,
    },
    CommandHeard {
        flow: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
    Navigated {
        flow: String,
        destination: String,
    },
    SessionStopped {
        flow: String,
    },
}

/// Everything the session task reacts to.
enum FlowEvent {
    Click { reply: oneshot::Sender<bool> },
    Fallback { reply: oneshot::Sender<bool> },
    Stop,
    IntroSpoken(Ticket),
    PromptSpoken(Ticket),
    TimerFired(Ticket),
    Heard {
        ticket: Ticket,
        attempt: RetryState,
        result: RecognitionResult,
    },
    EpisodeSettled {
        ticket: Ticket,
        outcome: ListenOutcome,
    },
}

struct SessionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<FlowEvent>,
    task: JoinHandle<()>,
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drives one named flow. Sessions are started and stopped explicitly by the
/// presentation layer; dropping the controller tears a running session down.
pub struct StepController {
    name: String,
    plan: Arc<FlowPlan>,
    deps: FlowDeps,
    status: Arc<RwLock<FlowStatus>>,
    notices: broadcast::Sender<FlowNotice>,
    session: Mutex<Option<SessionHandle>>,
}

impl StepController {
    pub fn new(
        name: impl Into<String>,
        plan: FlowPlan,
        deps: FlowDeps,
    ) -> Result<Arc<Self>, FlowError> {
        plan.validate()?;
        let name = name.into();
        let (notices, _rx) = broadcast::channel(DEFAULT_NOTICE_CAPACITY);
        Ok(Arc::new(Self {
            status: Arc::new(RwLock::new(FlowStatus::idle(&name))),
            name,
            plan: Arc::new(plan),
            deps,
            notices,
            session: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plan(&self) -> &FlowPlan {
        &self.plan
    }

    /// Subscribe to flow notices.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowNotice> {
        self.notices.subscribe()
    }

    pub async fn status(&self) -> FlowStatus {
        self.status.read().await.clone()
    }

    /// Id of the live session, if one is running.
    pub async fn session_id(&self) -> Option<Uuid> {
        let guard = self.session.lock().await;
        match guard.as_ref() {
            Some(handle) if self.is_live(handle).await => Some(handle.id),
            _ => None,
        }
    }

    /// A session that already exited or stopped no longer counts, even if its
    /// task has not been reaped yet.
    async fn is_live(&self, handle: &SessionHandle) -> bool {
        !handle.task.is_finished() && self.status.read().await.phase.is_running()
    }

    /// Wait out a session task that is past its last step.
    async fn reap(&self, mut handle: SessionHandle) {
        if let Err(e) = (&mut handle.task).await
            && !e.is_cancelled()
        {
            error!(flow = %self.name, error = %e, "Flow session task failed");
        }
    }

    /// Start a new session at the intro step.
    pub async fn start(&self) -> Result<Uuid, FlowError> {
        let mut guard = self.session.lock().await;
        if let Some(handle) = guard.as_ref()
            && self.is_live(handle).await
        {
            return Err(FlowError::AlreadyRunning {
                flow: self.name.clone(),
            });
        }
        if let Some(handle) = guard.take() {
            self.reap(handle).await;
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut status = self.status.write().await;
            *status = FlowStatus::idle(&self.name);
            status.session_id = Some(id);
            status.phase = SessionPhase::Running;
        }

        let session = FlowSession {
            flow: self.name.clone(),
            plan: Arc::clone(&self.plan),
            player: PromptPlayer::new(Arc::clone(&self.deps.synthesizer)),
            listener: CommandListener::new(Arc::clone(&self.deps.recognizer)),
            navigator: Arc::clone(&self.deps.navigator),
            status: Arc::clone(&self.status),
            notices: self.notices.clone(),
            events: tx.clone(),
            step: Step::Intro,
            race: RaceResolver::new(),
            timer: TimerSlot::new(),
            tasks: StepTasks::default(),
        };

        let _ = self.notices.send(FlowNotice::SessionStarted {
            flow: self.name.clone(),
            session_id: id,
        });
        info!(flow = %self.name, session_id = %id, "Flow session started");

        let task = tokio::spawn(session.run(rx));
        *guard = Some(SessionHandle { id, tx, task });
        Ok(id)
    }

    /// Tear the session down: cancel its timer, abandon its listening
    /// episode, and wait for the session task to finish.
    pub async fn stop(&self) -> Result<(), FlowError> {
        let mut guard = self.session.lock().await;
        let not_running = || FlowError::NotRunning {
            flow: self.name.clone(),
        };
        let Some(handle) = guard.take() else {
            return Err(not_running());
        };

        let live = self.is_live(&handle).await;
        let delivered = live && handle.tx.send(FlowEvent::Stop).is_ok();
        let id = handle.id;
        self.reap(handle).await;

        if delivered {
            info!(flow = %self.name, session_id = %id, "Flow session stopped");
            Ok(())
        } else {
            Err(not_running())
        }
    }

    /// Deliver a click acknowledgment. Returns whether the active step took it.
    pub async fn click(&self) -> bool {
        self.request(|reply| FlowEvent::Click { reply }).await
    }

    /// Signal that the user acknowledged through the fallback gesture.
    /// Returns whether the flow moved to the fallback step.
    pub async fn signal_fallback(&self) -> bool {
        self.request(|reply| FlowEvent::Fallback { reply }).await
    }

    async fn request<F>(&self, make: F) -> bool
    where
        F: FnOnce(oneshot::Sender<bool>) -> FlowEvent,
    {
        let tx = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(handle) => handle.tx.clone(),
                None => return false,
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(make(reply_tx)).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }
}

/// Helper tasks spawned for the current step.
#[derive(Default)]
struct StepTasks(Vec<JoinHandle<()>>);

impl StepTasks {
    fn spawn<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.0.retain(|h| !h.is_finished());
        self.0.push(tokio::spawn(fut));
    }

    fn abort_all(&mut self) {
        for handle in self.0.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for StepTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

enum Control {
    Continue,
    Finish,
}

/// State owned by the session task.
struct FlowSession {
    flow: String,
    plan: Arc<FlowPlan>,
    player: PromptPlayer,
    listener: CommandListener,
    navigator: Arc<dyn Navigator>,
    status: Arc<RwLock<FlowStatus>>,
    notices: broadcast::Sender<FlowNotice>,
    events: mpsc::UnboundedSender<FlowEvent>,
    step: Step,
    race: RaceResolver,
    timer: TimerSlot,
    tasks: StepTasks,
}

impl FlowSession {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<FlowEvent>) {
        self.enter(Step::Intro).await;

        while let Some(event) = rx.recv().await {
            if let Control::Finish = self.handle(event).await {
                break;
            }
        }

        self.cancel_all();
        debug!(flow = %self.flow, "Flow session task finished");
    }

    async fn handle(&mut self, event: FlowEvent) -> Control {
        match event {
            FlowEvent::Stop => {
                self.race.abandon();
                self.cancel_all();
                self.update_status(|s| {
                    s.phase = SessionPhase::Stopped;
                    s.status = "Stopped".to_string();
                })
                .await;
                self.notify(FlowNotice::SessionStopped {
                    flow: self.flow.clone(),
                });
                return Control::Finish;
            }

            FlowEvent::Click { reply } => {
                let Some(destination) = self.plan.click_destination(self.step).map(str::to_string)
                else {
                    debug!(flow = %self.flow, step = %self.step, "Click ignored in this step");
                    let _ = reply.send(false);
                    return Control::Continue;
                };
                if !self.race.claim(self.race.ticket()) {
                    let _ = reply.send(false);
                    return Control::Continue;
                }
                info!(flow = %self.flow, step = %self.step, "Click acknowledged");
                self.exit(destination, "Click acknowledged".to_string()).await;
                let _ = reply.send(true);
                return Control::Finish;
            }

            FlowEvent::Fallback { reply } => {
                if self.step.is_terminal() {
                    let _ = reply.send(false);
                    return Control::Continue;
                }
                self.race.abandon();
                self.cancel_all();
                self.transition(Step::Fallback).await;
                let _ = reply.send(true);
            }

            FlowEvent::IntroSpoken(ticket) => {
                if self.race.claim(ticket) {
                    self.cancel_all();
                    let next = self.plan.after_intro();
                    self.transition(next).await;
                } else {
                    self.stale("intro_spoken", ticket);
                }
            }

            FlowEvent::PromptSpoken(ticket) => {
                if self.race.is_live(ticket) {
                    self.arm_step(ticket).await;
                } else {
                    self.stale("prompt_spoken", ticket);
                }
            }

            FlowEvent::TimerFired(ticket) => {
                if !self.race.claim(ticket) {
                    self.stale("timer_fired", ticket);
                    return Control::Continue;
                }
                self.timer.mark_fired();
                self.cancel_all();
                let next = match self.step {
                    Step::AwaitVisualAck => self.plan.after_visual_timeout(),
                    Step::AwaitVerbalAck => Step::Intro,
                    other => {
                        error!(flow = %self.flow, step = %other, "Timer fired in a step that never arms one");
                        return Control::Continue;
                    }
                };
                info!(flow = %self.flow, step = %self.step, next = %next, "Step timed out");
                self.transition(next).await;
            }

            FlowEvent::Heard {
                ticket,
                attempt,
                result,
            } => {
                if self.race.is_live(ticket) {
                    self.record_heard(attempt, result).await;
                } else {
                    self.stale("heard", ticket);
                }
            }

            FlowEvent::EpisodeSettled { ticket, outcome } => {
                if let ListenOutcome::Abandoned { .. } = outcome {
                    return Control::Continue;
                }
                if !self.race.claim(ticket) {
                    self.stale("episode_settled", ticket);
                    return Control::Continue;
                }
                self.cancel_all();
                match outcome {
                    ListenOutcome::Matched { command, attempts } => {
                        info!(flow = %self.flow, command = %command, attempts, "Verbal acknowledgment recognized");
                        let Some(verbal) = self.plan.verbal_ack.as_ref() else {
                            return Control::Continue;
                        };
                        let destination = verbal.destination.clone();
                        let line = format!(
                            "{} command recognized",
                            CommandMatcher::phrase(&verbal.phrase).as_str()
                        );
                        self.exit(destination, line).await;
                        return Control::Finish;
                    }
                    ListenOutcome::Exhausted { attempts } => {
                        info!(flow = %self.flow, attempts, "No verbal acknowledgment, restarting flow");
                        self.transition(Step::Intro).await;
                    }
                    ListenOutcome::Abandoned { .. } => {}
                }
            }
        }
        Control::Continue
    }

    fn stale(&self, event: &str, ticket: Ticket) {
        debug!(
            flow = %self.flow,
            event,
            round = ticket.round(),
            step = %self.step,
            "Ignoring event from a settled step"
        );
    }

    fn notify(&self, notice: FlowNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    async fn update_status<F>(&self, apply: F)
    where
        F: FnOnce(&mut FlowStatus),
    {
        let mut status = self.status.write().await;
        apply(&mut status);
        status.timers = self.timer.stats();
        status.updated_at = Utc::now();
    }

    /// Stop everything armed for the current step.
    fn cancel_all(&mut self) {
        self.timer.cancel();
        self.tasks.abort_all();
    }

    async fn transition(&mut self, to: Step) {
        if !self.step.can_transition_to(to) {
            let err = FlowError::InvalidTransition {
                flow: self.flow.clone(),
                from: self.step,
                to,
            };
            error!(error = %err, "Refusing step transition");
            return;
        }
        self.enter(to).await;
    }

    async fn enter(&mut self, step: Step) {
        self.step = step;
        let ticket = self.race.arm();
        let line = self.status_line(step);
        info!(flow = %self.flow, step = %step, round = ticket.round(), "Entered step");

        self.update_status(|s| {
            s.step = step;
            s.step_index = step.index();
            s.status = line;
            s.listen_attempts = 0;
        })
        .await;
        self.notify(FlowNotice::StepChanged {
            flow: self.flow.clone(),
            step,
            index: step.index(),
            at: Utc::now(),
        });

        let player = self.player.clone();
        let tx = self.events.clone();
        match step {
            Step::Intro => {
                let prompts = self.plan.intro.clone();
                self.tasks.spawn(async move {
                    player.speak_all(&prompts).await;
                    let _ = tx.send(FlowEvent::IntroSpoken(ticket));
                });
            }
            Step::AwaitVisualAck | Step::AwaitVerbalAck => {
                let prompt = match step {
                    Step::AwaitVisualAck => self.plan.visual_ack.as_ref().map(|v| v.prompt.clone()),
                    _ => self.plan.verbal_ack.as_ref().and_then(|v| v.prompt.clone()),
                };
                self.tasks.spawn(async move {
                    if let Some(prompt) = prompt {
                        player.speak(&prompt).await;
                    }
                    let _ = tx.send(FlowEvent::PromptSpoken(ticket));
                });
            }
            Step::Fallback => {
                if let Some(prompt) = self.plan.fallback_prompt.clone() {
                    self.tasks.spawn(async move {
                        player.speak(&prompt).await;
                    });
                }
            }
        }
    }

    fn status_line(&self, step: Step) -> String {
        match step {
            Step::Intro => "Speaking introduction".to_string(),
            Step::AwaitVisualAck => "Waiting for a click".to_string(),
            Step::AwaitVerbalAck => match &self.plan.verbal_ack {
                Some(verbal) => format!(
                    "Listening for \"{}\"...",
                    CommandMatcher::phrase(&verbal.phrase).as_str()
                ),
                None => "Listening".to_string(),
            },
            Step::Fallback => "Waiting for fallback acknowledgment".to_string(),
        }
    }

    /// The step's prompt has been dispatched; start its timer (and episode).
    async fn arm_step(&mut self, ticket: Ticket) {
        match self.step {
            Step::AwaitVisualAck => {
                if let Some(visual) = self.plan.visual_ack.as_ref() {
                    let timeout = visual.timeout();
                    self.arm_timer(ticket, timeout);
                }
            }
            Step::AwaitVerbalAck => {
                if let Some(verbal) = self.plan.verbal_ack.clone() {
                    self.arm_timer(ticket, verbal.timeout());
                    self.spawn_episode(ticket, &verbal);
                }
            }
            Step::Intro | Step::Fallback => {}
        }
        self.update_status(|_| {}).await;
    }

    fn arm_timer(&mut self, ticket: Ticket, timeout: std::time::Duration) {
        let tx = self.events.clone();
        self.timer.schedule(timeout, move || {
            let _ = tx.send(FlowEvent::TimerFired(ticket));
        });
    }

    fn spawn_episode(&mut self, ticket: Ticket, verbal: &VerbalAckPlan) {
        let policy = RetryPolicy::new(self.listener.clone(), verbal.max_attempts)
            .with_pause(verbal.attempt_pause());
        let matcher = CommandMatcher::phrase(&verbal.phrase);
        let grace = verbal.listen_after();
        let token = self.race.token();
        let tx = self.events.clone();

        debug!(flow = %self.flow, phrase = %matcher.as_str(), max_attempts = policy.max_attempts(), "Listening episode started");
        self.tasks.spawn(async move {
            if !grace.is_zero() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(grace) => {}
                }
            }
            let heard_tx = tx.clone();
            let outcome = policy
                .listen_observed(
                    |command| matcher.matches(command),
                    &token,
                    |attempt, result| {
                        let _ = heard_tx.send(FlowEvent::Heard {
                            ticket,
                            attempt: *attempt,
                            result: result.clone(),
                        });
                    },
                )
                .await;
            let _ = tx.send(FlowEvent::EpisodeSettled { ticket, outcome });
        });
    }

    async fn record_heard(&mut self, attempt: RetryState, result: RecognitionResult) {
        if result.is_transport_failure() {
            warn!(flow = %self.flow, attempt = attempt.attempts_made, "Recognizer unreachable");
        }
        let command = result.command.clone();
        let success = result.success;
        self.update_status(|s| {
            s.listen_attempts = attempt.attempts_made;
            if result.is_transport_failure() {
                s.last_error = Some(SERVER_UNREACHABLE.to_string());
            } else {
                s.last_error = None;
            }
            if let Some(command) = result.command {
                s.recognized_text = Some(command);
            }
            if let Some(message) = result.message {
                s.status = message;
            }
        })
        .await;
        self.notify(FlowNotice::CommandHeard {
            flow: self.flow.clone(),
            success,
            command,
        });
    }

    /// Leave the flow and hand the user to `destination`.
    async fn exit(&mut self, destination: String, line: String) {
        self.race.abandon();
        self.cancel_all();
        let phase = SessionPhase::Exited {
            destination: destination.clone(),
        };
        self.update_status(|s| {
            s.phase = phase;
            s.status = line;
        })
        .await;
        info!(flow = %self.flow, destination = %destination, "Flow session exiting");
        self.notify(FlowNotice::Navigated {
            flow: self.flow.clone(),
            destination: destination.clone(),
        });
        self.navigator.go_to(&self.flow, &destination).await;
    }
}
