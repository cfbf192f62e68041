//! [`Dispatcher`] – the run state machine.
//!
//! States: `Idle → AwaitingPath → Ready → Running → Finished`, with
//! `Running → Idle` on STOP and `Error` reachable from any active state.
//!
//! The dispatcher is an actor: it consumes one serialized [`HubEvent`]
//! channel and is the sole mutator of [`RunContext`]. Long operations never
//! block the event loop: path requests, motion dispatches, captures and
//! stitches are spawned, and their completions return as events on the same
//! channel. That keeps a `STOP` serviceable while a command is outstanding:
//! the queue is cleared immediately and [`MotionHandle::halt`] puts `STOP`
//! on the wire ahead of the cancelled wait.
//!
//! Single-flight: at most one command is outstanding at any instant,
//! tracked by the `in_flight` slot; the next command is popped only after
//! the previous acknowledgement (or capture result) has been consumed.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wayhub_link::{MotionHandle, OperatorHandle};
use wayhub_planner::{ApiError, Planner};
use wayhub_types::{
    messages, Command, Envelope, ImageRecResult, LinkError, Obstacle, ObstacleLayout, Opcode,
    RobotPose, RunStatus,
};

use crate::capture::{CaptureError, CaptureWorker};
use crate::event::HubEvent;
use crate::tracker;

/// What to do when an acknowledgement times out mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Transition to [`RunState::Error`] with the queue preserved; the
    /// operator re-issues `start` to resume from the failed command.
    Halt,
    /// Re-dispatch the timed-out frame up to `attempts` times in total,
    /// then halt.
    Resend { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Pose the tracker starts every fresh run from.
    pub start_pose: RobotPose,
    /// Arena bounds; layout coordinates outside `[0, w) x [0, h)` are
    /// rejected.
    pub arena: (i32, i32),
    pub recovery: RecoveryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            start_pose: RobotPose::new(1, 1, wayhub_types::Direction::North),
            arena: (20, 20),
            recovery: RecoveryPolicy::Halt,
        }
    }
}

/// Dispatcher state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    AwaitingPath,
    Ready,
    Running,
    Finished,
    Error,
}

#[derive(Debug, Clone, Copy)]
enum InFlight {
    Motion { command: Command, attempt: u32 },
    Capture { obstacle_id: u8 },
}

/// Everything a run mutates, owned exclusively by the dispatcher task.
struct RunContext {
    run_id: Uuid,
    state: RunState,
    queue: VecDeque<Command>,
    obstacles: Vec<Obstacle>,
    mode: String,
    pose: RobotPose,
    executed: u32,
    in_flight: Option<InFlight>,
    /// Image ids captured during the current run, stitched on FIN.
    captured: Vec<String>,
}

pub struct Dispatcher {
    ctx: RunContext,
    config: DispatcherConfig,
    operator: OperatorHandle,
    motion: MotionHandle,
    planner: Arc<dyn Planner>,
    capture: Arc<CaptureWorker>,
    /// Completions from spawned sub-tasks come back through here.
    events: mpsc::Sender<HubEvent>,
}

impl Dispatcher {
    pub fn new(
        operator: OperatorHandle,
        motion: MotionHandle,
        planner: Arc<dyn Planner>,
        capture: Arc<CaptureWorker>,
        events: mpsc::Sender<HubEvent>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            ctx: RunContext {
                run_id: Uuid::new_v4(),
                state: RunState::Idle,
                queue: VecDeque::new(),
                obstacles: Vec::new(),
                mode: String::new(),
                pose: config.start_pose,
                executed: 0,
                in_flight: None,
                captured: Vec::new(),
            },
            config,
            operator,
            motion,
            planner,
            capture,
            events,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors (for wiring and tests)
    // -----------------------------------------------------------------------

    pub fn state(&self) -> RunState {
        self.ctx.state
    }

    pub fn pose(&self) -> RobotPose {
        self.ctx.pose
    }

    pub fn queue_len(&self) -> usize {
        self.ctx.queue.len()
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Drive the hub until the event channel closes or a shutdown event
    /// arrives.
    pub async fn run(mut self, mut rx: mpsc::Receiver<HubEvent>) {
        while let Some(event) = rx.recv().await {
            let shutdown = matches!(event, HubEvent::Shutdown);
            self.handle(event).await;
            if shutdown {
                break;
            }
        }
        info!("dispatcher exiting");
    }

    /// Apply one event. Transitions are serialized because only the
    /// dispatcher task calls this.
    pub async fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Operator(Envelope::Obstacle(layout)) => self.on_layout(layout).await,
            HubEvent::Operator(Envelope::Control(verb)) => match verb.as_str() {
                "start" => self.on_start().await,
                "stop" => self.on_stop().await,
                other => {
                    warn!(%other, "unrecognised control verb");
                    self.notify(Envelope::error(messages::MALFORMED_MESSAGE)).await;
                }
            },
            HubEvent::Operator(other) => {
                // The link already filters these; nothing to do but log.
                warn!(?other, "unexpected operator envelope");
            }
            HubEvent::OperatorConnected { reconnect } => {
                let text = if reconnect {
                    messages::RECONNECTED
                } else {
                    messages::CONNECTED
                };
                self.notify(Envelope::info(text)).await;
            }
            HubEvent::PlanReady(result) => self.on_plan(result).await,
            HubEvent::MotionResult(result) => self.on_motion_result(result).await,
            HubEvent::CaptureDone(result) => self.on_capture_done(result).await,
            HubEvent::StitchDone(result) => self.on_stitch_done(result).await,
            HubEvent::Shutdown => {
                info!("shutdown requested");
                self.halt_run().await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Layout intake
    // -----------------------------------------------------------------------

    async fn on_layout(&mut self, layout: ObstacleLayout) {
        match self.ctx.state {
            RunState::Idle | RunState::Finished | RunState::Error => {}
            RunState::AwaitingPath | RunState::Ready | RunState::Running => {
                warn!(state = ?self.ctx.state, "layout rejected mid-run");
                self.notify(Envelope::error(messages::LAYOUT_DURING_RUN)).await;
                return;
            }
        }

        if let Err(reason) = validate_layout(&layout.obstacles, self.config.arena) {
            warn!(%reason, "malformed layout rejected");
            self.notify(Envelope::error(messages::MALFORMED_LAYOUT)).await;
            return;
        }

        info!(
            obstacles = layout.obstacles.len(),
            mode = %layout.mode,
            "layout received, requesting path"
        );
        self.ctx.obstacles = layout.obstacles;
        self.ctx.mode = layout.mode;
        self.ctx.queue.clear();
        self.ctx.state = RunState::AwaitingPath;

        let planner = Arc::clone(&self.planner);
        let events = self.events.clone();
        let obstacles = self.ctx.obstacles.clone();
        let mode = self.ctx.mode.clone();
        tokio::spawn(async move {
            let result = planner.request_path(&obstacles, &mode).await;
            let _ = events.send(HubEvent::PlanReady(result)).await;
        });
    }

    async fn on_plan(&mut self, result: Result<wayhub_types::Plan, ApiError>) {
        if self.ctx.state != RunState::AwaitingPath {
            debug!(state = ?self.ctx.state, "stale plan response discarded");
            return;
        }
        match result {
            Ok(plan) => {
                info!(commands = plan.commands.len(), "path ready");
                self.ctx.queue = plan.commands;
                self.ctx.state = RunState::Ready;
                self.notify(Envelope::info(messages::PATH_READY)).await;
            }
            Err(e) => {
                error!(error = %e, "path request failed");
                self.ctx.state = RunState::Idle;
                self.notify(Envelope::error(messages::PATH_FAILED)).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Run control
    // -----------------------------------------------------------------------

    async fn on_start(&mut self) {
        match self.ctx.state {
            RunState::Running | RunState::AwaitingPath => {
                self.notify(Envelope::error(messages::ALREADY_RUNNING)).await;
                return;
            }
            RunState::Ready | RunState::Idle | RunState::Finished | RunState::Error => {}
        }

        if self.ctx.queue.is_empty() {
            warn!("start refused, command queue empty");
            self.notify(Envelope::error(messages::EMPTY_QUEUE)).await;
            return;
        }

        if self.ctx.state == RunState::Error {
            // Operator-directed retry: resume from the failed command with
            // the pose accumulated so far.
            info!(run_id = %self.ctx.run_id, "resuming run after error");
        } else {
            self.ctx.run_id = Uuid::new_v4();
            self.ctx.pose = self.config.start_pose;
            self.ctx.executed = 0;
            self.ctx.captured.clear();
            info!(run_id = %self.ctx.run_id, commands = self.ctx.queue.len(), "run started");
        }

        self.ctx.state = RunState::Running;
        self.notify(Envelope::Status(RunStatus::Running)).await;
        self.pump().await;
    }

    async fn on_stop(&mut self) {
        info!(remaining = self.ctx.queue.len(), "stop requested");
        self.halt_run().await;
        self.notify(Envelope::info(messages::STOPPED)).await;
    }

    /// Out-of-band halt: `STOP` goes on the wire immediately, the queue is
    /// drained without further sends, and state returns to `Idle`.
    async fn halt_run(&mut self) {
        self.motion.halt();
        self.ctx.queue.clear();
        self.ctx.in_flight = None;
        self.ctx.state = RunState::Idle;
    }

    // -----------------------------------------------------------------------
    // Queue draining
    // -----------------------------------------------------------------------

    /// Pop and dispatch the head command unless one is already in flight.
    async fn pump(&mut self) {
        while self.ctx.state == RunState::Running && self.ctx.in_flight.is_none() {
            let Some(command) = self.ctx.queue.pop_front() else {
                // Planner queues end with FIN; an exhausted queue without it
                // still finishes the run rather than hanging.
                warn!("queue exhausted without FIN");
                self.finish_run().await;
                return;
            };

            match command.opcode {
                Opcode::Snap { obstacle_id } => {
                    let Some(target) = self.resolve_snap_target(obstacle_id) else {
                        warn!(?obstacle_id, "SNAP target not in current layout, skipped");
                        self.notify(Envelope::error(messages::CAPTURE_FAILED)).await;
                        continue;
                    };
                    self.ctx.in_flight = Some(InFlight::Capture {
                        obstacle_id: target,
                    });
                    let worker = Arc::clone(&self.capture);
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        let result = worker.capture(target).await;
                        let _ = events.send(HubEvent::CaptureDone(result)).await;
                    });
                }
                _ => {
                    self.ctx.in_flight = Some(InFlight::Motion {
                        command,
                        attempt: 1,
                    });
                    self.send_frame(command.opcode.encode());
                }
            }
        }
    }

    /// Hand one frame to the motion link; the outcome returns as a
    /// [`HubEvent::MotionResult`].
    fn send_frame(&self, frame: String) {
        let pending = self.motion.dispatch(frame);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = pending.await.unwrap_or(Err(LinkError::Disconnected));
            let _ = events.send(HubEvent::MotionResult(result)).await;
        });
    }

    /// A `SNAP` must reference an obstacle from the most recent layout; a
    /// bare `SNAP` resolves against a single-obstacle layout.
    fn resolve_snap_target(&self, requested: Option<u8>) -> Option<u8> {
        match requested {
            Some(id) => self
                .ctx
                .obstacles
                .iter()
                .any(|o| o.id == id)
                .then_some(id),
            None => match self.ctx.obstacles.as_slice() {
                [only] => Some(only.id),
                _ => None,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Completions
    // -----------------------------------------------------------------------

    async fn on_motion_result(&mut self, result: Result<(), LinkError>) {
        let Some(InFlight::Motion { command, attempt }) = self.ctx.in_flight else {
            debug!(?result, "motion result with nothing in flight, discarded");
            return;
        };
        if self.ctx.state != RunState::Running {
            debug!(state = ?self.ctx.state, "motion result outside a run, discarded");
            return;
        }
        self.ctx.in_flight = None;

        match result {
            Ok(()) => {
                self.ctx.executed += 1;
                debug!(opcode = %command.opcode, executed = self.ctx.executed, "acknowledged");

                if let Some(pose) = tracker::apply(&command.opcode, self.ctx.pose) {
                    self.ctx.pose = pose;
                    self.notify(Envelope::Location(pose)).await;
                }

                if command.opcode == Opcode::Fin {
                    self.finish_run().await;
                } else {
                    self.pump().await;
                }
            }
            Err(LinkError::Halted) => {
                // The halt path already reset the run.
                debug!(opcode = %command.opcode, "dispatch cancelled by halt");
            }
            Err(e) => {
                if e == LinkError::AckTimeout
                    && let RecoveryPolicy::Resend { attempts } = self.config.recovery
                    && attempt < attempts
                {
                    warn!(opcode = %command.opcode, attempt, "ack timeout, resending");
                    self.ctx.in_flight = Some(InFlight::Motion {
                        command,
                        attempt: attempt + 1,
                    });
                    self.send_frame(command.opcode.encode());
                    return;
                }

                error!(opcode = %command.opcode, error = %e, "motion dispatch failed");
                // Keep the failed command at the head so an operator start
                // resumes from it.
                self.ctx.queue.push_front(command);
                self.ctx.state = RunState::Error;
                let text = match e {
                    LinkError::AckTimeout => messages::ACK_TIMEOUT,
                    _ => messages::MOTION_LOST,
                };
                self.notify(Envelope::error(text)).await;
            }
        }
    }

    async fn on_capture_done(&mut self, result: Result<ImageRecResult, CaptureError>) {
        let Some(InFlight::Capture { obstacle_id }) = self.ctx.in_flight else {
            debug!("capture result with nothing in flight, discarded");
            return;
        };
        if self.ctx.state != RunState::Running {
            debug!(state = ?self.ctx.state, "capture result outside a run, discarded");
            return;
        }
        self.ctx.in_flight = None;

        match result {
            Ok(rec) => {
                self.ctx.captured.push(rec.image_id.clone());
                self.notify(Envelope::ImageRec(rec)).await;
            }
            Err(e) => {
                // A failed SNAP is reported but never halts the queue.
                warn!(obstacle_id, error = %e, "capture failed");
                let text = match e {
                    CaptureError::Camera(_) => messages::CAPTURE_FAILED,
                    CaptureError::Api(_) => messages::IMAGE_REC_FAILED,
                    CaptureError::Unrecognized { .. } => messages::IMAGE_UNRECOGNIZED,
                };
                self.notify(Envelope::error(text)).await;
            }
        }
        self.pump().await;
    }

    async fn finish_run(&mut self) {
        info!(
            run_id = %self.ctx.run_id,
            executed = self.ctx.executed,
            captured = self.ctx.captured.len(),
            "run finished"
        );
        self.ctx.state = RunState::Finished;
        self.ctx.in_flight = None;
        self.notify(Envelope::info(messages::QUEUE_FINISHED)).await;
        self.notify(Envelope::Status(RunStatus::Finished)).await;

        let planner = Arc::clone(&self.planner);
        let events = self.events.clone();
        let image_ids = self.ctx.captured.clone();
        tokio::spawn(async move {
            let result = planner.request_stitch(&image_ids).await.map(|_| ());
            let _ = events.send(HubEvent::StitchDone(result)).await;
        });
    }

    async fn on_stitch_done(&mut self, result: Result<(), ApiError>) {
        match result {
            Ok(()) => {
                info!("images stitched");
                self.notify(Envelope::info(messages::STITCH_DONE)).await;
            }
            Err(e) => {
                error!(error = %e, "stitch request failed");
                self.notify(Envelope::error(messages::STITCH_FAILED)).await;
            }
        }
    }

    async fn notify(&self, envelope: Envelope) {
        if self.operator.send(envelope).await.is_err() {
            error!("operator link gone, notification dropped");
        }
    }
}

fn validate_layout(obstacles: &[Obstacle], arena: (i32, i32)) -> Result<(), String> {
    if obstacles.is_empty() {
        return Err("empty obstacle list".to_string());
    }
    let mut seen = std::collections::HashSet::new();
    for o in obstacles {
        if !seen.insert(o.id) {
            return Err(format!("duplicate obstacle id {}", o.id));
        }
        if o.x < 0 || o.x >= arena.0 || o.y < 0 || o.y >= arena.1 {
            return Err(format!("obstacle {} outside arena at ({}, {})", o.id, o.x, o.y));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
    use wayhub_hal::SimCamera;
    use wayhub_link::{MotionLink, MotionLinkConfig, MotionPort};
    use wayhub_types::{Direction, Plan};

    // -- mock motion port ----------------------------------------------------

    struct MockPort {
        frames: UnboundedSender<String>,
        tokens: UnboundedReceiver<String>,
    }

    #[async_trait]
    impl MotionPort for MockPort {
        async fn write_frame(&mut self, frame: &str) -> Result<(), LinkError> {
            self.frames
                .send(frame.to_string())
                .map_err(|_| LinkError::Disconnected)
        }

        async fn read_token(&mut self) -> Result<String, LinkError> {
            self.tokens.recv().await.ok_or(LinkError::Disconnected)
        }
    }

    // -- stub planner --------------------------------------------------------

    struct StubPlanner {
        plan: Mutex<Option<Result<Plan, ApiError>>>,
        classify: Mutex<Vec<Result<ImageRecResult, ApiError>>>,
        stitch_ok: bool,
    }

    impl StubPlanner {
        fn with_commands(frames: &[&str]) -> Arc<Self> {
            let commands = frames
                .iter()
                .map(|f| Command::planned(Opcode::decode(f).unwrap()))
                .collect();
            Arc::new(Self {
                plan: Mutex::new(Some(Ok(Plan {
                    commands,
                    path: Vec::new(),
                }))),
                classify: Mutex::new(vec![Ok(ImageRecResult {
                    image_id: "36".to_string(),
                    obstacle_id: "1".to_string(),
                })]),
                stitch_ok: true,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                plan: Mutex::new(Some(Err(ApiError::Unavailable("refused".to_string())))),
                classify: Mutex::new(Vec::new()),
                stitch_ok: true,
            })
        }
    }

    #[async_trait]
    impl Planner for StubPlanner {
        async fn request_path(&self, _: &[Obstacle], _: &str) -> Result<Plan, ApiError> {
            self.plan
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(ApiError::Unavailable("no plan scripted".to_string())))
        }

        async fn classify(&self, id: u8, _: Vec<u8>) -> Result<ImageRecResult, ApiError> {
            let mut scripted = self.classify.lock().unwrap();
            if scripted.is_empty() {
                Ok(ImageRecResult {
                    image_id: "NA".to_string(),
                    obstacle_id: id.to_string(),
                })
            } else {
                scripted.remove(0)
            }
        }

        async fn request_stitch(&self, _: &[String]) -> Result<Vec<u8>, ApiError> {
            if self.stitch_ok {
                Ok(Vec::new())
            } else {
                Err(ApiError::Status(500))
            }
        }

        async fn check_alive(&self) -> bool {
            true
        }
    }

    // -- harness -------------------------------------------------------------

    struct Harness {
        dispatcher: Dispatcher,
        events_rx: mpsc::Receiver<HubEvent>,
        operator_rx: mpsc::Receiver<Envelope>,
        frames: UnboundedReceiver<String>,
        tokens: UnboundedSender<String>,
    }

    fn harness_with(planner: Arc<StubPlanner>, config: DispatcherConfig) -> Harness {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (token_tx, token_rx) = mpsc::unbounded_channel();
        let motion = MotionLink::spawn(
            MockPort {
                frames: frame_tx,
                tokens: token_rx,
            },
            MotionLinkConfig {
                ack_timeout: Duration::from_millis(100),
            },
        );

        let (operator, operator_rx) = OperatorHandle::channel(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        let capture = Arc::new(CaptureWorker::new(
            Box::new(SimCamera::default()),
            Arc::clone(&planner) as Arc<dyn Planner>,
            1,
        ));
        let dispatcher = Dispatcher::new(
            operator,
            motion,
            planner,
            capture,
            events_tx,
            config,
        );

        Harness {
            dispatcher,
            events_rx,
            operator_rx,
            frames: frame_rx,
            tokens: token_tx,
        }
    }

    fn scenario_config() -> DispatcherConfig {
        DispatcherConfig {
            start_pose: RobotPose::new(5, 10, Direction::North),
            ..DispatcherConfig::default()
        }
    }

    fn layout_one_obstacle() -> ObstacleLayout {
        ObstacleLayout {
            obstacles: vec![Obstacle {
                id: 1,
                x: 5,
                y: 10,
                d: Direction::East,
            }],
            mode: "0".to_string(),
        }
    }

    /// Feed the next spawned-task completion back into the dispatcher.
    async fn step(h: &mut Harness) {
        let event = h.events_rx.recv().await.expect("pending hub event");
        h.dispatcher.handle(event).await;
    }

    async fn submit_layout_and_plan(h: &mut Harness) {
        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Obstacle(layout_one_obstacle())))
            .await;
        assert_eq!(h.dispatcher.state(), RunState::AwaitingPath);
        step(h).await; // PlanReady
    }

    // -- tests ---------------------------------------------------------------

    #[tokio::test]
    async fn start_with_empty_queue_is_rejected() {
        let mut h = harness_with(StubPlanner::with_commands(&[]), DispatcherConfig::default());

        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Control("start".to_string())))
            .await;

        assert_eq!(h.dispatcher.state(), RunState::Idle);
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::error(messages::EMPTY_QUEUE)
        );
    }

    #[tokio::test]
    async fn failed_path_request_returns_to_idle() {
        let mut h = harness_with(StubPlanner::failing(), DispatcherConfig::default());

        submit_layout_and_plan(&mut h).await;

        assert_eq!(h.dispatcher.state(), RunState::Idle);
        assert_eq!(h.dispatcher.queue_len(), 0);
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::error(messages::PATH_FAILED)
        );
    }

    #[tokio::test]
    async fn full_run_executes_to_finished() {
        let planner = StubPlanner::with_commands(&["RS00", "FW10", "SNAP", "FIN"]);
        let mut h = harness_with(planner, scenario_config());

        submit_layout_and_plan(&mut h).await;
        assert_eq!(h.dispatcher.state(), RunState::Ready);
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::info(messages::PATH_READY)
        );

        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Control("start".to_string())))
            .await;
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::Status(RunStatus::Running)
        );

        // RS00 – acknowledged, no location update.
        assert_eq!(h.frames.recv().await.unwrap(), "RS00");
        h.tokens.send("ACK".to_string()).unwrap();
        step(&mut h).await;

        // FW10 – acknowledged, one location update.
        assert_eq!(h.frames.recv().await.unwrap(), "FW10");
        h.tokens.send("ACK".to_string()).unwrap();
        step(&mut h).await;
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::Location(RobotPose::new(5, 20, Direction::North))
        );

        // SNAP – branches to the capture worker, nothing on the wire.
        step(&mut h).await; // CaptureDone
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::ImageRec(ImageRecResult {
                image_id: "36".to_string(),
                obstacle_id: "1".to_string(),
            })
        );

        // FIN – acknowledged, run finishes and stitch fires.
        assert_eq!(h.frames.recv().await.unwrap(), "FIN");
        h.tokens.send("ACK".to_string()).unwrap();
        step(&mut h).await;
        assert_eq!(h.dispatcher.state(), RunState::Finished);
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::info(messages::QUEUE_FINISHED)
        );
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::Status(RunStatus::Finished)
        );

        step(&mut h).await; // StitchDone
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::info(messages::STITCH_DONE)
        );

        // Pose matches the composed displacements from the start pose.
        assert_eq!(h.dispatcher.pose(), RobotPose::new(5, 20, Direction::North));
    }

    #[tokio::test]
    async fn stop_mid_run_clears_queue_and_returns_to_idle() {
        let planner = StubPlanner::with_commands(&["FW05", "FW05", "FW05", "FIN"]);
        let mut h = harness_with(planner, DispatcherConfig::default());

        submit_layout_and_plan(&mut h).await;
        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Control("start".to_string())))
            .await;
        assert_eq!(h.frames.recv().await.unwrap(), "FW05");

        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Control("stop".to_string())))
            .await;

        assert_eq!(h.dispatcher.state(), RunState::Idle);
        assert_eq!(h.dispatcher.queue_len(), 0);
        // STOP goes out of band on the wire.
        assert_eq!(h.frames.recv().await.unwrap(), "STOP");

        // The cancelled dispatch resolves as Halted and is discarded.
        step(&mut h).await;
        assert_eq!(h.dispatcher.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn ack_timeout_halts_with_queue_preserved_and_start_resumes() {
        let planner = StubPlanner::with_commands(&["FW01", "FIN"]);
        let mut h = harness_with(planner, DispatcherConfig::default());

        submit_layout_and_plan(&mut h).await;
        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Control("start".to_string())))
            .await;
        assert_eq!(h.frames.recv().await.unwrap(), "FW01");

        // No ACK: the motion link times out.
        step(&mut h).await;
        assert_eq!(h.dispatcher.state(), RunState::Error);
        assert_eq!(h.dispatcher.queue_len(), 2); // FW01 back at the head

        // Drain the notifications up to the timeout error.
        let mut saw_timeout = false;
        while let Ok(env) = h.operator_rx.try_recv() {
            if env == Envelope::error(messages::ACK_TIMEOUT) {
                saw_timeout = true;
            }
        }
        assert!(saw_timeout, "expected an ack-timeout error envelope");

        // Operator-directed retry resumes from the failed command.
        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Control("start".to_string())))
            .await;
        assert_eq!(h.dispatcher.state(), RunState::Running);
        assert_eq!(h.frames.recv().await.unwrap(), "FW01");
        h.tokens.send("ACK".to_string()).unwrap();
        step(&mut h).await;
        assert_eq!(h.frames.recv().await.unwrap(), "FIN");
        h.tokens.send("ACK".to_string()).unwrap();
        step(&mut h).await;
        assert_eq!(h.dispatcher.state(), RunState::Finished);
    }

    #[tokio::test]
    async fn resend_policy_retries_before_halting() {
        let planner = StubPlanner::with_commands(&["FW01", "FIN"]);
        let config = DispatcherConfig {
            recovery: RecoveryPolicy::Resend { attempts: 2 },
            ..DispatcherConfig::default()
        };
        let mut h = harness_with(planner, config);

        submit_layout_and_plan(&mut h).await;
        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Control("start".to_string())))
            .await;

        // First dispatch times out and is re-sent automatically.
        assert_eq!(h.frames.recv().await.unwrap(), "FW01");
        step(&mut h).await;
        assert_eq!(h.dispatcher.state(), RunState::Running);
        assert_eq!(h.frames.recv().await.unwrap(), "FW01");

        // Second timeout exhausts the bound.
        step(&mut h).await;
        assert_eq!(h.dispatcher.state(), RunState::Error);
    }

    #[tokio::test]
    async fn failed_capture_does_not_halt_the_run() {
        let planner = StubPlanner::with_commands(&["SNAP", "FIN"]);
        planner.classify.lock().unwrap().clear(); // scripted answers gone => "NA"
        let mut h = harness_with(planner, DispatcherConfig::default());

        submit_layout_and_plan(&mut h).await;
        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Control("start".to_string())))
            .await;

        step(&mut h).await; // CaptureDone(Unrecognized)
        // The run continued to FIN.
        assert_eq!(h.frames.recv().await.unwrap(), "FIN");
        h.tokens.send("ACK".to_string()).unwrap();
        step(&mut h).await;
        assert_eq!(h.dispatcher.state(), RunState::Finished);

        let mut saw_capture_error = false;
        while let Ok(env) = h.operator_rx.try_recv() {
            if env == Envelope::error(messages::IMAGE_UNRECOGNIZED) {
                saw_capture_error = true;
            }
        }
        assert!(saw_capture_error, "expected a capture error envelope");
    }

    #[tokio::test]
    async fn layout_during_run_is_rejected() {
        let planner = StubPlanner::with_commands(&["FW01", "FIN"]);
        let mut h = harness_with(planner, DispatcherConfig::default());

        submit_layout_and_plan(&mut h).await;
        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Control("start".to_string())))
            .await;
        assert_eq!(h.dispatcher.state(), RunState::Running);

        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Obstacle(layout_one_obstacle())))
            .await;
        assert_eq!(h.dispatcher.state(), RunState::Running);

        let mut saw_rejection = false;
        while let Ok(env) = h.operator_rx.try_recv() {
            if env == Envelope::error(messages::LAYOUT_DURING_RUN) {
                saw_rejection = true;
            }
        }
        assert!(saw_rejection, "expected a layout rejection envelope");
    }

    #[tokio::test]
    async fn malformed_layout_rejected_without_state_change() {
        let mut h = harness_with(StubPlanner::with_commands(&[]), DispatcherConfig::default());

        let duplicate_ids = ObstacleLayout {
            obstacles: vec![
                Obstacle { id: 1, x: 1, y: 1, d: Direction::North },
                Obstacle { id: 1, x: 2, y: 2, d: Direction::South },
            ],
            mode: "0".to_string(),
        };
        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Obstacle(duplicate_ids)))
            .await;
        assert_eq!(h.dispatcher.state(), RunState::Idle);
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::error(messages::MALFORMED_LAYOUT)
        );

        let out_of_arena = ObstacleLayout {
            obstacles: vec![Obstacle { id: 1, x: 25, y: 1, d: Direction::North }],
            mode: "0".to_string(),
        };
        h.dispatcher
            .handle(HubEvent::Operator(Envelope::Obstacle(out_of_arena)))
            .await;
        assert_eq!(h.dispatcher.state(), RunState::Idle);
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::error(messages::MALFORMED_LAYOUT)
        );
    }

    #[tokio::test]
    async fn connect_and_reconnect_greetings() {
        let mut h = harness_with(StubPlanner::with_commands(&[]), DispatcherConfig::default());

        h.dispatcher
            .handle(HubEvent::OperatorConnected { reconnect: false })
            .await;
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::info(messages::CONNECTED)
        );

        h.dispatcher
            .handle(HubEvent::OperatorConnected { reconnect: true })
            .await;
        assert_eq!(
            h.operator_rx.recv().await.unwrap(),
            Envelope::info(messages::RECONNECTED)
        );
    }
}
