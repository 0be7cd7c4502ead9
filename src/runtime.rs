// 50 Hz control loop
// Each iteration: read the IMU and the servo positions side by side, let the
// sequencer pick the next step, execute it, then publish replies, telemetry
// and health. Hardware failures only degrade health; they never stop the loop.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

// local imports
use crate::config::{
    ConfigError, DEVICE_TIMEOUT, LOOP_HZ, RobotConfig, TOPIC_CMD, TOPIC_HEALTH, TOPIC_REPLY, TOPIC_TELEMETRY,
    TrajectoryConfig,
};
use crate::hardware::{ActuatorBus, BusError, Device, InertialSensor, Readback, SensorError};
use crate::imu::classifier::OrientationClassifier;
use crate::imu::lsm6ds;
use crate::messages::{ActuatorPosition, CommandRequest, Reply, RuntimeHealth, Telemetry, TorqueResult};
use crate::motion::choreography::{Choreography, Motion, Waypoint};
use crate::motion::pose::{ActuatorId, Pose};
use crate::motion::trajectory::interpolate;
use crate::motor::MotorDriver;
use crate::sequencer::{RandomTieBreak, Sequencer, Step, TieBreak};
use crate::sim::{SimulatedBus, SimulatedImu};

/// Failures that stop the runtime; only startup paths produce these
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Zenoh error: {0}")]
    Zenoh(String),

    #[error("Failed to encode message: {0}")]
    Json(#[from] serde_json::Error),
}

fn zenoh_error(e: zenoh::Error) -> RuntimeError {
    RuntimeError::Zenoh(e.to_string())
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub port: String,
    pub baudrate: u32,
    pub i2c: String,
    pub config: RobotConfig,
    pub simulate: bool,
    /// Start with orientation-driven propulsion on
    pub propel: bool,
    /// Fixed tie-break seed for reproducible runs
    pub seed: Option<u64>,
}

/// Iterations between attempts to reach one servo that dropped off the bus
pub const ABSENT_RETRY_TICKS: u64 = LOOP_HZ;

/// Owns the devices and the sequencer; one `iterate` per loop tick
pub struct Controller<B, S> {
    bus: Device<B>,
    imu: Device<S>,
    sequencer: Sequencer,
    trajectory: TrajectoryConfig,
    health: RuntimeHealth,
    timeout: Duration,
    /// Extra deadline granted per servo addressed in one bus call
    response_timeout: Duration,
    /// Servos read every iteration
    present: Vec<ActuatorId>,
    /// Servos skipped until a retry finds them again
    absent: Vec<ActuatorId>,
    iteration: u64,
    next_retry: usize,
}

impl<B: ActuatorBus, S: InertialSensor> Controller<B, S> {
    pub fn new(bus: B, imu: S, sequencer: Sequencer, trajectory: TrajectoryConfig, timeout: Duration) -> Self {
        Self {
            bus: Device::new(bus, timeout),
            imu: Device::new(imu, timeout),
            sequencer,
            trajectory,
            health: RuntimeHealth::Ok,
            timeout,
            response_timeout: Duration::ZERO,
            present: all_ids(),
            absent: Vec::new(),
            iteration: 0,
            next_retry: 0,
        }
    }

    /// Allow `timeout` per silent servo on calls that address several servos
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Deadline for a bus call that may wait on `servos` silent servos
    fn deadline(&self, servos: usize) -> Duration {
        self.timeout + self.response_timeout * servos as u32
    }

    /// Scan the bus, enable torque on every servo found and load the initial pose
    ///
    /// Missing servos are not fatal; they are skipped and retried later.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        let scan = self.deadline(ActuatorId::all().count());
        let present = self.bus.call_within(scan, |bus| bus.enumerate()).await?;
        if present.len() < ActuatorId::all().count() {
            warn!("Only {} of 12 servos found", present.len());
        }
        self.absent = ActuatorId::all().filter(|id| !present.contains(id)).collect();
        self.present = present;

        let ids = self.present.clone();
        let torque = self
            .bus
            .call_within(self.deadline(ids.len()), move |bus| {
                Ok::<_, BusError>(bus.set_torque(&ids, true))
            })
            .await?;
        for (id, result) in torque {
            if let Err(e) = result {
                warn!("Could not enable torque on servo {}: {}", id, e);
            }
        }

        let ids = self.present.clone();
        let readback = self
            .bus
            .call_within(self.deadline(ids.len()), move |bus| bus.read_positions(&ids))
            .await?;
        for (id, tick) in &readback.positions {
            info!("Servo {} at {}", id, tick);
        }
        self.track(&readback);
        self.sequencer.commit_readback(&readback);
        Ok(())
    }

    /// Servos read every iteration
    pub fn present(&self) -> &[ActuatorId] {
        &self.present
    }

    /// Move servos between the present and absent sets based on who answered
    fn track(&mut self, readback: &Readback) {
        for &(id, _) in &readback.positions {
            if let Some(i) = self.absent.iter().position(|&a| a == id) {
                self.absent.remove(i);
                self.present.push(id);
                self.present.sort_unstable();
                info!("Servo {} answering again", id);
            }
        }
        for &id in &readback.missing {
            if let Some(i) = self.present.iter().position(|&p| p == id) {
                self.present.remove(i);
                self.absent.push(id);
                warn!("Servo {} stopped answering; skipping it until it returns", id);
            }
        }
    }

    /// Servos to read this iteration: the present set plus, now and then, one absent servo
    fn readback_ids(&mut self) -> Vec<ActuatorId> {
        let mut ids = self.present.clone();
        if !self.absent.is_empty() && self.iteration % ABSENT_RETRY_TICKS == 0 {
            ids.push(self.absent[self.next_retry % self.absent.len()]);
            self.next_retry = self.next_retry.wrapping_add(1);
        }
        ids
    }

    pub fn submit(&mut self, request: CommandRequest) -> Vec<Reply> {
        self.sequencer.submit(request)
    }

    /// Run one loop iteration and return the replies it produced
    pub async fn iterate(&mut self) -> Vec<Reply> {
        self.health = RuntimeHealth::Ok;
        self.iteration += 1;

        let ids = self.readback_ids();
        let deadline = self.deadline(ids.len());
        let (sample, readback) = tokio::join!(
            self.imu.call(|imu| imu.read_sample()),
            self.bus.call_within(deadline, move |bus| bus.read_positions(&ids)),
        );

        match readback {
            Ok(readback) => {
                if !readback.missing.is_empty() {
                    debug!("No position from servos {:?}", readback.missing);
                }
                self.track(&readback);
                self.sequencer.commit_readback(&readback);
            }
            Err(e) => self.degrade(format_args!("Position readback failed: {}", e)),
        }

        let sample = match sample {
            Ok(sample) => Some(sample),
            Err(e) => {
                self.degrade(format_args!("IMU read failed: {}", e));
                None
            }
        };

        match self.sequencer.tick(sample.as_ref()) {
            Some(step) => self.execute(step).await,
            None => Vec::new(),
        }
    }

    async fn execute(&mut self, step: Step) -> Vec<Reply> {
        match step {
            Step::Dispatch { waypoint, completes } => {
                self.dispatch(&waypoint).await;
                completes.map(|request| Reply::Done { request }).into_iter().collect()
            }
            Step::Torque { request, ids, enabled } => {
                let requested = ids.clone();
                let deadline = self.deadline(ids.len());
                let results = match self
                    .bus
                    .call_within(deadline, move |bus| Ok::<_, BusError>(bus.set_torque(&ids, enabled)))
                    .await
                {
                    Ok(results) => results,
                    Err(e) => requested.into_iter().map(|id| (id, Err(e.clone()))).collect(),
                };
                if results.iter().any(|(_, r)| r.is_err()) {
                    self.degrade(format_args!("Torque change incomplete for request {}", request));
                }
                let results = results
                    .into_iter()
                    .map(|(id, result)| TorqueResult {
                        id,
                        ok: result.is_ok(),
                        error: result.err().map(|e| e.to_string()),
                    })
                    .collect();
                vec![Reply::Torque { request, results }]
            }
            Step::ReportPositions { request } => {
                let ids = all_ids();
                let deadline = self.deadline(ids.len());
                let readback = self.bus.call_within(deadline, move |bus| bus.read_positions(&ids)).await;
                self.report(request, readback)
            }
        }
    }

    fn report(&mut self, request: u64, readback: Result<Readback, BusError>) -> Vec<Reply> {
        match readback {
            Ok(readback) => {
                self.track(&readback);
                self.sequencer.commit_readback(&readback);
                let positions = readback
                    .positions
                    .iter()
                    .map(|&(id, tick)| ActuatorPosition { id, tick })
                    .collect();
                vec![Reply::Positions {
                    request,
                    positions,
                    missing: readback.missing,
                }]
            }
            Err(e) => {
                self.degrade(format_args!("Position report failed: {}", e));
                vec![Reply::Rejected {
                    request,
                    reason: e.to_string(),
                }]
            }
        }
    }

    /// Drive one waypoint and wait for it to settle; a failed write drops the dispatch
    async fn dispatch(&mut self, waypoint: &Waypoint) {
        debug!("Dispatching {} (settle {:?})", waypoint.label, waypoint.settle);
        match waypoint.motion {
            Motion::Direct => {
                let result = self.write(waypoint.pose).await;
                if let Err(e) = result {
                    self.degrade(format_args!("Dropped waypoint {}: {}", waypoint.label, e));
                }
            }
            Motion::Smooth { steps } => {
                for pose in interpolate(waypoint.pose, self.sequencer.current_pose(), steps) {
                    let result = self.write(pose).await;
                    if let Err(e) = result {
                        self.degrade(format_args!("Dropped waypoint {} mid-trajectory: {}", waypoint.label, e));
                        break;
                    }
                    sleep(self.trajectory.step_delay()).await;
                }
            }
        }
        sleep(waypoint.settle).await;
    }

    async fn write(&self, pose: Pose) -> Result<(), BusError> {
        self.bus.call(move |bus| bus.write_positions(&pose)).await
    }

    fn degrade(&mut self, reason: std::fmt::Arguments<'_>) {
        warn!("{}", reason);
        self.health = RuntimeHealth::Degraded;
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn telemetry(&self) -> Telemetry {
        self.sequencer.telemetry()
    }
}

fn all_ids() -> Vec<ActuatorId> {
    ActuatorId::all().collect()
}

/// Best-effort request ID from a command that failed to parse
fn request_id(payload: &[u8]) -> u64 {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_u64()))
        .unwrap_or(0)
}

pub fn build_sequencer(config: &RobotConfig, propel: bool, seed: Option<u64>) -> Sequencer {
    let choreography = Choreography::builder(config.calibration.clone())
        .recorded(config.poses.clone())
        .gait(config.gait.clone())
        .roll(config.roll.clone())
        .build();
    let tie_break: Box<dyn TieBreak> = match seed {
        Some(seed) => Box::new(RandomTieBreak::seeded(seed)),
        None => Box::new(RandomTieBreak::from_entropy()),
    };
    let mut sequencer = Sequencer::new(
        choreography,
        OrientationClassifier::new(config.classifier.clone()),
        tie_break,
        config.trajectory.steps,
    );
    sequencer.set_propulsion(propel);
    sequencer
}

pub async fn run(options: RuntimeOptions) -> Result<(), RuntimeError> {
    options.config.validate()?;
    let sequencer = build_sequencer(&options.config, options.propel, options.seed);
    let trajectory = options.config.trajectory.clone();

    if options.simulate {
        info!("Running against simulated hardware");
        let bus = SimulatedBus::new(options.config.poses.perfect_circle);
        let imu = SimulatedImu::rolling(options.config.classifier.scale.clone());
        return serve(Controller::new(bus, imu, sequencer, trajectory, DEVICE_TIMEOUT)).await;
    }

    // Startup failures are fatal
    let bus = MotorDriver::open(&options.port, options.baudrate).inspect_err(|e| error!("{}", e))?;
    let imu = lsm6ds::open(&options.i2c, crate::config::IMU_ADDRESS).inspect_err(|e| error!("{}", e))?;
    let controller = Controller::new(bus, imu, sequencer, trajectory, DEVICE_TIMEOUT)
        .with_response_timeout(MotorDriver::RESPONSE_TIMEOUT);
    serve(controller).await
}

async fn serve<B: ActuatorBus, S: InertialSensor>(mut controller: Controller<B, S>) -> Result<(), RuntimeError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await.map_err(zenoh_error)?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await.map_err(zenoh_error)?;
    let pub_reply = session.declare_publisher(TOPIC_REPLY).await.map_err(zenoh_error)?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await.map_err(zenoh_error)?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await.map_err(zenoh_error)?;

    controller.start().await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    // Waypoint settles overrun the period; do not burst afterwards
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Runtime started: {}Hz loop", LOOP_HZ);
    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}, {}, {}", TOPIC_REPLY, TOPIC_TELEMETRY, TOPIC_HEALTH);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            _ = tick.tick() => {}
        }

        // 1. Drain all pending commands (non-blocking); they queue in the sequencer
        let mut replies = Vec::new();
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<CommandRequest>(&payload) {
                Ok(request) => replies.extend(controller.submit(request)),
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                    replies.push(Reply::Rejected {
                        request: request_id(&payload),
                        reason: format!("invalid command: {}", e),
                    });
                }
            }
        }

        // 2. Sense, decide, act
        replies.extend(controller.iterate().await);

        // 3. Publish replies
        for reply in &replies {
            pub_reply.put(serde_json::to_string(reply)?).await.map_err(zenoh_error)?;
        }

        // 4. Publish telemetry and health
        let telemetry_json = serde_json::to_string(&controller.telemetry())?;
        pub_telemetry.put(telemetry_json).await.map_err(zenoh_error)?;
        let health_json = serde_json::to_string(&controller.health())?;
        pub_health.put(health_json).await.map_err(zenoh_error)?;
    }

    session.close().await.map_err(zenoh_error)?;
    Ok(())
}
