//! # goalex-kernel: a running goal executive
//!
//! [`ExecutiveBuilder`] wires a goal store, an execution strategy and the
//! robot collaborators into an [`Executive`], then starts the tasks that
//! drive it. [`ExecutiveHandle`] owns those tasks and stops them in order.

mod listeners;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use goalex_processors::ProcessorRegistry;
use goalex_protocol::{Collaborators, ExecutiveStrategy, GoalStorePort, RobotPath};
use goalex_runtime::{Clock, Executive, ExecutiveConfig, Outbox, SystemClock, run_writer};
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::listeners::{
    run_goal_listener, run_mode_listener, run_object_listener, run_sweeper, run_timer,
};

pub struct ExecutiveBuilder {
    store: Arc<dyn GoalStorePort>,
    robot: RobotPath,
    collaborators: Collaborators,
    registry: ProcessorRegistry,
    strategy: Option<Box<dyn ExecutiveStrategy>>,
    config: ExecutiveConfig,
    clock: Arc<dyn Clock>,
}

impl ExecutiveBuilder {
    /// Defaults to the reference processors and the system clock.
    pub fn new(
        store: Arc<dyn GoalStorePort>,
        robot: RobotPath,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            store,
            robot,
            collaborators,
            registry: ProcessorRegistry::with_reference_processors(),
            strategy: None,
            config: ExecutiveConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: ExecutiveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tick_period(mut self, period: Duration) -> Self {
        self.config.tick_period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn archive_retain(mut self, retain: usize) -> Self {
        self.config.archive_retain = retain;
        self
    }

    pub fn default_mode_on_missing(mut self, enabled: bool) -> Self {
        self.config.default_mode_on_missing = enabled;
        self
    }

    pub fn publish_goal_types(mut self, enabled: bool) -> Self {
        self.config.publish_goal_types = enabled;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Dispatch goals through `registry`. Checked when the executive starts.
    pub fn registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = registry;
        self.strategy = None;
        self
    }

    /// Use a custom strategy instead of a processor registry.
    pub fn strategy(mut self, strategy: Box<dyn ExecutiveStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Validate the strategy, seed its background goals, publish the goal
    /// type manifest and start the executive's tasks.
    #[instrument(skip(self), fields(robot = %self.robot))]
    pub async fn start(self) -> Result<ExecutiveHandle> {
        let strategy: Box<dyn ExecutiveStrategy> = match self.strategy {
            Some(strategy) => strategy,
            None => Box::new(
                self.registry
                    .into_strategy(self.robot.clone())
                    .context("invalid processor registry")?,
            ),
        };
        let (outbox, writes) = Outbox::channel();
        let executive = Arc::new(Executive::new(
            self.robot.clone(),
            self.config.clone(),
            strategy,
            self.collaborators,
            self.clock,
            outbox,
        ));
        executive.bootstrap();

        if self.config.publish_goal_types {
            self.store
                .publish_goal_types(&self.robot, executive.goal_type_manifest())
                .await
                .context("failed to publish goal type manifest")?;
        }

        let (writer_stop, writer_shutdown) = oneshot::channel();
        let writer = tokio::spawn(run_writer(
            self.store.clone(),
            self.robot.clone(),
            writes,
            writer_shutdown,
        ));

        let sweep = Arc::new(Notify::new());
        // Finished goals left over from a previous run.
        sweep.notify_one();
        let sweeper = tokio::spawn(run_sweeper(
            self.store.clone(),
            self.robot.clone(),
            self.config.archive_retain,
            sweep.clone(),
        ));
        let listeners = vec![
            tokio::spawn(run_goal_listener(
                self.store.clone(),
                executive.clone(),
                sweep.clone(),
            )),
            tokio::spawn(run_object_listener(self.store.clone(), executive.clone())),
            tokio::spawn(run_mode_listener(self.store.clone(), executive.clone())),
        ];

        let (stop, stop_rx) = watch::channel(false);
        let timer = tokio::spawn(run_timer(executive.clone(), stop_rx));

        info!(
            tick_period_ms = self.config.tick_period_ms,
            archive_retain = self.config.archive_retain,
            "executive started"
        );
        Ok(ExecutiveHandle {
            executive,
            sweep,
            stop,
            timer,
            listeners,
            sweeper,
            writer_stop,
            writer,
        })
    }
}

/// A started executive. Dropping the handle leaves its tasks running; call
/// [`ExecutiveHandle::shutdown`] to stop them.
pub struct ExecutiveHandle {
    executive: Arc<Executive>,
    sweep: Arc<Notify>,
    stop: watch::Sender<bool>,
    timer: JoinHandle<()>,
    listeners: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
    writer_stop: oneshot::Sender<()>,
    writer: JoinHandle<usize>,
}

impl ExecutiveHandle {
    /// The running executive, for the runtime input setters.
    pub fn executive(&self) -> &Arc<Executive> {
        &self.executive
    }

    pub fn request_sweep(&self) {
        self.sweep.notify_one();
    }

    /// Stop the timer, detach the listeners, run the strategy shutdown hook
    /// and flush queued store writes. Returns once every task has exited.
    #[instrument(skip(self), fields(robot = %self.executive.robot()))]
    pub async fn shutdown(self) -> Result<()> {
        info!("executive shutting down");
        self.stop.send_replace(true);
        for listener in &self.listeners {
            listener.abort();
        }
        self.sweeper.abort();

        self.timer.await.context("tick timer task failed")?;
        self.executive.shutdown_strategy();

        let _ = self.writer_stop.send(());
        let written = self.writer.await.context("store writer task failed")?;
        for task in self.listeners.into_iter().chain([self.sweeper]) {
            let _ = task.await;
        }
        info!(written, "executive stopped");
        Ok(())
    }
}
