use std::sync::Arc;
use std::time::Duration;

use pisdflib_ipc_types::{Notification, ParameterMessage};
use tracing::{debug, info, warn};

use crate::core::archi::Platform;
use crate::core::error::{PisdfError, Result};
use crate::core::firing::Handlers;
use crate::core::graph::App;
use crate::core::runtime::config::RuntimeConfig;
use crate::core::runtime::kernels::KernelRegistry;
use crate::core::runtime::lrt::RtPlatform;
use crate::core::runtime::memory::MemoryInterface;
use crate::core::scheduling::{ResourcesAllocator, ScheduleStats, TaskKind};

const PARAM_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The global runtime: owns the application, the handler tree, the
/// resource allocation pipeline and the worker threads, and drives the
/// iteration loop.
///
/// All mutation of runtime state happens on the calling thread; workers
/// only ever see self-contained job messages.
pub struct Runtime {
    app: App,
    platform: Arc<Platform>,
    handlers: Handlers,
    resources: ResourcesAllocator,
    rt: RtPlatform,
    memory: Arc<MemoryInterface>,
    is_static: bool,
    iteration: u64,
}

impl Runtime {
    /// Build the runtime and spawn one worker per LRT.
    ///
    /// `externals` provides initial contents for the platform's external
    /// buffers; missing entries are zero-filled to their registered size.
    pub fn new(
        app: App,
        platform: Platform,
        config: RuntimeConfig,
        kernels: KernelRegistry,
        externals: Vec<Vec<u8>>,
    ) -> Result<Self> {
        let mut externals = externals;
        for (ix, &size) in platform.external_buffer_sizes().iter().enumerate() {
            if ix >= externals.len() {
                externals.push(vec![0u8; size]);
            }
        }
        let memory = Arc::new(MemoryInterface::new(externals, app.persistent_delays()));
        let rt = RtPlatform::spawn(&platform, Arc::new(kernels), Arc::clone(&memory));
        let handlers = Handlers::new(&app);
        let resources = ResourcesAllocator::new(
            config.scheduling,
            config.mapping,
            config.execution,
            &platform,
            app.first_dynamic_address(),
        );
        let is_static = app.graph(app.root()).subtree_static;
        info!(
            is_static,
            lrts = platform.lrt_count(),
            "runtime created"
        );
        Ok(Self {
            app,
            platform: Arc::new(platform),
            handlers,
            resources,
            rt,
            memory,
            is_static,
            iteration: 0,
        })
    }

    pub fn memory(&self) -> &Arc<MemoryInterface> {
        &self.memory
    }

    pub fn schedule_stats(&self) -> ScheduleStats {
        self.resources.schedule().stats()
    }

    pub fn gantt_json(&self) -> serde_json::Value {
        self.resources
            .schedule()
            .gantt_json(&self.app, &self.handlers)
    }

    /// Run one full iteration of the application.
    pub fn execute(&mut self) -> Result<()> {
        let result = if self.is_static {
            self.static_execute()
        } else {
            self.dynamic_execute()
        };
        let drain = self.end_iteration_and_wait();
        self.handlers.clear(&self.app);
        self.resources.clear();
        self.rt.communicator().stamps().reset();
        self.iteration += 1;
        result.and(drain)
    }

    pub fn execute_iterations(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            self.execute()?;
        }
        Ok(())
    }

    /// Stop the workers; returns the final external-buffer contents.
    pub fn shutdown(self) -> Vec<Vec<u8>> {
        let external_count = self.platform.external_buffer_sizes().len();
        self.rt.shutdown();
        (0..external_count)
            .map(|ix| self.memory.external_contents(ix))
            .collect()
    }

    /// Fully-resolved fast path: one transform + schedule + dispatch.
    fn static_execute(&mut self) -> Result<()> {
        debug!(iteration = self.iteration, "static iteration starting");
        self.handlers.resolve_all(&self.app)?;
        let (app, platform) = (&self.app, &*self.platform);
        self.resources.execute(
            app,
            platform,
            &mut self.handlers,
            self.rt.communicator_mut(),
        )
    }

    /// Dynamic mode: schedule what is resolvable, run, wait for parameter
    /// values, repeat until no parameters remain outstanding.
    fn dynamic_execute(&mut self) -> Result<()> {
        loop {
            self.handlers.resolve_all(&self.app)?;
            {
                let (app, platform) = (&self.app, &*self.platform);
                self.resources.execute(
                    app,
                    platform,
                    &mut self.handlers,
                    self.rt.communicator_mut(),
                )?;
            }
            // Late job stamps for constraints recorded before this pass.
            self.rt.communicator().send_to_all(|| {
                crate::core::runtime::communicator::LrtInput::BroadcastStamps
            });
            let expected = self.handlers.count_expected_params(&self.app);
            if expected == 0 {
                debug!("no dynamic parameters outstanding, iteration settles");
                return Ok(());
            }
            debug!(expected, "waiting for dynamic parameters");
            let mut received = 0usize;
            while received < expected {
                match self.rt.communicator().recv_notification(PARAM_TIMEOUT) {
                    Some(Notification::JobSentParam { sender, task_ix }) => {
                        let message = self
                            .rt
                            .communicator()
                            .recv_parameters(PARAM_TIMEOUT)
                            .ok_or(PisdfError::DynamicTimeout {
                                unresolved: expected - received,
                            })?;
                        debug_assert_eq!(message.task_ix, task_ix);
                        self.apply_parameters(message)?;
                        received += 1;
                        let _ = sender;
                    }
                    Some(Notification::LrtError { sender, message }) => {
                        return Err(PisdfError::Lrt {
                            lrt: sender,
                            message,
                        });
                    }
                    Some(_) => {}
                    None => {
                        return Err(PisdfError::DynamicTimeout {
                            unresolved: expected - received,
                        });
                    }
                }
            }
        }
    }

    /// Route a config actor's output values into its firing's parameters.
    fn apply_parameters(&mut self, message: ParameterMessage) -> Result<()> {
        let task = self.resources.schedule().task(message.task_ix);
        let TaskKind::Vertex { firing, vertex, .. } = task.kind else {
            return Err(PisdfError::InvalidGraph(
                "parameter message for a sync task".into(),
            ));
        };
        let graph = self.app.graph(self.handlers.graph_of(firing));
        let output_params = graph.vertex(vertex).output_params.clone();
        if output_params.len() != message.params.len() {
            return Err(PisdfError::InvalidGraph(format!(
                "config [{}] sent {} value(s) for {} parameter(s)",
                graph.vertex(vertex).name,
                message.params.len(),
                output_params.len()
            )));
        }
        for (&param_ix, &value) in output_params.iter().zip(&message.params) {
            info!(
                param = %self.app.graph(self.handlers.graph_of(firing)).params[param_ix].name,
                value,
                "parameter received"
            );
            self.handlers
                .set_param_value(&self.app, firing, param_ix, value)?;
        }
        Ok(())
    }

    /// Ask every worker to acknowledge the end of the iteration and wait
    /// for the acknowledgements.
    fn end_iteration_and_wait(&mut self) -> Result<()> {
        use crate::core::runtime::communicator::LrtInput;
        self.rt.communicator().send_to_all(|| LrtInput::EndIteration);
        let mut remaining = self.platform.lrt_count() as usize;
        let mut failure = None;
        while remaining > 0 {
            match self.rt.communicator().recv_notification(DRAIN_TIMEOUT) {
                Some(Notification::LrtEndIteration { .. }) => remaining -= 1,
                Some(Notification::LrtError { sender, message }) => {
                    warn!(lrt = sender, %message, "worker reported an error");
                    failure.get_or_insert(PisdfError::Lrt {
                        lrt: sender,
                        message,
                    });
                }
                Some(_) => {}
                None => {
                    failure.get_or_insert(PisdfError::Lrt {
                        lrt: u16::MAX,
                        message: "timed out draining the iteration".into(),
                    });
                    break;
                }
            }
        }
        self.rt.communicator().send_to_all(|| LrtInput::Clear);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
