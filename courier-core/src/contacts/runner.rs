// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contact Job Runner
//!
//! Serializes contact work. One-off operations run one at a time in FIFO
//! order; sync jobs run only when no operation is pending or running and the
//! network is available. A sync job and an operation never run at the same
//! time.
//!
//! Sync requests made while no job is queued create a description; further
//! requests merge into it until it is dispatched. A request made while a job
//! runs starts a new description for the next job.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::error::ContactsError;
use super::job::{ContactSyncEvent, ContactSyncJobDescription, ContactSyncJobFactory};

type Operation = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;
type JobMutator = Box<dyn FnOnce(&mut ContactSyncJobDescription) + Send>;

/// Point-in-time view of the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerSnapshot {
    pub queued_job: Option<ContactSyncJobDescription>,
    pub running_job: Option<ContactSyncJobDescription>,
    pub operation_running: bool,
    pub pending_operations: usize,
    pub network_available: bool,
}

enum RunnerCommand {
    RunOperation(Operation),
    WithCurrentJob(JobMutator),
    OperationDone,
    JobDone {
        description: ContactSyncJobDescription,
        succeeded: bool,
    },
    Inspect(oneshot::Sender<RunnerSnapshot>),
    Shutdown,
}

/// Handle to the runner task.
#[derive(Clone)]
pub struct ContactJobRunner {
    commands: mpsc::UnboundedSender<RunnerCommand>,
    events: broadcast::Sender<ContactSyncEvent>,
}

impl ContactJobRunner {
    /// Starts the runner task. Must be called within a Tokio runtime.
    pub fn spawn(
        factory: Arc<dyn ContactSyncJobFactory>,
        network_available: watch::Receiver<bool>,
        event_capacity: usize,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(event_capacity.max(1));

        let actor = RunnerActor {
            factory,
            events: events.clone(),
            commands: commands.downgrade(),
            queued_job: None,
            running_job: None,
            operation_running: false,
            pending: VecDeque::new(),
            network_available: false,
        };
        tokio::spawn(actor.run(command_rx, network_available));

        ContactJobRunner { commands, events }
    }

    /// Queues an operation and returns a future of its result.
    ///
    /// The operation is queued immediately, so operations submitted in
    /// sequence run in that order whether or not their futures are polled. A
    /// failing or panicking operation does not stop the runner.
    pub fn run_operation<T, F, Fut>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T, ContactsError>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ContactsError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let operation: Operation = Box::new(move || {
            Box::pin(async move {
                let result = operation().await;
                let outcome = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
                let _ = tx.send(result);
                outcome
            })
        });
        let posted = self.post(RunnerCommand::RunOperation(operation));

        async move {
            posted?;
            rx.await.map_err(|_| ContactsError::Aborted)?
        }
    }

    /// Applies `mutator` to the description of the next sync job.
    pub fn with_current_job<F>(&self, mutator: F)
    where
        F: FnOnce(&mut ContactSyncJobDescription) + Send + 'static,
    {
        if self
            .post(RunnerCommand::WithCurrentJob(Box::new(mutator)))
            .is_err()
        {
            warn!("Sync request dropped, contact job runner stopped");
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ContactSyncEvent> {
        self.events.subscribe()
    }

    pub async fn inspect(&self) -> Result<RunnerSnapshot, ContactsError> {
        let (tx, rx) = oneshot::channel();
        self.post(RunnerCommand::Inspect(tx))?;
        rx.await.map_err(|_| ContactsError::Stopped)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(RunnerCommand::Shutdown);
    }

    fn post(&self, command: RunnerCommand) -> Result<(), ContactsError> {
        self.commands
            .send(command)
            .map_err(|_| ContactsError::Stopped)
    }
}

struct RunnerActor {
    factory: Arc<dyn ContactSyncJobFactory>,
    events: broadcast::Sender<ContactSyncEvent>,
    commands: mpsc::WeakUnboundedSender<RunnerCommand>,
    queued_job: Option<ContactSyncJobDescription>,
    running_job: Option<ContactSyncJobDescription>,
    operation_running: bool,
    pending: VecDeque<Operation>,
    network_available: bool,
}

impl RunnerActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<RunnerCommand>,
        mut network: watch::Receiver<bool>,
    ) {
        self.network_available = *network.borrow_and_update();
        let mut network_open = true;

        loop {
            tokio::select! {
                changed = network.changed(), if network_open => match changed {
                    Ok(()) => {
                        let available = *network.borrow_and_update();
                        self.on_network_change(available);
                    }
                    Err(_) => network_open = false,
                },
                command = commands.recv() => match command {
                    Some(RunnerCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }
        debug!("Contact job runner stopped");
    }

    fn on_command(&mut self, command: RunnerCommand) {
        match command {
            RunnerCommand::RunOperation(operation) => {
                self.pending.push_back(operation);
                self.process_next();
            }
            RunnerCommand::WithCurrentJob(mutator) => {
                let mut request = ContactSyncJobDescription::default();
                mutator(&mut request);
                self.queued_job
                    .get_or_insert_with(Default::default)
                    .merge(&request);
                self.process_next();
            }
            RunnerCommand::OperationDone => {
                self.operation_running = false;
                self.process_next();
            }
            RunnerCommand::JobDone {
                description,
                succeeded,
            } => {
                if succeeded {
                    info!(?description, "Contact sync job completed");
                } else {
                    error!(?description, "Contact sync job failed");
                }
                self.running_job = None;
                let _ = self.events.send(ContactSyncEvent::End {
                    description,
                    succeeded,
                });
                self.process_next();
            }
            RunnerCommand::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
            RunnerCommand::Shutdown => {}
        }
    }

    fn on_network_change(&mut self, available: bool) {
        debug!(available, "Network availability changed");
        self.network_available = available;
        self.process_next();
    }

    fn process_next(&mut self) {
        if self.operation_running || self.running_job.is_some() {
            return;
        }

        let Some(operation) = self.pending.pop_front() else {
            if self.network_available {
                self.process_job();
            }
            return;
        };

        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        self.operation_running = true;
        debug!(pending = self.pending.len(), "Running contact operation");

        tokio::spawn(async move {
            match tokio::spawn(operation()).await {
                Ok(Ok(())) => debug!("Contact operation completed"),
                Ok(Err(e)) => warn!(error = %e, "Contact operation failed"),
                Err(e) => error!(error = %e, "Contact operation aborted"),
            }
            let _ = commands.send(RunnerCommand::OperationDone);
        });
    }

    fn process_job(&mut self) {
        if self.running_job.is_some() || !self.network_available {
            return;
        }
        let Some(description) = self.queued_job.take() else {
            return;
        };
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        let job = self.factory.create();
        self.running_job = Some(description);
        info!(?description, "Beginning contact sync job");
        let _ = self.events.send(ContactSyncEvent::Begin(description));

        tokio::spawn(async move {
            let run = tokio::spawn(async move { job.run(description).await });
            let succeeded = match run.await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!(error = %e, "Contact sync job returned an error");
                    false
                }
                Err(e) => {
                    error!(error = %e, "Contact sync job aborted");
                    false
                }
            };
            let _ = commands.send(RunnerCommand::JobDone {
                description,
                succeeded,
            });
        });
    }

    fn snapshot(&self) -> RunnerSnapshot {
        RunnerSnapshot {
            queued_job: self.queued_job,
            running_job: self.running_job,
            operation_running: self.operation_running,
            pending_operations: self.pending.len(),
            network_available: self.network_available,
        }
    }
}
