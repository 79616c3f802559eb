//! Scope Agents
//!
//! A scope's graph assumes a single writer: a write must not interleave with
//! a reconcile of the same scope. [`ScopeAgent`] enforces that by giving the
//! scope its own tokio task. Callers talk to it through a [`ScopeHandle`];
//! commands queue in a bounded mailbox and run one at a time.
//!
//! # How Reads Work
//!
//! Writes are applied as they arrive but not evaluated. Every read starts a
//! new epoch from the agent's [`EpochClock`] and reconciles first, so a read
//! observes every write queued before it.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::compiler::Scope;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::reactive::EpochClock;
use crate::value::{Record, Value};

enum Command {
    Put {
        key: Value,
        value: Value,
        reply: oneshot::Sender<()>,
    },
    Remove {
        key: Value,
        reply: oneshot::Sender<bool>,
    },
    Get {
        key: Value,
        reply: oneshot::Sender<Value>,
    },
    Snapshot {
        reply: oneshot::Sender<Record>,
    },
    Shutdown,
}

/// Task that owns a scope.
pub struct ScopeAgent {
    scope: Scope,
    clock: EpochClock,
    commands: mpsc::Receiver<Command>,
}

impl ScopeAgent {
    /// Start an agent for `scope` on the current tokio runtime.
    pub fn spawn(scope: Scope, config: &EngineConfig) -> ScopeHandle {
        let (sender, commands) = mpsc::channel(config.mailbox_capacity.max(1));
        let agent = ScopeAgent {
            scope,
            clock: EpochClock::new(),
            commands,
        };
        tokio::spawn(agent.run());
        ScopeHandle { commands: sender }
    }

    async fn run(mut self) {
        debug!(scope = self.scope.id().index(), "scope agent started");
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Put { key, value, reply } => {
                    self.scope.put(key, value);
                    let _ = reply.send(());
                }
                Command::Remove { key, reply } => {
                    let _ = reply.send(self.scope.remove(&key));
                }
                Command::Get { key, reply } => {
                    self.reconcile();
                    let _ = reply.send(self.scope.get(&key));
                }
                Command::Snapshot { reply } => {
                    self.reconcile();
                    let _ = reply.send(self.scope.snapshot());
                }
                Command::Shutdown => break,
            }
        }
        let released = self.scope.disconnect();
        debug!(scope = self.scope.id().index(), released, "scope agent stopped");
    }

    fn reconcile(&self) {
        let epoch = self.clock.advance();
        trace!(epoch, "agent reconcile");
        self.scope.reconcile_input(epoch);
    }
}

/// Cloneable sender side of a [`ScopeAgent`].
#[derive(Clone)]
pub struct ScopeHandle {
    commands: mpsc::Sender<Command>,
}

impl ScopeHandle {
    pub async fn put(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Put {
            key: key.into(),
            value: value.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| Error::AgentClosed)
    }

    pub async fn remove(&self, key: impl Into<Value>) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Remove {
            key: key.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| Error::AgentClosed)
    }

    /// Reconcile, then read `key` (with fallback to enclosing scopes).
    pub async fn get(&self, key: impl Into<Value>) -> Result<Value> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Get {
            key: key.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| Error::AgentClosed)
    }

    /// Reconcile, then copy the whole scope.
    pub async fn snapshot(&self) -> Result<Record> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        response.await.map_err(|_| Error::AgentClosed)
    }

    /// Stop the agent once the commands already queued have run. The agent
    /// disconnects its scope on the way out.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::AgentClosed)
    }
}
