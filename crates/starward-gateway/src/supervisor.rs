//! Worker supervision.
//!
//! One worker per available core, each with its own SO_REUSEPORT listener
//! on the shared port; the kernel distributes connections across the fleet.
//! Worker exits are observed and answered with a configurable restart
//! policy rather than log-only attrition.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SupervisorConfig;
use crate::error::GatewayError;
use crate::pipeline::Pipeline;
use crate::server::run_worker;

/// What the supervisor does when a worker exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    Immediate { max_restarts: u32 },
    Backoff {
        initial: Duration,
        max: Duration,
        max_restarts: u32,
    },
}

impl From<SupervisorConfig> for RestartPolicy {
    fn from(config: SupervisorConfig) -> Self {
        match config {
            SupervisorConfig::Never => Self::Never,
            SupervisorConfig::Immediate { max_restarts } => Self::Immediate { max_restarts },
            SupervisorConfig::Backoff {
                initial,
                max,
                max_restarts,
            } => Self::Backoff {
                initial,
                max,
                max_restarts,
            },
        }
    }
}

impl RestartPolicy {
    /// Delay before the `restart`-th respawn of a worker, or `None` when the
    /// policy gives the worker up.
    fn restart_delay(&self, restart: u32) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Immediate { max_restarts } => {
                (restart <= *max_restarts).then_some(Duration::ZERO)
            }
            Self::Backoff {
                initial,
                max,
                max_restarts,
            } => {
                if restart > *max_restarts {
                    return None;
                }
                let exponent = restart.saturating_sub(1).min(16);
                let delay = initial.saturating_mul(1u32 << exponent);
                Some(delay.min(*max))
            }
        }
    }
}

/// Spawns and watches the worker fleet.
pub struct Supervisor {
    addr: SocketAddr,
    workers: usize,
    policy: RestartPolicy,
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        addr: SocketAddr,
        workers: usize,
        config: SupervisorConfig,
        pipeline: Arc<Pipeline>,
        cancel: CancellationToken,
    ) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism().map_or(1, usize::from)
        } else {
            workers
        };

        Self {
            addr,
            workers,
            policy: config.into(),
            pipeline,
            cancel,
        }
    }

    /// Runs until cancelled or until every worker has been given up.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let mut fleet = JoinSet::new();
        let mut restarts: HashMap<usize, u32> = HashMap::new();

        for id in 0..self.workers {
            self.spawn_worker(&mut fleet, id)?;
        }
        info!(workers = self.workers, addr = %self.addr, "Worker fleet started");

        loop {
            let joined = tokio::select! {
                joined = fleet.join_next() => joined,
                () = self.cancel.cancelled() => {
                    // Workers observe the same token; let them drain.
                    while fleet.join_next().await.is_some() {}
                    return Ok(());
                }
            };

            let Some(joined) = joined else {
                // Every worker has exited and none was respawned.
                return Ok(());
            };

            let (id, outcome) = match joined {
                Ok(exit) => exit,
                Err(e) => {
                    error!(error = %e, "Worker task panicked");
                    continue;
                }
            };

            match &outcome {
                Ok(()) => info!(worker = id, "Worker exited"),
                Err(e) => warn!(worker = id, error = %e, "Worker exited with error"),
            }

            if self.cancel.is_cancelled() {
                continue;
            }

            let count = restarts.entry(id).or_insert(0);
            *count += 1;

            match self.policy.restart_delay(*count) {
                Some(delay) => {
                    if !delay.is_zero() {
                        info!(worker = id, delay_ms = delay.as_millis() as u64, "Restarting worker after backoff");
                        tokio::time::sleep(delay).await;
                    } else {
                        info!(worker = id, "Restarting worker");
                    }
                    self.spawn_worker(&mut fleet, id)?;
                }
                None => {
                    error!(worker = id, restarts = *count - 1, "Worker given up");
                }
            }
        }
    }

    fn spawn_worker(
        &self,
        fleet: &mut JoinSet<(usize, Result<(), GatewayError>)>,
        id: usize,
    ) -> Result<(), GatewayError> {
        let listener = bind_reuseport(self.addr)?;
        let pipeline = self.pipeline.clone();
        let cancel = self.cancel.clone();

        fleet.spawn(async move {
            let result = run_worker(listener, pipeline, cancel).await;
            (id, result)
        });

        Ok(())
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("addr", &self.addr)
            .field("workers", &self.workers)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Binds a listener that shares its port with the other workers.
fn bind_reuseport(addr: SocketAddr) -> Result<tokio::net::TcpListener, GatewayError> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let listener = tokio::net::TcpListener::from_std(socket.into())?;
    Ok(listener)
}
