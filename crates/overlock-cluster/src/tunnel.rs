//! Port-forward tunnel to the registry pod
//!
//! A [`Tunnel`] lives for exactly one operation. Two tasks share it:
//!
//! - the forwarder resolves the pod, binds a loopback port, signals ready,
//!   then splices every accepted connection to a pod stream until stopped;
//! - the operation waits for ready, runs the caller's closure against
//!   `localhost:<port>`, and fires stop whatever the outcome.
//!
//! The operation never starts before ready, and the forwarder never exits
//! before stop (unless it failed first, in which case the operation is
//! skipped).

use crate::traits::{ClusterHandle, PodStream};
use overlock_core::{Error, RegistrySettings, Result};
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::copy_bidirectional;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// Pod and port a tunnel forwards to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub namespace: String,
    /// Label selector; the first matching pod is used
    pub selector: String,
    pub remote_port: u16,
}

impl TunnelTarget {
    /// The registry listener of the local registry pod
    pub fn registry(settings: &RegistrySettings) -> Self {
        Self {
            namespace: settings.namespace.clone(),
            selector: settings.pod_selector(),
            remote_port: settings.registry_port,
        }
    }
}

/// Append-only output and error lines of a tunnel
#[derive(Debug, Clone, Default)]
pub struct TunnelLog {
    output: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl TunnelLog {
    fn push_output(&self, line: impl Into<String>) {
        let line = line.into();
        trace!("tunnel: {}", line);
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    fn push_error(&self, line: impl Into<String>) {
        let line = line.into();
        debug!("tunnel error: {}", line);
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    pub fn output(&self) -> Vec<String> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One-shot stop signal; firing more than once has no effect
#[derive(Debug)]
pub struct StopSignal {
    sender: Mutex<Option<oneshot::Sender<()>>>,
    fired: AtomicUsize,
}

impl StopSignal {
    fn new(sender: oneshot::Sender<()>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            fired: AtomicUsize::new(0),
        }
    }

    /// Close the signal, returning `false` if it was already closed
    pub fn fire(&self) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                // The forwarder may already be gone after a failure
                let _ = sender.send(());
                self.fired.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// How many times the signal was actually closed (0 or 1)
    pub fn fired_count(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

/// A single-use tunnel
pub struct Tunnel<'a> {
    cluster: &'a dyn ClusterHandle,
    target: TunnelTarget,
    log: TunnelLog,
    stop: Arc<StopSignal>,
    stop_rx: oneshot::Receiver<()>,
}

impl<'a> Tunnel<'a> {
    pub fn new(cluster: &'a dyn ClusterHandle, target: TunnelTarget) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        Self {
            cluster,
            target,
            log: TunnelLog::default(),
            stop: Arc::new(StopSignal::new(stop_tx)),
            stop_rx,
        }
    }

    /// Shared view of the output and error lines
    pub fn log(&self) -> TunnelLog {
        self.log.clone()
    }

    /// Shared handle to the stop signal
    pub fn stop_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.stop)
    }

    /// Run `operation` against the tunnel's local address
    ///
    /// An operation error wins over a forwarder error. If the forwarder
    /// fails before it is ready, `operation` is never called.
    pub async fn run<F, Fut, T>(self, operation: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Tunnel {
            cluster,
            target,
            log,
            stop,
            stop_rx,
        } = self;
        let (ready_tx, ready_rx) = oneshot::channel::<u16>();

        let forwarder = forward(cluster, &target, ready_tx, stop_rx, &log);

        let run_operation = async {
            let Ok(port) = ready_rx.await else {
                stop.fire();
                return None;
            };
            let address = format!("localhost:{}", port);
            debug!("Tunnel ready at {}", address);
            let result = operation(address).await;
            stop.fire();
            Some(result)
        };

        let (forwarded, outcome) = tokio::join!(forwarder, run_operation);

        match outcome {
            Some(Err(e)) => Err(e),
            Some(Ok(value)) => forwarded.map(|()| value),
            None => match forwarded {
                Err(e) => Err(e),
                Ok(()) => Err(Error::TunnelClosed {
                    namespace: target.namespace.clone(),
                    selector: target.selector.clone(),
                }),
            },
        }
    }
}

/// Open a tunnel to `target`, run `operation` through it, and tear it down
pub async fn with_tunnel<F, Fut, T>(
    cluster: &dyn ClusterHandle,
    target: &TunnelTarget,
    operation: F,
) -> Result<T>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Tunnel::new(cluster, target.clone()).run(operation).await
}

async fn forward(
    cluster: &dyn ClusterHandle,
    target: &TunnelTarget,
    ready: oneshot::Sender<u16>,
    mut stop: oneshot::Receiver<()>,
    log: &TunnelLog,
) -> Result<()> {
    let result: Result<(String, TcpListener, u16, PodStream)> = async {
        let pods = cluster.list_pods(&target.namespace, &target.selector).await?;
        let Some(pod) = pods.into_iter().next() else {
            return Err(Error::PodNotFound {
                namespace: target.namespace.clone(),
                selector: target.selector.clone(),
            });
        };
        debug!("Found local registry pod: {}", pod);

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(Error::PortAllocation)?;
        let local_port = listener.local_addr().map_err(Error::PortAllocation)?.port();

        // Dial once up front so setup failures surface before ready
        let first = cluster
            .dial_pod(&target.namespace, &pod, target.remote_port)
            .await
            .map_err(|e| dial_error(&pod, e))?;
        Ok((pod, listener, local_port, first))
    }
    .await;

    let (pod, listener, local_port, first) = match result {
        Ok(setup) => setup,
        Err(e) => {
            log.push_error(e.to_string());
            return Err(e);
        }
    };

    log.push_output(format!(
        "Forwarding from 127.0.0.1:{} -> {}",
        local_port, target.remote_port
    ));
    let _ = ready.send(local_port);

    let mut first = Some(first);
    let mut connections = JoinSet::new();
    let mut accept_failures = 0u32;

    loop {
        if accept_failures > 0 {
            tokio::select! {
                _ = &mut stop => break,
                _ = tokio::time::sleep(accept_backoff(accept_failures)) => {}
            }
        }

        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => {
                while connections.try_join_next().is_some() {}

                let (mut local, peer) = match accepted {
                    Ok(conn) => {
                        accept_failures = 0;
                        conn
                    }
                    Err(e) => {
                        log.push_error(format!("accept failed: {}", e));
                        accept_failures = accept_failures.saturating_add(1);
                        continue;
                    }
                };

                let mut remote = match first.take() {
                    Some(stream) => stream,
                    None => match cluster
                        .dial_pod(&target.namespace, &pod, target.remote_port)
                        .await
                    {
                        Ok(stream) => stream,
                        Err(e) => {
                            log.push_error(dial_error(&pod, e).to_string());
                            continue;
                        }
                    },
                };

                log.push_output(format!("Handling connection for {}", target.remote_port));
                let conn_log = log.clone();
                connections.spawn(async move {
                    match copy_bidirectional(&mut local, &mut remote).await {
                        Ok((sent, received)) => {
                            trace!("{} closed: {} bytes out, {} bytes in", peer, sent, received)
                        }
                        Err(e) => conn_log.push_error(format!("connection from {}: {}", peer, e)),
                    }
                });
            }
        }
    }

    connections.abort_all();
    debug!("Tunnel to {} stopped", pod);
    Ok(())
}

/// Pause before the next accept after `failures` consecutive errors
fn accept_backoff(failures: u32) -> Duration {
    const BASE: Duration = Duration::from_millis(50);
    const MAX: Duration = Duration::from_secs(1);
    BASE.saturating_mul(1 << failures.saturating_sub(1).min(5)).min(MAX)
}

fn dial_error(pod: &str, error: Error) -> Error {
    match error {
        Error::Dial { .. } => error,
        other => Error::Dial {
            pod: pod.to_string(),
            message: other.to_string(),
        },
    }
}
