//! Reconnect supervisor.
//!
//! Drives a [`Session`] through the [`Reconnector`] state machine: connect,
//! run until the subscription ends, wait the policy delay, and start over.
//! A shutdown signal on the watch channel ends the loop at the next await
//! point, including mid-delay.

use async_trait::async_trait;
use ess_core::PipelineError;
use tokio::sync::watch;

use crate::reconnect::{ConnectionState, ReconnectPolicy, Reconnector};

/// Why [`Session::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested. The supervisor stops.
    Shutdown,
    /// The subscription stream ended. The supervisor reconnects.
    StreamClosed,
}

/// A reconnectable consumer.
#[async_trait]
pub trait Session: Send {
    /// Live connection handed from [`Self::connect`] to [`Self::run`].
    type Connection: Send;

    /// Connect and subscribe.
    async fn connect(&mut self) -> Result<Self::Connection, PipelineError>;

    /// Consume until the stream ends or `shutdown` flips to `true`.
    async fn run(
        &mut self,
        connection: Self::Connection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, PipelineError>;
}

/// Run `session` until shutdown, reconnecting per `policy`.
///
/// Returns the final connection state.
pub async fn supervise<S: Session>(
    session: &mut S,
    policy: ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> ConnectionState {
    let mut reconnector = Reconnector::new(policy);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let attempt = reconnector.begin_attempt();
        tracing::info!(attempt, "connecting to bus");

        let delay = match session.connect().await {
            Ok(connection) => {
                reconnector.connected();
                tracing::info!("bus session established");
                match session.run(connection, &mut shutdown).await {
                    Ok(SessionEnd::Shutdown) => break,
                    Ok(SessionEnd::StreamClosed) => {
                        tracing::warn!("bus subscription closed");
                        reconnector.connection_lost()
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "bus session failed");
                        reconnector.connection_lost()
                    }
                }
            }
            Err(e) => {
                let delay = reconnector.connect_failed();
                tracing::warn!(
                    attempt,
                    error = %e,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "bus connect failed"
                );
                delay
            }
        };

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(state = %reconnector.state(), "bus supervisor stopped");
    reconnector.state()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    /// Scripted session: connect results and run endings are popped in order.
    struct ScriptedSession {
        connects: VecDeque<bool>,
        runs: VecDeque<SessionEnd>,
        connect_times: Vec<Instant>,
        runs_started: u32,
    }

    impl ScriptedSession {
        fn new(connects: Vec<bool>, runs: Vec<SessionEnd>) -> Self {
            Self {
                connects: connects.into(),
                runs: runs.into(),
                connect_times: Vec::new(),
                runs_started: 0,
            }
        }
    }

    #[async_trait]
    impl Session for ScriptedSession {
        type Connection = ();

        async fn connect(&mut self) -> Result<(), PipelineError> {
            self.connect_times.push(Instant::now());
            if self.connects.pop_front().unwrap_or(true) {
                Ok(())
            } else {
                Err(PipelineError::TransportDisconnect {
                    reason: "connection refused".to_owned(),
                })
            }
        }

        async fn run(
            &mut self,
            (): (),
            shutdown: &mut watch::Receiver<bool>,
        ) -> Result<SessionEnd, PipelineError> {
            self.runs_started += 1;
            match self.runs.pop_front() {
                Some(end) => Ok(end),
                None => {
                    while shutdown.changed().await.is_ok() {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    Ok(SessionEnd::Shutdown)
                }
            }
        }
    }

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_back_off_then_connect() {
        let (_tx, rx) = watch::channel(false);
        let mut session = ScriptedSession::new(
            vec![false, false, false, false, true],
            vec![SessionEnd::Shutdown],
        );
        let start = Instant::now();
        let state = supervise(&mut session, policy(), rx).await;

        assert_eq!(state, ConnectionState::Connected);
        let offsets: Vec<u64> = session
            .connect_times
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect();
        // Waits of 1, 2, 4, 4 seconds between attempts.
        assert_eq!(offsets, vec![0, 1, 3, 7, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_end_reconnects_after_delay() {
        let (_tx, rx) = watch::channel(false);
        let mut session = ScriptedSession::new(
            vec![true, true],
            vec![SessionEnd::StreamClosed, SessionEnd::Shutdown],
        );
        let start = Instant::now();
        let state = supervise(&mut session, ReconnectPolicy::fixed(Duration::from_secs(5)), rx).await;

        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(session.runs_started, 2);
        assert_eq!(session.connect_times[1].duration_since(start), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let (tx, rx) = watch::channel(false);
        let mut session = ScriptedSession::new(vec![false; 100], vec![]);
        let handle = tokio::spawn(async move {
            let state = supervise(&mut session, ReconnectPolicy::fixed(Duration::from_secs(5)), rx).await;
            (state, session.connect_times.len())
        });

        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();
        let (state, attempts) = handle.await.unwrap();
        assert_eq!(state, ConnectionState::Disconnected { failures: 3 });
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_connected_stops() {
        let (tx, rx) = watch::channel(false);
        let mut session = ScriptedSession::new(vec![true], vec![]);
        let handle = tokio::spawn(async move { supervise(&mut session, policy(), rx).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), ConnectionState::Connected);
    }
}
