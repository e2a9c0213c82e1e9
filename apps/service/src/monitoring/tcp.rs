use std::time::Instant;

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::checker::Checker;
use super::heartbeat::{Heartbeat, Status};
use super::tailscale_ping::timeout_for_interval;
use crate::database::models::Monitor;
use crate::error::CheckError;

/// TCP connect checker: the target is reachable when a connection to
/// `host:port` completes within the deadline. Round-trip latency is
/// the connect time.
pub struct TcpChecker;

impl TcpChecker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(
        &self,
        monitor: &Monitor,
        heartbeat: &mut Heartbeat,
    ) -> Result<(), CheckError> {
        let deadline = timeout_for_interval(monitor.interval_seconds);
        let start = Instant::now();

        let connect = TcpStream::connect(&monitor.hostname);
        match timeout(deadline, connect).await {
            Ok(Ok(_stream)) => {
                let elapsed = start.elapsed().as_millis() as u64;
                heartbeat.status = Status::Up;
                heartbeat.ping = Some(elapsed);
                heartbeat.msg = format!("connected to {} in {}ms", monitor.hostname, elapsed);
                Ok(())
            }
            Ok(Err(err)) => Err(CheckError::ExecutionFailure(format!(
                "connect to {} failed: {err}",
                monitor.hostname
            ))),
            Err(_) => Err(CheckError::Timeout(format!(
                "connect to {} exceeded {}ms",
                monitor.hostname,
                deadline.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_monitor(hostname: &str) -> Monitor {
        Monitor {
            id: 1,
            name: "local".to_string(),
            hostname: hostname.to_string(),
            check_type: "tcp".to_string(),
            interval_seconds: 10,
            max_retries: 0,
            weight: 1000,
            user_id: 1,
            active: true,
        }
    }

    #[tokio::test]
    async fn connect_to_listening_socket_marks_up() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let checker = TcpChecker::new();
        let monitor = tcp_monitor(&addr.to_string());
        let mut heartbeat = Heartbeat::pending(monitor.id);

        checker.check(&monitor, &mut heartbeat).await.unwrap();
        assert_eq!(heartbeat.status, Status::Up);
        assert!(heartbeat.ping.is_some());
        assert!(heartbeat.msg.contains("connected to"));
    }

    #[tokio::test]
    async fn refused_connection_raises_execution_failure() {
        // Bind then drop to get a port that refuses connections.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let checker = TcpChecker::new();
        let monitor = tcp_monitor(&addr.to_string());
        let mut heartbeat = Heartbeat::pending(monitor.id);

        let err = checker.check(&monitor, &mut heartbeat).await.unwrap_err();
        assert!(matches!(err, CheckError::ExecutionFailure(_)));
        // Failure leaves the heartbeat untouched for the caller.
        assert_eq!(heartbeat.status, Status::Pending);
        assert_eq!(heartbeat.ping, None);
    }
}
