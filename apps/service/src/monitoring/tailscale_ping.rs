use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use super::checker::Checker;
use super::heartbeat::{Heartbeat, Status};
use crate::database::models::Monitor;
use crate::error::CheckError;

/// Reachability check for a peer on the tailnet overlay network.
///
/// Shells out to `tailscale ping <hostname>` and classifies the tool's
/// line-oriented output. The checker only classifies; retry and
/// DOWN-recording policy belong to the caller.
pub struct TailscalePingChecker;

impl TailscalePingChecker {
    pub fn new() -> Self {
        Self
    }
}

/// Hard wall-clock limit for the child process: 80% of the monitor's
/// interval, so a check can never still be running when the next
/// scheduled check starts. Bounds child-process accumulation without
/// any locking.
pub fn timeout_for_interval(interval_seconds: u64) -> Duration {
    Duration::from_millis(interval_seconds * 1000 * 8 / 10)
}

/// Successful verdict extracted from the tool's output.
#[derive(Debug, PartialEq, Eq)]
pub struct PingReply {
    pub ping_ms: u64,
    pub line: String,
}

/// First-match line classifier over the tool's standard output.
///
/// Scans lines in order and terminates at the first decisive line.
/// Blank lines are skipped silently. Blank-only output carries no
/// verdict at all and is reported as `UnexpectedOutput` with empty
/// detail rather than leaving the heartbeat untouched.
pub fn classify_output(stdout: &str) -> Result<PingReply, CheckError> {
    for line in stdout.lines() {
        if line.contains("pong from") {
            let ping_ms = extract_ping_ms(line)
                .ok_or_else(|| CheckError::UnexpectedOutput(line.to_string()))?;
            return Ok(PingReply { ping_ms, line: line.to_string() });
        } else if line.contains("timed out") {
            return Err(CheckError::Timeout(line.to_string()));
        } else if line.contains("no matching peer") {
            return Err(CheckError::PeerUnreachable(line.to_string()));
        } else if line.contains("is local Tailscale IP") {
            return Err(CheckError::SelfTargetInvalid(line.to_string()));
        } else if !line.trim().is_empty() {
            return Err(CheckError::UnexpectedOutput(line.to_string()));
        }
    }

    Err(CheckError::UnexpectedOutput(String::new()))
}

/// Round-trip time: the integer prefix of the token between the
/// literal `" in "` and the following space, e.g. `… in 23ms` -> 23.
fn extract_ping_ms(line: &str) -> Option<u64> {
    let (_, after) = line.split_once(" in ")?;
    let token = after.split_whitespace().next()?;
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[async_trait::async_trait]
impl Checker for TailscalePingChecker {
    async fn check(
        &self,
        monitor: &Monitor,
        heartbeat: &mut Heartbeat,
    ) -> Result<(), CheckError> {
        let deadline = timeout_for_interval(monitor.interval_seconds);

        let mut command = Command::new("tailscale");
        command
            .arg("ping")
            .arg(&monitor.hostname)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the output future on timeout must terminate the
            // child, not leave it running past the next check.
            .kill_on_drop(true);

        let output = match timeout(deadline, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(CheckError::ExecutionFailure(err.to_string())),
            Err(_) => {
                return Err(CheckError::Timeout(format!(
                    "tailscale ping {} produced no output within {}ms",
                    monitor.hostname,
                    deadline.as_millis()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let detail =
                if stderr.trim().is_empty() { output.status.to_string() } else { stderr.trim().to_string() };
            return Err(CheckError::ExecutionFailure(detail));
        }

        // Diagnostics on stderr fail the check even when stdout also
        // carries usable data; there is no partial-success path.
        if !stderr.trim().is_empty() {
            return Err(CheckError::UnexpectedStderr(stderr.trim().to_string()));
        }

        let reply = classify_output(&stdout)?;
        heartbeat.status = Status::Up;
        heartbeat.ping = Some(reply.ping_ms);
        heartbeat.msg = reply.line;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_line_yields_reply_with_exact_latency() {
        let out = "pong from host-a (100.64.0.7) via DERP(fra) in 23ms\n";
        let reply = classify_output(out).unwrap();
        assert_eq!(reply.ping_ms, 23);
        assert_eq!(reply.line, "pong from host-a (100.64.0.7) via DERP(fra) in 23ms");
    }

    #[test]
    fn scanning_stops_at_first_decisive_line() {
        let out = "pong from host-a (100.64.0.7) via 10.0.0.2:41641 in 7ms\ntimed out\n";
        let reply = classify_output(out).unwrap();
        assert_eq!(reply.ping_ms, 7);
    }

    #[test]
    fn timed_out_raises_timeout_even_after_blank_lines() {
        let out = "\n\n\ntimed out\n";
        match classify_output(out) {
            Err(CheckError::Timeout(line)) => assert_eq!(line, "timed out"),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn no_matching_peer_raises_peer_unreachable() {
        let out = "no matching peer\n";
        assert!(matches!(classify_output(out), Err(CheckError::PeerUnreachable(_))));
    }

    #[test]
    fn local_ip_phrase_raises_self_target_invalid() {
        let out = "100.64.0.1 is local Tailscale IP\n";
        assert!(matches!(classify_output(out), Err(CheckError::SelfTargetInvalid(_))));
    }

    #[test]
    fn unknown_line_is_carried_verbatim() {
        let out = "\nsomething completely different\n\n";
        match classify_output(out) {
            Err(CheckError::UnexpectedOutput(line)) => {
                assert_eq!(line, "something completely different");
            }
            other => panic!("expected UnexpectedOutput, got {other:?}"),
        }
    }

    #[test]
    fn blank_only_output_is_unexpected_with_empty_detail() {
        match classify_output("\n\n") {
            Err(CheckError::UnexpectedOutput(detail)) => assert_eq!(detail, ""),
            other => panic!("expected UnexpectedOutput, got {other:?}"),
        }
    }

    #[test]
    fn ping_token_parses_integer_prefix() {
        assert_eq!(
            extract_ping_ms("pong from h (100.64.0.9) via DERP(ams) in 108ms"),
            Some(108)
        );
        assert_eq!(extract_ping_ms("pong from h in 5ms extra trailing"), Some(5));
        assert_eq!(extract_ping_ms("pong from h without marker"), None);
    }

    #[test]
    fn timeout_is_eighty_percent_of_interval() {
        assert_eq!(timeout_for_interval(10), Duration::from_millis(8000));
        assert_eq!(timeout_for_interval(60), Duration::from_millis(48000));
    }
}
