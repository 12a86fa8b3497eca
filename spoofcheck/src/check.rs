// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The spoofing check run on the candidate's client.
//!
//! The check script sends a packet towards the destination with the spoofed source address, and
//! one with the candidate's own source address as control. It prints `1` if only the legitimate
//! packet made it through, and `0` if the spoofed one did too.

use crate::error::CheckError;
use device::{Command, DeviceExecutor};
use net::ip::IpVersion;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Arguments of one run of the check script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckRequest {
    pub candidate_source: IpAddr,
    pub spoofed_source: IpAddr,
    pub destination: IpAddr,
    pub version: IpVersion,
}

impl CheckRequest {
    /// `timeout <seconds> <interpreter> <script> <candidate source> <spoofed source>
    /// <destination> <4|6>`
    ///
    /// The device kills the script one second after `limit`, rounded up, has passed, so a check
    /// abandoned locally does not keep running on the client.
    #[must_use]
    pub fn command(&self, interpreter: &str, script: &str, limit: Duration) -> Command {
        let seconds = limit.as_secs() + u64::from(limit.subsec_nanos() > 0) + 1;
        Command::new("timeout")
            .arg(seconds)
            .arg(interpreter)
            .arg(script)
            .arg(self.candidate_source)
            .arg(self.spoofed_source)
            .arg(self.destination)
            .arg(self.version.number())
    }
}

/// Interpret the output of the check script: `1` means the spoofed packet was filtered.
///
/// # Errors
///
/// Returns [`CheckError::Unparseable`] for anything but `0` or `1`, surrounding whitespace aside.
pub fn parse_output(output: &[u8]) -> Result<bool, CheckError> {
    let text = String::from_utf8_lossy(output);
    match text.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(CheckError::Unparseable(other.to_string())),
    }
}

/// Run `command` on `device` and interpret its output, giving up after `timeout`.
///
/// Progress is logged every `poll`.
///
/// # Errors
///
/// Fails if the script cannot be run, prints something unexpected, or does not complete in time.
pub async fn run_check<E: DeviceExecutor + ?Sized>(
    executor: &E,
    device: &str,
    command: &Command,
    poll: Duration,
    timeout: Duration,
) -> Result<bool, CheckError> {
    let started = Instant::now();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval_at(started + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let run = executor.exec(device, command);
    tokio::pin!(run);

    let output = loop {
        tokio::select! {
            biased;
            output = &mut run => break output?,
            () = &mut deadline => {
                info!("check on {device} did not complete within {timeout:?}");
                return Err(CheckError::Timeout(timeout));
            }
            _ = ticker.tick() => {
                debug!("check on {device} still running after {:?}", started.elapsed());
            }
        }
    };
    parse_output(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use device::FileTransfer;
    use device::testing::{EmulatedLab, ScriptedCheck};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn request() -> CheckRequest {
        CheckRequest {
            candidate_source: "192.0.2.2".parse().unwrap(),
            spoofed_source: "203.0.113.2".parse().unwrap(),
            destination: "198.51.100.2".parse().unwrap(),
            version: IpVersion::V4,
        }
    }

    async fn lab() -> EmulatedLab {
        let lab = EmulatedLab::default();
        lab.with_address("as1_client", 0, "192.0.2.2/24".parse().unwrap());
        lab.copy("as1_client", "/host_spoof_check.py", Bytes::from_static(b"#!"))
            .await
            .unwrap();
        lab
    }

    #[test]
    fn script_contract() {
        assert_eq!(
            request()
                .command("/usr/bin/python3", "/host_spoof_check.py", Duration::from_secs(120))
                .argv(),
            [
                "timeout",
                "121",
                "/usr/bin/python3",
                "/host_spoof_check.py",
                "192.0.2.2",
                "203.0.113.2",
                "198.51.100.2",
                "4"
            ]
        );
        let command = request().command("python3", "check.py", Duration::from_millis(2500));
        assert_eq!(command.argv()[1], "4");
        assert!(parse_output(b"1\n").unwrap());
        assert!(!parse_output(b"  0 ").unwrap());
        for garbage in [&b""[..], &b"true"[..], &b"10"[..], &b"1\n0"[..]] {
            assert!(matches!(
                parse_output(garbage),
                Err(CheckError::Unparseable(_))
            ));
        }
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn outcomes() {
        let lab = lab().await;
        let poll = Duration::from_secs(2);
        let timeout = Duration::from_secs(120);
        let command = request().command("/usr/bin/python3", "/host_spoof_check.py", timeout);

        lab.script_check(ScriptedCheck::Prints("0\n".to_string()));
        let passed = run_check(&lab, "as1_client", &command, poll, timeout).await;
        assert!(!passed.unwrap());

        lab.script_check(ScriptedCheck::Fails);
        let failed = run_check(&lab, "as1_client", &command, poll, timeout).await;
        assert!(matches!(failed, Err(CheckError::Exec(_))));

        let passed = run_check(&lab, "as1_client", &command, poll, timeout).await;
        assert!(passed.unwrap());
        assert_eq!(lab.check_runs().len(), 3);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn hanging_check_times_out() {
        let lab = lab().await;
        lab.script_check(ScriptedCheck::Hangs);
        let command =
            request().command("/usr/bin/python3", "/host_spoof_check.py", Duration::from_secs(10));
        let started = Instant::now();
        let result = run_check(
            &lab,
            "as1_client",
            &command,
            Duration::from_secs(2),
            Duration::from_secs(10),
        )
        .await;
        assert!(matches!(result, Err(CheckError::Timeout(t)) if t == Duration::from_secs(10)));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert!(logs_contain("still running"));
    }
}
