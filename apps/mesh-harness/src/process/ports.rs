use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tracing::warn;

/// Force-kills whatever still holds one of `ports`, skipping this process,
/// and returns the pids it signalled.
///
/// Best effort: lookup failures (for example a missing `lsof`) are logged and ignored.
pub async fn reclaim(ports: &[u16]) -> Vec<u32> {
    reclaim_with("lsof", ports).await
}

async fn reclaim_with(lsof: &str, ports: &[u16]) -> Vec<u32> {
    let own_pid = std::process::id();
    let mut killed = Vec::new();
    for &port in ports {
        let pids = match holders_of(lsof, port).await {
            Ok(pids) => pids,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(program = lsof, "lsof not found; skipping port reclaim");
                break;
            }
            Err(err) => {
                warn!(port, error = %err, "port lookup failed");
                continue;
            }
        };
        for pid in pids.into_iter().filter(|pid| *pid != own_pid) {
            warn!(port, pid, "killing leftover process bound to harness port");
            super::force_kill_pid(pid);
            killed.push(pid);
        }
    }
    killed
}

async fn holders_of(lsof: &str, port: u16) -> io::Result<Vec<u32>> {
    // lsof exits non-zero when nothing matches, so only stdout matters.
    let output = Command::new(lsof)
        .arg(format!("-ti:{port}"))
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await?;
    Ok(parse_pids(&String::from_utf8_lossy(&output.stdout)))
}

pub(crate) fn parse_pids(raw: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = raw
        .split_whitespace()
        .filter_map(|token| token.parse().ok())
        .filter(|pid| *pid > 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}
