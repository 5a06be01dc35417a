//! Terminal multiplexer abstraction (component F's host-side
//! dependency). The multiplexer binary itself is out of scope — only
//! its command-line contract is modelled here, the way the original
//! implementation's `pkg/tmux` package shells out to `tmux`.

use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("tmux binary not found on PATH")]
    NoBinary,
    #[error("failed to run tmux: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("tmux exited with status {0}")]
    ExitStatus(i32),
}

/// The operations `pair` needs from a terminal multiplexer. `Tmux`
/// shells out to the real binary; `FakeMultiplexer` (tests only)
/// records calls in memory.
pub trait Multiplexer {
    fn has_binary(&self) -> bool;
    fn is_within(&self) -> bool;
    fn ensure_session(&self, name: &str) -> Result<(), MuxError>;
    fn current_session(&self) -> Option<String>;
    fn attached_clients(&self, name: &str) -> Result<Vec<String>, MuxError>;
    fn attach_command(&self, name: &str) -> (String, Vec<String>);
    /// Switch `client` (a name from [`Self::attached_clients`]) onto
    /// `name`, used after negotiation completes to hand the operator's
    /// own terminal over to the now-shared session.
    fn move_client(&self, client: &str, name: &str) -> Result<(), MuxError>;
}

pub struct Tmux;

impl Multiplexer for Tmux {
    fn has_binary(&self) -> bool {
        which("tmux")
    }

    fn is_within(&self) -> bool {
        std::env::var("TMUX").is_ok_and(|v| !v.is_empty())
            && std::env::var("TERM").is_ok_and(|v| v.starts_with("screen"))
    }

    fn ensure_session(&self, name: &str) -> Result<(), MuxError> {
        let status = Command::new("tmux")
            .args(["has-session", "-t", name])
            .status()?;
        if status.success() {
            return Ok(());
        }
        let status = Command::new("tmux")
            .args(["new-session", "-d", "-s", name])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(MuxError::ExitStatus(status.code().unwrap_or(-1)))
        }
    }

    fn current_session(&self) -> Option<String> {
        let output = Command::new("tmux")
            .args(["display-message", "-p", "#S"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn attached_clients(&self, name: &str) -> Result<Vec<String>, MuxError> {
        let output = Command::new("tmux")
            .args(["list-clients", "-t", name, "-F", "#{client_name}"])
            .output()?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn attach_command(&self, name: &str) -> (String, Vec<String>) {
        (
            "tmux".to_string(),
            vec!["attach-session".to_string(), "-t".to_string(), name.to_string()],
        )
    }

    fn move_client(&self, client: &str, name: &str) -> Result<(), MuxError> {
        let status = Command::new("tmux")
            .args(["switch-client", "-c", client, "-t", name])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(MuxError::ExitStatus(status.code().unwrap_or(-1)))
        }
    }
}

fn which(binary: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
        })
        .unwrap_or(false)
}

/// In-memory stand-in for [`Tmux`], used by host-flow unit tests that
/// must not depend on a real tmux binary being installed.
#[derive(Default)]
pub struct FakeMultiplexer {
    pub binary_present: bool,
    pub within_session: bool,
    pub sessions: std::sync::Mutex<Vec<String>>,
    pub clients: std::collections::HashMap<String, Vec<String>>,
}

impl Multiplexer for FakeMultiplexer {
    fn has_binary(&self) -> bool {
        self.binary_present
    }

    fn is_within(&self) -> bool {
        self.within_session
    }

    fn ensure_session(&self, name: &str) -> Result<(), MuxError> {
        let mut sessions = self.sessions.lock().unwrap();
        if !sessions.iter().any(|s| s == name) {
            sessions.push(name.to_string());
        }
        Ok(())
    }

    fn current_session(&self) -> Option<String> {
        self.sessions.lock().unwrap().last().cloned()
    }

    fn attached_clients(&self, name: &str) -> Result<Vec<String>, MuxError> {
        Ok(self.clients.get(name).cloned().unwrap_or_default())
    }

    fn attach_command(&self, name: &str) -> (String, Vec<String>) {
        ("tmux".to_string(), vec!["attach-session".into(), "-t".into(), name.into()])
    }

    fn move_client(&self, _client: &str, _name: &str) -> Result<(), MuxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_ensure_session_is_idempotent() {
        let mux = FakeMultiplexer::default();
        mux.ensure_session("pair").unwrap();
        mux.ensure_session("pair").unwrap();
        assert_eq!(mux.sessions.lock().unwrap().len(), 1);
    }

    #[test]
    fn fake_reports_current_session() {
        let mux = FakeMultiplexer::default();
        mux.ensure_session("pair").unwrap();
        assert_eq!(mux.current_session().as_deref(), Some("pair"));
    }

    #[test]
    fn fake_attach_command_targets_named_session() {
        let mux = FakeMultiplexer::default();
        let (cmd, args) = mux.attach_command("pair");
        assert_eq!(cmd, "tmux");
        assert_eq!(args, vec!["attach-session", "-t", "pair"]);
    }
}
