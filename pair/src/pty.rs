//! Host-side PTY allocation and the reader thread that feeds its
//! output into the async event loop.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use crate::control::WindowSize;

/// One chunk of PTY output, capped at 1KiB to match the channel's
/// per-frame budget.
pub const READ_CHUNK: usize = 1024;

pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtySession {
    /// Open a PTY sized `rows`x`cols` and spawn the multiplexer attach
    /// command inside it.
    pub fn spawn(rows: u16, cols: u16, program: &str, args: &[String]) -> Result<(Self, mpsc::Receiver<Vec<u8>>)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to open PTY")?;

        let mut cmd = CommandBuilder::new(program);
        for arg in args {
            cmd.arg(arg);
        }
        let child = pair
            .slave
            .spawn_command(cmd)
            .context("failed to spawn multiplexer attach command")?;
        drop(pair.slave);

        let writer = pair.master.take_writer().context("failed to take PTY writer")?;
        let reader = pair
            .master
            .try_clone_reader()
            .context("failed to clone PTY reader")?;

        let (tx, rx) = mpsc::channel(64);
        spawn_reader_thread(reader, tx);

        Ok((
            Self {
                master: pair.master,
                writer,
                child,
            },
            rx,
        ))
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    pub fn resize(&self, size: WindowSize) -> Result<()> {
        self.master
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: size.x,
                pixel_height: size.y,
            })
            .context("failed to resize PTY")
    }

    pub fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }
}

fn spawn_reader_thread(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    std::thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_runs_command_and_streams_output() {
        let (mut session, mut rx) = PtySession::spawn(24, 80, "echo", &["pty test ok".to_string()])
            .expect("failed to spawn echo under a pty");

        let mut collected = Vec::new();
        while let Some(chunk) = rx.recv().await {
            collected.extend_from_slice(&chunk);
        }

        let output = String::from_utf8_lossy(&collected);
        assert!(output.contains("pty test ok"), "unexpected output: {output:?}");
        let _ = session.kill();
    }

    #[test]
    fn resize_on_a_live_pty_succeeds() {
        let (session, _rx) = PtySession::spawn(24, 80, "cat", &[]).expect("failed to spawn cat under a pty");
        session
            .resize(WindowSize { rows: 40, cols: 120, x: 0, y: 0 })
            .expect("resize should succeed on a live pty");
    }
}
