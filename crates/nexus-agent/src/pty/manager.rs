//! PTY spawning and I/O
//!
//! Each PTY gets a dedicated reader thread (portable-pty readers are
//! blocking) that streams output chunks into the runtime's event channel
//! and reports the exit code once the stream ends.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, MasterPty, PtySize, PtySystem};
use tokio::sync::mpsc;

use nexus_core::types::SessionId;
use nexus_protocol::TerminalSize;

use super::spawn::SpawnPolicy;

/// Read chunk size for the PTY reader thread
const READ_BUFFER_SIZE: usize = 8192;

/// Events emitted by PTY reader threads
#[derive(Debug)]
pub enum PtyEvent {
    /// Output bytes from a session's PTY
    Output {
        session_id: SessionId,
        data: Vec<u8>,
    },
    /// The session's shell process exited
    Exited {
        session_id: SessionId,
        exit_code: Option<i32>,
    },
}

/// Spawns PTYs and wires their reader threads
pub struct PtyManager {
    pty_system: Box<dyn PtySystem + Send>,
    event_tx: mpsc::Sender<PtyEvent>,
}

/// A live PTY with its I/O handles
pub struct PtyHandle {
    /// Process id of the shell, if known
    pub pid: Option<u32>,
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
}

impl PtyManager {
    /// Create a manager emitting into the given event channel
    pub fn new(event_tx: mpsc::Sender<PtyEvent>) -> Self {
        Self {
            pty_system: native_pty_system(),
            event_tx,
        }
    }

    /// Spawn a shell for a session at the given size.
    ///
    /// The reader thread runs until the process exits or the handle's
    /// master side is dropped.
    pub fn spawn(
        &self,
        session_id: &SessionId,
        policy: &SpawnPolicy,
        size: TerminalSize,
    ) -> Result<PtyHandle> {
        tracing::info!("Spawning PTY for session {} at {}", session_id, size);

        let pair = self
            .pty_system
            .openpty(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("opening PTY")?;

        let cmd = policy.build_command();
        let child = pair
            .slave
            .spawn_command(cmd)
            .context("spawning shell")?;
        let pid = child.process_id();
        tracing::debug!("Shell for session {} has pid {:?}", session_id, pid);

        let reader = pair
            .master
            .try_clone_reader()
            .context("cloning PTY reader")?;
        let writer = pair.master.take_writer().context("taking PTY writer")?;

        // The slave side is only needed for the spawn; the master must
        // stay alive for the PTY's lifetime.
        drop(pair.slave);

        let child = Arc::new(Mutex::new(child));
        spawn_reader_thread(
            session_id.clone(),
            reader,
            Arc::clone(&child),
            self.event_tx.clone(),
        );

        Ok(PtyHandle {
            pid,
            writer,
            master: pair.master,
            child,
        })
    }
}

impl PtyHandle {
    /// Write input bytes to the PTY
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).context("writing to PTY")?;
        self.writer.flush().context("flushing PTY")?;
        Ok(())
    }

    /// Resize the PTY
    pub fn resize(&self, size: TerminalSize) -> Result<()> {
        self.master
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("resizing PTY")?;
        Ok(())
    }

    /// Kill the shell process.
    ///
    /// The exit is reported through the reader thread like any other.
    pub fn kill(&self) {
        if let Ok(mut child) = self.child.lock() {
            if let Err(e) = child.kill() {
                tracing::debug!("Kill failed (process likely gone): {}", e);
            }
        }
    }
}

fn spawn_reader_thread(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    event_tx: mpsc::Sender<PtyEvent>,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let event = PtyEvent::Output {
                        session_id: session_id.clone(),
                        data: buf[..n].to_vec(),
                    };
                    if event_tx.blocking_send(event).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }

        // Stream ended: reap the child for its exit code.
        let exit_code = child
            .lock()
            .ok()
            .and_then(|mut child| child.wait().ok())
            .map(|status| status.exit_code() as i32);

        let _ = event_tx.blocking_send(PtyEvent::Exited {
            session_id,
            exit_code,
        });
    });
}
