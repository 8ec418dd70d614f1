use std::ffi::OsString;
use std::io::{BufRead as _, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::probe::ResourceProbe;

/// Poll period of the supervision loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("process {name} timed out after {} seconds", timeout.as_secs_f64())]
    TimedOut {
        name: String,
        timeout: Duration,
        /// Output captured before the kill.
        output: String,
    },
    #[error("supervise {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Label used in logs and errors.
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub work_dir: PathBuf,
    /// Layered over the inherited environment.
    pub env: Vec<(OsString, OsString)>,
    pub timeout: Duration,
    pub sample_resources: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub elapsed_secs: f64,
    pub cpu_percent: f64,
    pub rss_mb: f64,
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Stdout and stderr, interleaved by line.
    pub output: String,
    pub status: ExitStatus,
    pub samples: Vec<Sample>,
    pub elapsed: Duration,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

pub(crate) fn command_for(req: &RunRequest) -> Command {
    let mut cmd = Command::new(&req.program);
    cmd.args(&req.args);
    cmd.current_dir(&req.work_dir);
    for (k, v) in &req.env {
        cmd.env(k, v);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd
}

/// Spawns the request and supervises it until exit or timeout.
///
/// The exit status is returned as-is; callers decide what counts as failure.
pub fn run(req: &RunRequest) -> Result<ProcessResult, RunError> {
    let mut child = command_for(req).spawn().map_err(|source| RunError::Spawn {
        program: req.program.clone(),
        source,
    })?;
    log::debug!("spawned {} (pid {})", req.name, child.id());

    let pump = OutputPump::attach(&mut child);
    let mut probe = req.sample_resources.then(|| ResourceProbe::new(child.id()));
    let mut output = String::new();
    let mut samples = Vec::new();
    let start = Instant::now();

    let status = loop {
        pump.drain_into(&mut output);
        let polled = child.try_wait().map_err(|source| RunError::Io {
            name: req.name.clone(),
            source,
        })?;
        if let Some(status) = polled {
            break status;
        }

        let elapsed = start.elapsed();
        if elapsed > req.timeout {
            let _ = child.kill();
            let _ = child.wait();
            pump.abandon_into(&mut output);
            log::warn!("{} timed out after {:.2}s", req.name, elapsed.as_secs_f64());
            return Err(RunError::TimedOut {
                name: req.name.clone(),
                timeout: req.timeout,
                output,
            });
        }

        if let Some(probe) = probe.as_mut() {
            let reading = probe.read();
            samples.push(Sample {
                elapsed_secs: elapsed.as_secs_f64(),
                cpu_percent: reading.cpu_percent,
                rss_mb: reading.rss_mb,
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    let elapsed = start.elapsed();
    pump.finish_into(&mut output);
    Ok(ProcessResult {
        output,
        status,
        samples,
        elapsed,
    })
}

/// Drains a child's stdout and stderr on dedicated threads.
///
/// Lines are forwarded over an unbounded channel, so the readers never wait on
/// the consumer and the child never blocks on a full pipe.
pub(crate) struct OutputPump {
    rx: Receiver<String>,
    readers: Vec<JoinHandle<()>>,
}

impl OutputPump {
    pub(crate) fn attach(child: &mut Child) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, tx));
        }
        Self { rx, readers }
    }

    pub(crate) fn drain_into(&self, out: &mut String) {
        loop {
            match self.rx.try_recv() {
                Ok(line) => out.push_str(&line),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    pub(crate) fn recv_line(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Waits for both streams to close, then collects what is left.
    pub(crate) fn finish_into(self, out: &mut String) {
        let Self { rx, readers } = self;
        for reader in readers {
            let _ = reader.join();
        }
        out.extend(rx.try_iter());
    }

    /// Collects what is buffered without waiting on the readers; a killed
    /// child's descendants may still hold the pipes open.
    pub(crate) fn abandon_into(self, out: &mut String) {
        std::thread::sleep(POLL_INTERVAL);
        self.drain_into(out);
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(
    stream: R,
    tx: mpsc::Sender<String>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => return,
                Ok(_) => {
                    if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                        return;
                    }
                }
            }
        }
    })
}
