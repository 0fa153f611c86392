//! Runs one test body in a forked child so the engine never shares a fault
//! domain with test code. The child reports faults as serialized
//! [`FaultReport`]s over a pipe paired with its exit code; the parent never
//! sees a test fault as a language-level fault.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::log::Log;
use crate::status::Status;

/// A fault description marshaled out of the child. Reconstructed locally by
/// the parent; the original fault value never crosses the process boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultReport {
    pub message: String,
    pub trace: String,
}

/// The single value a sandboxed execution produces.
#[derive(Debug)]
pub enum SandboxOutcome {
    /// Child ran the body to completion and exited 0.
    Completed,
    /// Child reported a fault (an `Err` return or a panic).
    Fault(FaultReport),
    /// Child died without reporting: non-zero exit, signal, or timeout.
    /// Distinguished from `Fault` only in diagnostic text.
    Crashed { detail: String },
}

impl SandboxOutcome {
    pub fn status(&self) -> Status {
        match self {
            SandboxOutcome::Completed => Status::Passed,
            SandboxOutcome::Fault(_) | SandboxOutcome::Crashed { .. } => Status::Failed,
        }
    }
}

/// Executes test bodies in isolated child processes, streaming their
/// stdout/stderr onto the record bus as it is produced.
pub struct Sandbox {
    log: Log,
    timeout: Option<Duration>,
}

impl Sandbox {
    pub fn new(log: Log, timeout: Option<Duration>) -> Self {
        Self { log, timeout }
    }
}

#[cfg(unix)]
mod imp {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::mpsc::{self, RecvTimeoutError};
    use std::sync::Mutex;
    use std::thread;

    use anyhow::Context;
    use nix::sys::signal::{kill, Signal};
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{dup2, fork, pipe, ForkResult};

    use super::{FaultReport, Sandbox, SandboxOutcome};
    use crate::fixture::Fixture;
    use crate::model::{ItemHandle, TestBody, TestContext};

    const MESSAGE_CAP: usize = 4 * 1024;
    // Message + trace must fit a pipe buffer even after JSON escaping.
    const TRACE_CAP: usize = 24 * 1024;

    static PANIC_REPORT: Mutex<Option<FaultReport>> = Mutex::new(None);

    fn truncated(text: String, cap: usize) -> String {
        if text.len() <= cap {
            return text;
        }
        let mut end = cap;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &text[..end])
    }

    impl Sandbox {
        pub fn execute(
            &self,
            item: &ItemHandle,
            body: &TestBody,
            fixtures: &[Box<dyn Fixture>],
        ) -> anyhow::Result<SandboxOutcome> {
            let (out_r, out_w) = pipe().context("stdout pipe")?;
            let (err_r, err_w) = pipe().context("stderr pipe")?;
            let (fault_r, fault_w) = pipe().context("fault pipe")?;

            // Anything buffered now would otherwise be flushed twice, once
            // per process.
            let _ = std::io::stdout().flush();
            let _ = std::io::stderr().flush();

            match unsafe { fork() }.context("fork test child")? {
                ForkResult::Child => {
                    drop(out_r);
                    drop(err_r);
                    drop(fault_r);
                    run_child(out_w, err_w, fault_w, body, fixtures)
                }
                ForkResult::Parent { child } => {
                    drop(out_w);
                    drop(err_w);
                    drop(fault_w);

                    let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
                    let watchdog = self.timeout.map(|limit| {
                        thread::spawn(move || match cancel_rx.recv_timeout(limit) {
                            Err(RecvTimeoutError::Timeout) => {
                                let _ = kill(child, Signal::SIGKILL);
                                true
                            }
                            _ => false,
                        })
                    });

                    // Both streams are pumped while the child runs; a full
                    // pipe must never stall the child.
                    let stderr_pump = {
                        let log = self.log.clone();
                        let item = item.clone();
                        thread::spawn(move || {
                            pump_lines(err_r, |line| log.stderr(&item, line));
                        })
                    };
                    pump_lines(out_r, |line| self.log.stdout(item, line));

                    let mut fault_buf = Vec::new();
                    let _ = std::fs::File::from(fault_r).read_to_end(&mut fault_buf);
                    let _ = stderr_pump.join();

                    drop(cancel_tx);
                    let timed_out = watchdog
                        .map(|handle| handle.join().unwrap_or(false))
                        .unwrap_or(false);

                    let wait = waitpid(child, None).context("reap sandbox child")?;
                    Ok(interpret(wait, &fault_buf, timed_out, self.timeout))
                }
            }
        }
    }

    /// Child side: stdio redirected into the pipes, the body run under
    /// `catch_unwind`, a fault (if any) serialized, then a raw `_exit` so no
    /// parent-owned destructor or atexit hook runs twice.
    fn run_child(
        out_w: OwnedFd,
        err_w: OwnedFd,
        fault_w: OwnedFd,
        body: &TestBody,
        fixtures: &[Box<dyn Fixture>],
    ) -> ! {
        let _ = dup2(out_w.as_raw_fd(), libc::STDOUT_FILENO);
        let _ = dup2(err_w.as_raw_fd(), libc::STDERR_FILENO);
        drop(out_w);
        drop(err_w);

        std::panic::set_hook(Box::new(|info| {
            let trace = std::backtrace::Backtrace::force_capture().to_string();
            if let Ok(mut slot) = PANIC_REPORT.lock() {
                *slot = Some(FaultReport {
                    message: truncated(info.to_string(), MESSAGE_CAP),
                    trace: truncated(trace, TRACE_CAP),
                });
            }
        }));

        let ctx = TestContext::new(fixtures);
        let outcome = catch_unwind(AssertUnwindSafe(|| body(&ctx)));

        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(FaultReport {
                message: truncated(err.to_string(), MESSAGE_CAP),
                trace: truncated(format!("{err:?}"), TRACE_CAP),
            }),
            Err(payload) => Some(
                PANIC_REPORT
                    .lock()
                    .ok()
                    .and_then(|mut slot| slot.take())
                    .unwrap_or_else(|| FaultReport {
                        message: panic_message(&payload),
                        trace: String::new(),
                    }),
            ),
        };

        let code = match fault {
            Some(fault) => {
                let mut sink = std::fs::File::from(fault_w);
                let _ = serde_json::to_writer(&mut sink, &fault);
                let _ = sink.flush();
                1
            }
            None => {
                drop(fault_w);
                0
            }
        };

        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        unsafe { libc::_exit(code) }
    }

    fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
        if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "test body panicked".to_string()
        }
    }

    fn pump_lines(fd: OwnedFd, mut emit: impl FnMut(String)) {
        let mut reader = BufReader::new(std::fs::File::from(fd));
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n' | b'\r')) {
                        buf.pop();
                    }
                    emit(String::from_utf8_lossy(&buf).into_owned());
                }
            }
        }
    }

    fn interpret(
        wait: WaitStatus,
        fault_buf: &[u8],
        timed_out: bool,
        timeout: Option<std::time::Duration>,
    ) -> SandboxOutcome {
        match wait {
            WaitStatus::Exited(_, 0) => SandboxOutcome::Completed,
            WaitStatus::Exited(_, code) => {
                match serde_json::from_slice::<FaultReport>(fault_buf) {
                    Ok(fault) => SandboxOutcome::Fault(fault),
                    Err(_) => SandboxOutcome::Crashed {
                        detail: format!("test child exited with status {code} without reporting"),
                    },
                }
            }
            WaitStatus::Signaled(_, signal, _) if timed_out => SandboxOutcome::Crashed {
                detail: format!(
                    "test child timed out after {:?} and was killed ({signal:?})",
                    timeout.unwrap_or_default()
                ),
            },
            WaitStatus::Signaled(_, signal, _) => SandboxOutcome::Crashed {
                detail: format!("test child killed by signal {signal:?}"),
            },
            other => SandboxOutcome::Crashed {
                detail: format!("unexpected wait status: {other:?}"),
            },
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::{Sandbox, SandboxOutcome};
    use crate::fixture::Fixture;
    use crate::model::{ItemHandle, TestBody};

    impl Sandbox {
        pub fn execute(
            &self,
            _item: &ItemHandle,
            _body: &TestBody,
            _fixtures: &[Box<dyn Fixture>],
        ) -> anyhow::Result<SandboxOutcome> {
            anyhow::bail!("process sandboxing is not supported on this platform")
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serial_test::serial;

    use super::*;
    use crate::log::{Handler, Record, RecordPayload};
    use crate::model::{ItemHandle, TestBody, TestContext};

    #[derive(Clone, Default)]
    struct Capture {
        records: Arc<Mutex<Vec<Record>>>,
    }

    impl Handler for Capture {
        fn handle(&mut self, record: &Record) {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    fn item() -> ItemHandle {
        ItemHandle {
            uid: "sandbox-test".into(),
            name: "sandbox-test".into(),
        }
    }

    fn body(f: impl Fn(&TestContext<'_>) -> anyhow::Result<()> + 'static) -> TestBody {
        Box::new(f)
    }

    fn run(sandbox: &Sandbox, body: &TestBody) -> SandboxOutcome {
        sandbox.execute(&item(), body, &[]).expect("sandbox execute")
    }

    #[test]
    #[serial]
    fn normal_completion_maps_to_passed() {
        let sandbox = Sandbox::new(Log::new(), None);
        let outcome = run(&sandbox, &body(|_| Ok(())));
        assert!(matches!(outcome, SandboxOutcome::Completed));
        assert_eq!(outcome.status(), Status::Passed);
    }

    #[test]
    #[serial]
    fn err_return_marshals_a_fault() {
        let sandbox = Sandbox::new(Log::new(), None);
        let outcome = run(&sandbox, &body(|_| anyhow::bail!("scripted failure")));
        match outcome {
            SandboxOutcome::Fault(fault) => {
                assert!(fault.message.contains("scripted failure"));
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn panic_marshals_a_fault_with_its_message() {
        let sandbox = Sandbox::new(Log::new(), None);
        let outcome = run(&sandbox, &body(|_| panic!("scripted panic")));
        assert_eq!(outcome.status(), Status::Failed);
        match outcome {
            SandboxOutcome::Fault(fault) => {
                assert!(fault.message.contains("scripted panic"));
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn silent_nonzero_exit_is_a_crash() {
        let sandbox = Sandbox::new(Log::new(), None);
        let outcome = run(&sandbox, &body(|_| unsafe { libc::_exit(3) }));
        match outcome {
            SandboxOutcome::Crashed { detail } => {
                assert!(detail.contains("status 3"));
            }
            other => panic!("expected crash, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn child_global_state_does_not_leak_into_the_parent() {
        static FLAG: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);
        let sandbox = Sandbox::new(Log::new(), None);
        let outcome = run(
            &sandbox,
            &body(|_| {
                FLAG.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }),
        );
        assert!(matches!(outcome, SandboxOutcome::Completed));
        assert!(!FLAG.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    #[serial]
    fn stdout_and_stderr_are_streamed_as_records() {
        let capture = Capture::default();
        let log = Log::new();
        log.add_handler(capture.clone());
        let sandbox = Sandbox::new(log, None);
        let outcome = run(
            &sandbox,
            &body(|_| {
                println!("out line");
                eprintln!("err line");
                Ok(())
            }),
        );
        assert!(matches!(outcome, SandboxOutcome::Completed));
        let seen = capture.records.lock().unwrap();
        let mut out = Vec::new();
        let mut err = Vec::new();
        for record in seen.iter() {
            match &record.payload {
                RecordPayload::Stdout { data } => out.push(data.clone()),
                RecordPayload::Stderr { data } => err.push(data.clone()),
                _ => {}
            }
        }
        assert_eq!(out, ["out line"]);
        assert_eq!(err, ["err line"]);
    }

    #[test]
    #[serial]
    fn hung_child_is_killed_at_the_deadline() {
        let sandbox = Sandbox::new(Log::new(), Some(Duration::from_millis(200)));
        let outcome = run(
            &sandbox,
            &body(|_| {
                std::thread::sleep(Duration::from_secs(60));
                Ok(())
            }),
        );
        match outcome {
            SandboxOutcome::Crashed { detail } => {
                assert!(detail.contains("timed out"), "detail: {detail}");
            }
            other => panic!("expected timeout crash, got {other:?}"),
        }
        assert_eq!(
            Sandbox::new(Log::new(), None)
                .execute(&item(), &body(|_| Ok(())), &[])
                .expect("follow-up run")
                .status(),
            Status::Passed
        );
    }
}
