//! Runs recognition off the interaction thread.
//!
//! Each submission gets its own worker thread; results come back over a
//! channel and are applied to the session by `poll`/`wait`, always on the
//! caller's thread. The session's single-flight check runs before any worker
//! is spawned.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::SubmitError;
use crate::recognition::{RecognitionResult, Recognizer};
use crate::session::{Completion, Session, SubmissionTicket};

type Outcome = (SubmissionTicket, Result<Vec<RecognitionResult>, SubmitError>);

pub struct Dispatcher {
    recognizer: Arc<dyn Recognizer>,
    tx: Sender<Outcome>,
    rx: Receiver<Outcome>,
    outstanding: usize,
}

impl Dispatcher {
    pub fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            recognizer,
            tx,
            rx,
            outstanding: 0,
        }
    }

    /// Starts a submission and returns immediately.
    pub fn submit(&mut self, session: &mut Session) -> Result<SubmissionTicket, SubmitError> {
        let pending = session.begin_submit()?;
        let ticket = pending.ticket;
        let recognizer = Arc::clone(&self.recognizer);
        let tx = self.tx.clone();

        let spawned = thread::Builder::new()
            .name(format!("inkcalc-submit-{}", ticket.0))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    pending
                        .request()
                        .and_then(|request| recognizer.recognize(&request))
                }))
                .unwrap_or_else(|_| {
                    warn!("recognizer panicked during submission {}", ticket.0);
                    Err(SubmitError::TransportFailure("recognizer panicked".to_string()))
                });
                let _ = tx.send((ticket, outcome));
            });
        if let Err(err) = spawned {
            let error = SubmitError::TransportFailure(format!("failed to start worker: {err}"));
            session.complete_submission(ticket, Err(error.clone()));
            return Err(error);
        }

        debug!("submission {} dispatched", ticket.0);
        self.outstanding += 1;
        Ok(ticket)
    }

    /// Workers that have not reported back yet, including abandoned ones.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Applies every outcome that has already arrived.
    pub fn poll(&mut self, session: &mut Session) -> Vec<Completion> {
        let mut done = Vec::new();
        while let Ok((ticket, outcome)) = self.rx.try_recv() {
            self.outstanding = self.outstanding.saturating_sub(1);
            done.push(session.complete_submission(ticket, outcome));
        }
        done
    }

    /// Blocks up to `timeout` for the next outcome.
    pub fn wait(&mut self, session: &mut Session, timeout: Duration) -> Option<Completion> {
        if self.outstanding == 0 {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok((ticket, outcome)) => {
                self.outstanding -= 1;
                Some(session.complete_submission(ticket, outcome))
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Waits for all outstanding workers, giving up after `timeout` overall.
    pub fn drain(&mut self, session: &mut Session, timeout: Duration) -> Vec<Completion> {
        let deadline = Instant::now() + timeout;
        let mut done = Vec::new();
        while self.outstanding > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                warn!("{} submission(s) still outstanding after {:?}", self.outstanding, timeout);
                break;
            }
            if let Some(completion) = self.wait(session, left) {
                done.push(completion);
            }
        }
        done
    }
}
