//! Line-oriented export, as driven by the command-line host.
//!
//! Each line of input is one already-rendered payload. Lines are taken as raw bytes: raw mode
//! forwards any byte sequence, so nothing here requires UTF-8. A trailing `\r` is stripped and
//! blank lines are ignored.
use std::{
    fmt,
    io::BufRead,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::error;

use crate::{
    dispatcher::{DispatchResult, Dispatcher},
    transport::Connector,
    workers::WorkerPool,
};

/// Outcome counts of one export run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent: {}, skipped: {}, failed: {}",
            self.sent, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Default)]
struct Tally {
    sent: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record(&self, result: &DispatchResult) {
        let counter = match result {
            DispatchResult::Sent => &self.sent,
            DispatchResult::Skipped => &self.skipped,
            DispatchResult::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> Summary {
        Summary {
            sent: self.sent.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Dispatches every non-blank line of `input` on `workers` worker threads and returns once
/// all of them have been dispatched.
///
/// A read error is counted as one failure and ends the input; lines read before it are still
/// dispatched.
pub fn export_lines<R, C>(input: R, dispatcher: &Arc<Dispatcher<C>>, workers: usize) -> Summary
where
    R: BufRead,
    C: Connector + 'static,
{
    let tally = Arc::new(Tally::default());
    {
        let workers = WorkerPool::new(workers.max(1));
        for line in input.split(b'\n') {
            let mut line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("failed to read input: {e}");
                    tally.failed.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            };
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let dispatcher = Arc::clone(dispatcher);
            let tally = Arc::clone(&tally);
            workers.execute(move || {
                let result = dispatcher.dispatch(&line);
                tally.record(&result);
            });
        }
    }
    tally.summary()
}
