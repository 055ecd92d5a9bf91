//! Host timer service
//!
//! A single worker thread fires scheduled callbacks by posting exception
//! requests into the cpu's pending channel. A generation counter makes
//! rescheduling cancel any still-pending task: the worker only delivers
//! when the task's generation still matches, so a stale deadline can
//! never double-fire after the PIT has been reprogrammed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cpu::exception::ExceptionRequest;

struct Task {
    deadline: Instant,
    period: Option<Duration>,
    request: ExceptionRequest,
    generation: u64,
}

struct State {
    task: Option<Task>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    generation: AtomicU64,
}

pub struct TimerService {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

/// Cloneable scheduling handle given to devices.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Arc<Shared>,
}

impl TimerService {
    pub fn new(sink: Sender<ExceptionRequest>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                task: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
            generation: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("timer".into())
            .spawn(move || run_worker(worker_shared, sink))
            .expect("spawn timer thread");

        TimerService {
            shared,
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            state.task = None;
        }
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl TimerHandle {
    fn schedule(&self, delay: Duration, period: Option<Duration>, request: ExceptionRequest) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.shared.state.lock().unwrap();
        state.task = Some(Task {
            deadline: Instant::now() + delay,
            period,
            request,
            generation,
        });
        self.shared.cond.notify_all();
    }

    /// One callback after `delay`. Cancels anything pending.
    pub fn schedule_once(&self, delay: Duration, request: ExceptionRequest) {
        self.schedule(delay, None, request);
    }

    /// A callback every `period`, first after one period. Cancels
    /// anything pending.
    pub fn schedule_periodic(&self, period: Duration, request: ExceptionRequest) {
        self.schedule(period, Some(period), request);
    }

    /// Drop any pending task without replacing it.
    pub fn cancel(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.shared.state.lock().unwrap();
        state.task = None;
        self.shared.cond.notify_all();
    }

    /// Period of the pending task, if any. `None` period means a
    /// pending one-shot.
    pub fn pending(&self) -> Option<Option<Duration>> {
        let state = self.shared.state.lock().unwrap();
        state.task.as_ref().map(|t| t.period)
    }
}

fn run_worker(shared: Arc<Shared>, sink: Sender<ExceptionRequest>) {
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        match &mut state.task {
            None => {
                state = shared.cond.wait(state).unwrap();
            }
            Some(task) if task.deadline > now => {
                let wait = task.deadline - now;
                state = shared.cond.wait_timeout(state, wait).unwrap().0;
            }
            Some(task) => {
                // deliver only if no reschedule/cancel raced us
                let live = task.generation == shared.generation.load(Ordering::SeqCst);
                let request = task.request;
                let rearmed = match (live, task.period) {
                    (true, Some(period)) => {
                        task.deadline += period;
                        true
                    }
                    _ => false,
                };
                if !rearmed {
                    state.task = None;
                }
                if live {
                    // receiver gone means the machine is being torn down
                    if sink.send(request).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const REQ: ExceptionRequest = ExceptionRequest::Interrupt {
        interrupt: 2,
        irq: 0,
    };

    #[test]
    fn test_one_shot_fires_once() {
        let (tx, rx) = mpsc::channel();
        let timer = TimerService::new(tx);
        timer.handle().schedule_once(Duration::from_millis(5), REQ);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), REQ);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(timer.handle().pending(), None);
    }

    #[test]
    fn test_periodic_fires_repeatedly() {
        let (tx, rx) = mpsc::channel();
        let timer = TimerService::new(tx);
        timer
            .handle()
            .schedule_periodic(Duration::from_millis(2), REQ);
        for _ in 0..3 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), REQ);
        }
        assert_eq!(
            timer.handle().pending(),
            Some(Some(Duration::from_millis(2)))
        );
    }

    #[test]
    fn test_reschedule_cancels_pending() {
        let (tx, rx) = mpsc::channel();
        let timer = TimerService::new(tx);
        let handle = timer.handle();
        handle.schedule_once(Duration::from_millis(30), REQ);
        // reprogram before the first deadline elapses
        let other = ExceptionRequest::Interrupt {
            interrupt: 2,
            irq: 1,
        };
        handle.schedule_once(Duration::from_millis(5), other);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), other);
        // the first task never fires
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());
    }

    #[test]
    fn test_cancel() {
        let (tx, rx) = mpsc::channel();
        let timer = TimerService::new(tx);
        let handle = timer.handle();
        handle.schedule_once(Duration::from_millis(10), REQ);
        handle.cancel();
        assert_eq!(handle.pending(), None);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
