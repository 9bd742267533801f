use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use election::MasterElection;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElectionCall {
    Start,
    Stop,
}

/// A [`MasterElection`] that records participation changes and lets tests
/// decide whether this node is master.
#[derive(Debug, Default)]
pub struct FakeElection {
    master: AtomicBool,
    calls: Mutex<Vec<ElectionCall>>,
}

impl FakeElection {
    pub fn new() -> Self {
        FakeElection::default()
    }

    pub fn set_master(&self, master: bool) {
        self.master.store(master, Ordering::SeqCst);
    }

    /// The full sequence of start/stop calls, oldest first.
    pub fn calls(&self) -> Vec<ElectionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> Option<ElectionCall> {
        self.calls.lock().unwrap().last().copied()
    }
}

impl MasterElection for FakeElection {
    fn start_election(&self) {
        self.calls.lock().unwrap().push(ElectionCall::Start);
    }

    fn stop_election(&self) {
        self.calls.lock().unwrap().push(ElectionCall::Stop);
    }

    fn is_master(&self) -> bool {
        self.master.load(Ordering::SeqCst)
    }
}
