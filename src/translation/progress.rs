/*!
 * Progress reporting from a running translation.
 *
 * A translator reports the stage it enters and the task running it pulses
 * while it is being polled. Whoever holds the receiver sees both as
 * changes on a `watch` channel, so a silent channel means the translation
 * stopped making progress.
 */

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Stage of a translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preprocessing,
    Translating,
    Postprocessing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preprocessing => "preprocessing",
            Self::Translating => "translating",
            Self::Postprocessing => "postprocessing",
        };
        f.write_str(name)
    }
}

/// Sending half handed to a translator for one job
#[derive(Debug, Clone)]
pub struct Progress {
    key: Arc<str>,
    sender: Arc<watch::Sender<Option<Stage>>>,
}

impl Progress {
    /// Channel for the job identified by `key`
    pub fn new(key: &str) -> (Self, watch::Receiver<Option<Stage>>) {
        let (sender, receiver) = watch::channel(None);
        let progress = Self {
            key: Arc::from(key),
            sender: Arc::new(sender),
        };
        (progress, receiver)
    }

    /// Key of the job being translated
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Enter `stage`
    pub fn stage(&self, stage: Stage) {
        self.sender.send_replace(Some(stage));
    }

    /// Signal liveness without changing the stage
    pub fn pulse(&self) {
        self.sender.send_modify(|_| {});
    }

    /// Stage last reported
    pub fn current(&self) -> Option<Stage> {
        *self.sender.borrow()
    }
}
