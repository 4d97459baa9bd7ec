use crate::barrier::CompletionBarrier;
use crate::client::{Handler, Message};
use crate::config::SessionConfig;
use crate::decode::decode;
use log::{info, warn};
use std::borrow::Cow;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// Retained messages are dropped only when the policy asks for it.
pub fn accept(retained: bool, ignore_retained: bool) -> bool {
    !(retained && ignore_retained)
}

pub fn summary(msg: &Message, size: usize) -> String {
    format!(
        "retained={}, topic={}, size={}",
        msg.retained, msg.topic, size
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ignored,
    Accepted { remaining: usize },
}

/// Filter, decode, report, count. Shared by every subscription of a session.
pub struct Pipeline {
    ignore_retained: bool,
    ignore_payload: bool,
    barrier: Arc<CompletionBarrier>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl Pipeline {
    pub fn new(
        config: &SessionConfig,
        barrier: Arc<CompletionBarrier>,
        out: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            ignore_retained: config.ignore_retained,
            ignore_payload: config.ignore_payload,
            barrier,
            out: Mutex::new(out),
        }
    }

    pub fn handle(&self, msg: Message) -> Outcome {
        if !accept(msg.retained, self.ignore_retained) {
            info!("ignoring retained msg");
            return Outcome::Ignored;
        }

        let payload = match decode(&msg.topic, &msg.payload) {
            Ok(p) => p,
            Err(e) => {
                warn!("{}", e);
                Cow::Borrowed(&[][..])
            }
        };
        let line = summary(&msg, payload.len());

        {
            let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
            let res = if self.ignore_payload {
                writeln!(out, "{}", line)
            } else {
                info!("{}", line);
                out.write_all(&payload).and_then(|()| out.write_all(b"\n"))
            };
            if let Err(e) = res.and_then(|()| out.flush()) {
                warn!("could not write message output: {}", e);
            }
        }

        Outcome::Accepted {
            remaining: self.barrier.decrement(),
        }
    }

    pub fn handler(self: &Arc<Self>) -> Handler {
        let pipeline = self.clone();
        Arc::new(move |msg| {
            pipeline.handle(msg);
        })
    }
}
