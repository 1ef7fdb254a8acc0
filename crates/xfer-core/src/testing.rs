//! Scripted in-memory endpoint for unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::control::CancelToken;
use crate::descriptor::TransferId;
use crate::endpoint::{UploadEndpoint, UploadTarget};
use crate::retry::EndpointError;

/// What the endpoint does with one `send` call.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Store the whole body.
    Accept,
    /// Reply with an HTTP error without storing anything.
    Http(u32),
    /// Store the first `keep` bytes, then fail and report the stored offset.
    Partial { keep: u64 },
    /// Explicit do-not-retry.
    Refuse,
    /// 503 carrying a `Retry-After` hint.
    Throttle(Duration),
}

/// One recorded `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SendRecord {
    pub id: TransferId,
    pub offset: u64,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct ScriptedEndpoint {
    /// Per-URL steps, consumed one per send; an empty script accepts.
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    /// Step used for every send to URLs without a script.
    fallback: Mutex<Option<Step>>,
    stored: Mutex<HashMap<TransferId, Vec<u8>>>,
    sends: Mutex<Vec<SendRecord>>,
    probes: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    latency: Duration,
}

impl ScriptedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn script(&self, url: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into_iter().collect());
    }

    /// Step for every send that has no script entry left.
    pub fn always(&self, step: Step) {
        *self.fallback.lock().unwrap() = Some(step);
    }

    pub fn stored(&self, id: TransferId) -> Vec<u8> {
        self.stored.lock().unwrap().get(&id).cloned().unwrap_or_default()
    }

    pub fn sends(&self) -> Vec<SendRecord> {
        self.sends.lock().unwrap().clone()
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `send` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_step(&self, url: &str) -> Step {
        if let Some(step) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front())
        {
            return step;
        }
        self.fallback.lock().unwrap().clone().unwrap_or(Step::Accept)
    }
}

impl UploadEndpoint for ScriptedEndpoint {
    fn stored_offset(&self, target: &UploadTarget<'_>) -> Result<u64, EndpointError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.stored(target.id).len() as u64)
    }

    fn send(
        &self,
        target: &UploadTarget<'_>,
        offset: u64,
        body: &mut dyn Read,
        cancel: &CancelToken,
    ) -> Result<(), EndpointError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let result = self.send_inner(target, offset, body, cancel);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl ScriptedEndpoint {
    fn send_inner(
        &self,
        target: &UploadTarget<'_>,
        offset: u64,
        body: &mut dyn Read,
        cancel: &CancelToken,
    ) -> Result<(), EndpointError> {
        if cancel.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }
        let step = self.next_step(target.url);
        let mut received = Vec::new();
        match &step {
            Step::Accept => {
                body.read_to_end(&mut received).map_err(EndpointError::Payload)?;
            }
            Step::Partial { keep } => {
                Read::take(&mut *body, *keep)
                    .read_to_end(&mut received)
                    .map_err(EndpointError::Payload)?;
            }
            Step::Http(_) | Step::Refuse | Step::Throttle(_) => {}
        }
        self.sends.lock().unwrap().push(SendRecord {
            id: target.id,
            offset,
            body: received.clone(),
        });

        let stored_len = {
            let mut stored = self.stored.lock().unwrap();
            let buf = stored.entry(target.id).or_default();
            buf.truncate(offset as usize);
            buf.extend_from_slice(&received);
            buf.len() as u64
        };

        match step {
            Step::Accept => Ok(()),
            Step::Http(code) => Err(EndpointError::Http {
                code,
                retry_after: None,
                stored_offset: None,
            }),
            Step::Partial { .. } => Err(EndpointError::PartialWrite {
                sent: received.len() as u64,
                expected: target.total_len.saturating_sub(offset),
                stored_offset: Some(stored_len),
            }),
            Step::Refuse => Err(EndpointError::Refused("scripted refusal".into())),
            Step::Throttle(hint) => Err(EndpointError::Http {
                code: 503,
                retry_after: Some(hint),
                stored_offset: None,
            }),
        }
    }
}
