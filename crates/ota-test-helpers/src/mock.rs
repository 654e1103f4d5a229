//! Mock implementations of the engine's collaborator traits.

use async_trait::async_trait;
use ota_engine::commands::{Ack, AckSink};
use ota_engine::flash::{FlashService, WriteHandle};
use ota_engine::lifecycle::SelfCheck;
use ota_engine::partition::{Partition, PartitionState};
use ota_engine::transport::{HttpResponse, HttpTransport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

/// Primitive calls observed by [`MockFlash`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent {
    Begin(Partition),
    Write(usize),
    End(Partition),
    Abort(Partition),
    SetBoot(Partition),
    MarkValid,
    Rollback,
    Restart,
}

#[derive(Debug)]
struct FlashInner {
    running: Partition,
    state: Option<PartitionState>,
    boot: Option<Partition>,
    image: Vec<u8>,
    events: Vec<FlashEvent>,
    fail_begin: bool,
    fail_write_after: Option<usize>,
    fail_end: bool,
}

/// In-memory flash service recording every primitive call.
///
/// A state of `None` makes metadata reads fail.
#[derive(Debug)]
pub struct MockFlash {
    inner: Mutex<FlashInner>,
    next_handle: AtomicU64,
}

impl MockFlash {
    /// Device running partition A with a valid image
    pub fn new() -> Self {
        Self::with_state(Some(PartitionState::Valid))
    }

    /// Device whose running image is in `state`
    pub fn with_state(state: Option<PartitionState>) -> Self {
        Self {
            inner: Mutex::new(FlashInner {
                running: Partition::A,
                state,
                boot: None,
                image: Vec::new(),
                events: Vec::new(),
                fail_begin: false,
                fail_write_after: None,
                fail_end: false,
            }),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Device whose partition metadata cannot be read
    pub fn unreadable() -> Self {
        Self::with_state(None)
    }

    /// Make `begin_write` fail
    pub fn fail_begin(self) -> Self {
        self.inner.lock().fail_begin = true;
        self
    }

    /// Make `write` fail once `bytes` have been written
    pub fn fail_write_after(self, bytes: usize) -> Self {
        self.inner.lock().fail_write_after = Some(bytes);
        self
    }

    /// Make `end_write` fail
    pub fn fail_end(self) -> Self {
        self.inner.lock().fail_end = true;
        self
    }

    /// Replace the running image state
    pub fn set_state(&self, state: Option<PartitionState>) {
        self.inner.lock().state = state;
    }

    /// Current running image state
    pub fn state(&self) -> Option<PartitionState> {
        self.inner.lock().state
    }

    /// Recorded primitive calls
    pub fn events(&self) -> Vec<FlashEvent> {
        self.inner.lock().events.clone()
    }

    /// Bytes written through the open write context
    pub fn image(&self) -> Vec<u8> {
        self.inner.lock().image.clone()
    }

    /// Partition selected for the next boot, if changed
    pub fn boot_partition(&self) -> Option<Partition> {
        self.inner.lock().boot
    }

    /// Number of recorded calls matching `pred`
    pub fn count(&self, pred: impl Fn(&FlashEvent) -> bool) -> usize {
        self.inner.lock().events.iter().filter(|e| pred(e)).count()
    }

    /// Number of rollback calls
    pub fn rollback_count(&self) -> usize {
        self.count(|e| *e == FlashEvent::Rollback)
    }

    /// Number of aborted write contexts
    pub fn abort_count(&self) -> usize {
        self.count(|e| matches!(e, FlashEvent::Abort(_)))
    }

    /// Number of restarts
    pub fn restart_count(&self) -> usize {
        self.count(|e| *e == FlashEvent::Restart)
    }
}

impl Default for MockFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashService for MockFlash {
    fn begin_write(&self) -> anyhow::Result<WriteHandle> {
        let mut inner = self.inner.lock();
        if inner.fail_begin {
            anyhow::bail!("no update partition available");
        }
        let partition = inner.running.other();
        inner.image.clear();
        inner.events.push(FlashEvent::Begin(partition));
        Ok(WriteHandle {
            id: self.next_handle.fetch_add(1, Ordering::Relaxed),
            partition,
        })
    }

    fn write(&self, _handle: &WriteHandle, data: &[u8]) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(limit) = inner.fail_write_after {
            if inner.image.len() + data.len() > limit {
                anyhow::bail!("flash write error at offset {}", inner.image.len());
            }
        }
        inner.image.extend_from_slice(data);
        inner.events.push(FlashEvent::Write(data.len()));
        Ok(())
    }

    fn end_write(&self, handle: &WriteHandle) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.events.push(FlashEvent::End(handle.partition));
        if inner.fail_end {
            anyhow::bail!("image verification failed");
        }
        Ok(())
    }

    fn abort_write(&self, handle: &WriteHandle) -> anyhow::Result<()> {
        self.inner
            .lock()
            .events
            .push(FlashEvent::Abort(handle.partition));
        Ok(())
    }

    fn set_boot_partition(&self, partition: Partition) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.boot = Some(partition);
        inner.events.push(FlashEvent::SetBoot(partition));
        Ok(())
    }

    fn running_partition_state(&self) -> anyhow::Result<PartitionState> {
        self.inner
            .lock()
            .state
            .ok_or_else(|| anyhow::anyhow!("partition metadata unreadable"))
    }

    fn mark_valid(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.state = Some(PartitionState::Valid);
        inner.events.push(FlashEvent::MarkValid);
        Ok(())
    }

    fn mark_invalid_and_rollback(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.state = Some(PartitionState::Invalid);
        let previous = inner.running.other();
        inner.boot = Some(previous);
        inner.events.push(FlashEvent::Rollback);
        Ok(())
    }

    fn restart(&self) -> anyhow::Result<()> {
        self.inner.lock().events.push(FlashEvent::Restart);
        Ok(())
    }
}

/// Async reader that serves at most `chunk` bytes per read
#[derive(Debug, Clone)]
pub struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    fail_after: Option<usize>,
}

impl ChunkedReader {
    /// Serve `data` in reads of up to `chunk` bytes
    pub fn new(data: impl Into<Vec<u8>>, chunk: usize) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            chunk: chunk.max(1),
            fail_after: None,
        }
    }

    /// Fail with a connection reset once `bytes` have been served
    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let mut allowed = this.data.len().saturating_sub(this.pos);
        if let Some(limit) = this.fail_after {
            if this.pos >= limit {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by mock",
                )));
            }
            allowed = allowed.min(limit - this.pos);
        }

        let n = allowed.min(this.chunk).min(buf.remaining());
        if let Some(slice) = this.data.get(this.pos..this.pos + n) {
            buf.put_slice(slice);
            this.pos += n;
        }
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Clone)]
enum Route {
    Respond {
        status: u16,
        body: Vec<u8>,
        chunk: usize,
        fail_after: Option<usize>,
    },
    Refuse(String),
}

/// Transport serving canned responses by exact URL.
///
/// Unknown URLs answer 404 with an empty body.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    /// Transport with no routes
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with `status`, whole reads
    pub fn route(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> &Self {
        self.route_chunked(url, status, body, usize::MAX)
    }

    /// Serve `body` with `status` in reads of up to `chunk` bytes
    pub fn route_chunked(&self, url: &str, status: u16, body: impl Into<Vec<u8>>, chunk: usize) -> &Self {
        self.routes.lock().insert(
            url.to_string(),
            Route::Respond {
                status,
                body: body.into(),
                chunk,
                fail_after: None,
            },
        );
        self
    }

    /// Serve 200 with `body` and reset the connection after `bytes`
    pub fn route_truncated(&self, url: &str, body: impl Into<Vec<u8>>, bytes: usize) -> &Self {
        self.routes.lock().insert(
            url.to_string(),
            Route::Respond {
                status: 200,
                body: body.into(),
                chunk: usize::MAX,
                fail_after: Some(bytes),
            },
        );
        self
    }

    /// Fail to open `url`
    pub fn refuse(&self, url: &str, reason: &str) -> &Self {
        self.routes
            .lock()
            .insert(url.to_string(), Route::Refuse(reason.to_string()));
        self
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, url: &str) -> anyhow::Result<HttpResponse> {
        self.requests.lock().push(url.to_string());
        let route = self.routes.lock().get(url).cloned();
        match route {
            Some(Route::Respond {
                status,
                body,
                chunk,
                fail_after,
            }) => {
                let mut reader = ChunkedReader::new(body, chunk);
                reader.fail_after = fail_after;
                Ok(HttpResponse {
                    status,
                    body: Box::new(reader),
                })
            }
            Some(Route::Refuse(reason)) => Err(anyhow::anyhow!("connect failed: {reason}")),
            None => Ok(HttpResponse {
                status: 404,
                body: Box::new(ChunkedReader::new(Vec::new(), 1)),
            }),
        }
    }
}

/// Acknowledgment sink that stores every ack
#[derive(Debug, Default)]
pub struct RecordingAcks {
    acks: Mutex<Vec<Ack>>,
}

impl RecordingAcks {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Acks received so far
    pub fn acks(&self) -> Vec<Ack> {
        self.acks.lock().clone()
    }

    /// Wait until at least `count` acks arrived or `deadline` passes, then
    /// return everything received
    pub async fn wait_for(&self, count: usize, deadline: Duration) -> Vec<Ack> {
        let poll = async {
            while self.acks.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        };
        let _ = tokio::time::timeout(deadline, poll).await;
        self.acks()
    }
}

#[async_trait]
impl AckSink for RecordingAcks {
    async fn send(&self, ack: Ack) -> anyhow::Result<()> {
        self.acks.lock().push(ack);
        Ok(())
    }
}

/// Self-check with a fixed verdict
#[derive(Debug, Clone)]
pub struct MockSelfCheck {
    id: String,
    pass: bool,
    critical: bool,
    delay: Duration,
}

impl MockSelfCheck {
    /// Critical check that passes
    pub fn passing(id: &str) -> Self {
        Self {
            id: id.to_string(),
            pass: true,
            critical: true,
            delay: Duration::ZERO,
        }
    }

    /// Critical check that fails
    pub fn failing(id: &str) -> Self {
        Self {
            pass: false,
            ..Self::passing(id)
        }
    }

    /// Mark the check non-critical
    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SelfCheck for MockSelfCheck {
    fn id(&self) -> &str {
        &self.id
    }

    fn critical(&self) -> bool {
        self.critical
    }

    async fn run(&self) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.pass {
            Ok(())
        } else {
            anyhow::bail!("{} reported failure", self.id)
        }
    }
}
