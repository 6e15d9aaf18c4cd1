//! Call-scoped request/response handles.
//!
//! A [`CallContext`] is created by whatever entry point receives the call and
//! passed explicitly into the interceptor. For the dynamic extent of a guarded
//! call it is also bound as a task-local, so code deep in the call chain can
//! reach the original response channel through [`CallContext::current`]. The
//! binding is dropped when the call's future completes or is dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;

tokio::task_local! {
    static CURRENT: CallContext;
}

/// Read side of an inbound call.
pub trait RequestCarrier: Send + Sync {
    /// Header value by name. Lookups are case-insensitive.
    fn header(&self, name: &str) -> Option<String>;

    /// Transport-level peer address, empty if unknown.
    fn peer_address(&self) -> String;
}

/// Write side of an inbound call.
pub trait ResponseCarrier: Send + Sync {
    fn set_header(&self, name: &str, value: &str);

    fn write(&self, bytes: &[u8]) -> io::Result<()>;

    /// Flush and release the channel. Further writes are rejected.
    fn close(&self) -> io::Result<()>;
}

/// Handles of one call.
#[derive(Clone)]
pub struct CallContext {
    request: Arc<dyn RequestCarrier>,
    response: Arc<dyn ResponseCarrier>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("peer_address", &self.request.peer_address())
            .finish()
    }
}

impl CallContext {
    pub fn new(request: Arc<dyn RequestCarrier>, response: Arc<dyn ResponseCarrier>) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &dyn RequestCarrier {
        self.request.as_ref()
    }

    pub fn response(&self) -> &dyn ResponseCarrier {
        self.response.as_ref()
    }

    /// Run `fut` with this context bound as the current one.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The context bound to the running call, if any.
    pub fn current() -> Option<CallContext> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }
}

/// An in-memory request, for embedding adapters and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRequest {
    headers: HashMap<String, String>,
    peer_address: String,
}

impl StaticRequest {
    pub fn new(peer_address: impl Into<String>) -> Self {
        Self {
            headers: HashMap::new(),
            peer_address: peer_address.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }
}

impl RequestCarrier for StaticRequest {
    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn peer_address(&self) -> String {
        self.peer_address.clone()
    }
}

#[derive(Debug, Default)]
struct BufferedState {
    headers: HashMap<String, String>,
    body: Vec<u8>,
    closed: bool,
}

/// A response that collects everything written to it.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    state: Mutex<BufferedState>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state.lock().headers.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn body(&self) -> Vec<u8> {
        self.state.lock().body.clone()
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().body).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl ResponseCarrier for BufferedResponse {
    fn set_header(&self, name: &str, value: &str) {
        self.state
            .lock()
            .headers
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "response already closed"));
        }
        state.body.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
