use serde_json::Value;

/// Capability a transport must provide for each connected socket.
///
/// The core never depends on a concrete transport: the WebSocket adapter
/// implements this for live connections and tests substitute a recording
/// double. The transport owns the byte stream; the store owns the directory
/// entry holding the handle.
pub trait ClientHandle: Send + Sync {
    /// Unique id issued by the transport when the socket connected.
    fn id(&self) -> &str;

    /// Queue a JSON payload for delivery. Best-effort: returns `false` when
    /// the socket is already gone. Must not block.
    fn send_json(&self, value: &Value) -> bool;

    /// Ask the transport to close the connection. The transport's disconnect
    /// path still runs afterwards, so state cleanup is not this method's job.
    fn close(&self);
}
