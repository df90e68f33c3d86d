/// A live session with one inspection target.
///
/// Providers implement this for their own client handle; resolvers reach the
/// concrete type through [`crate::Runtime::connection`] without downcasting.
pub trait Connection: Send + Sync + 'static {
    /// Process-unique connection id.
    fn id(&self) -> u32;

    fn name(&self) -> &str;

    /// Release the underlying session. Called once when the runtime closes.
    fn close(&self) {}
}
