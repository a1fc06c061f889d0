/// Hops a mutation of the loaded-module collection onto whichever thread
/// observers of that collection expect (a UI thread, typically).
pub trait Dispatcher: Send + Sync {
    fn run(&self, action: Box<dyn FnOnce() + Send>);
}

/// Runs every action immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn run(&self, action: Box<dyn FnOnce() + Send>) {
        action();
    }
}
