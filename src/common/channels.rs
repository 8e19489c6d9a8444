//! Channel type definitions for inter-task communication

use serde_json::Value;
use tokio::sync::mpsc;

use crate::strategy::EngineCommand;

/// Default buffer size for the console command channel
pub const DEFAULT_COMMAND_CHANNEL_SIZE: usize = 16;

/// Create the channel carrying raw stream messages from the transport's
/// reader task to the subscriber.
///
/// Unbounded so that a subscriber busy awaiting a response can never stall
/// the reader task that would deliver that response.
pub fn create_stream_channel() -> (mpsc::UnboundedSender<Value>, mpsc::UnboundedReceiver<Value>) {
    mpsc::unbounded_channel()
}

/// Create a new engine command channel with the default buffer size
pub fn create_command_channel() -> (mpsc::Sender<EngineCommand>, mpsc::Receiver<EngineCommand>) {
    mpsc::channel(DEFAULT_COMMAND_CHANNEL_SIZE)
}
