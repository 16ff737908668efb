mod ack_sender;
mod events_client;
mod heartbeat_checker;
mod stream_receiver;

pub use ack_sender::AckSender;
pub use events_client::{EventsClient, OperationHandler};
pub use heartbeat_checker::HeartbeatChecker;
pub use stream_receiver::StreamReceiver;
