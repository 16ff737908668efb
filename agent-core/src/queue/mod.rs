mod processor;

pub use processor::QueueAsyncProcessor;
