pub mod config_keys;
pub mod config_store;
pub mod operation_result;
pub mod results_processor;
pub mod results_publisher;
pub mod router;
mod sna_service;

pub use config_store::ConfigurationManager;
pub use operation_result::{AgentOperationResult, OperationAttributes, PublishedResult, ResultCarrier};
pub use results_processor::ResultsProcessor;
pub use results_publisher::ResultsPublisher;
pub use router::{PathMatcher, Route, RouteKind, RouteTable};
pub use sna_service::SnaService;
