//! Distributed dispatch.
//!
//! A request names a registered function and a [`RequestType`]; the
//! [`Dispatcher`] decides where it runs and folds every outcome into one
//! [`AffectedItemsResult`](crate::results::AffectedItemsResult). The
//! [`NodeService`] is the receiving end on every node.

pub mod authorize;
pub mod dispatcher;
pub mod registry;
pub mod request_type;
pub mod service;

pub use authorize::{ActionPolicy, AllowAll, Authorizer};
pub use dispatcher::{Dispatcher, DistributedRequest, DAPI_COMMAND};
pub use registry::{DistributedFunction, FunctionCall, FunctionEntry, FunctionRegistry, ResultMessages};
pub use request_type::RequestType;
pub use service::NodeService;
