mod http_transport;

pub(crate) use http_transport::read_response;
pub use http_transport::{HttpTransport, RawResponse};
