//! HTTP transport seam used by the authenticated request pipeline.
//!
//! Requests and responses are plain [`http`] types with buffered bodies, so the pipeline
//! can replay a request after a refresh without knowing the concrete client.

// self
use crate::_prelude::*;

/// Buffered request sent through an [`HttpTransport`].
pub type HttpRequest = http::Request<Vec<u8>>;
/// Buffered response returned by an [`HttpTransport`].
pub type HttpResponse = http::Response<Vec<u8>>;

/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a, E> =
	Pin<Box<dyn Future<Output = std::result::Result<HttpResponse, E>> + 'a + Send>>;

/// Sends a single HTTP request; no retries, no authentication.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Transport-specific failure (DNS, TCP, TLS, timeouts).
	type Error: 'static + Send + Sync + StdError;

	/// Executes `request` and buffers the response body.
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_, Self::Error>;
}

/// Copies everything a replay needs; extensions are not carried over.
pub(crate) fn clone_request(request: &HttpRequest) -> HttpRequest {
	let mut replay = http::Request::new(request.body().clone());

	*replay.method_mut() = request.method().clone();
	*replay.uri_mut() = request.uri().clone();
	*replay.version_mut() = request.version();
	*replay.headers_mut() = request.headers().clone();

	replay
}

/// Assembles a buffered response from parts that are already valid.
#[cfg(any(test, feature = "reqwest"))]
pub(crate) fn into_http_response(
	status: http::StatusCode,
	version: http::Version,
	headers: http::HeaderMap,
	body: Vec<u8>,
) -> HttpResponse {
	let mut response = http::Response::new(body);

	*response.status_mut() = status;
	*response.version_mut() = version;
	*response.headers_mut() = headers;

	response
}

#[cfg(feature = "reqwest")]
pub use reqwest_transport::ReqwestTransport;
#[cfg(feature = "reqwest")]
mod reqwest_transport {
	// self
	use crate::{
		_prelude::*,
		error::ConfigError,
		transport::{self, HttpRequest, HttpTransport, TransportFuture},
	};

	/// [`HttpTransport`] backed by a shared [`reqwest::Client`].
	#[derive(Clone, Debug)]
	pub struct ReqwestTransport(ReqwestClient);
	impl ReqwestTransport {
		/// Builds a transport around a default reqwest client.
		pub fn new() -> Result<Self, ConfigError> {
			Ok(Self(ReqwestClient::builder().build()?))
		}

		/// Reuses a caller-configured client (proxies, timeouts, TLS roots).
		pub fn with_client(client: ReqwestClient) -> Self {
			Self(client)
		}
	}
	impl HttpTransport for ReqwestTransport {
		type Error = ReqwestError;

		fn execute(&self, request: HttpRequest) -> TransportFuture<'_, Self::Error> {
			Box::pin(async move {
				let request = reqwest::Request::try_from(request)?;
				let response = self.0.execute(request).await?;
				let status = response.status();
				let version = response.version();
				let headers = response.headers().clone();
				let body = response.bytes().await?.to_vec();

				Ok(transport::into_http_response(status, version, headers, body))
			})
		}
	}
}
