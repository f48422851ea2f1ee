//! Authenticated request pipeline with one-shot 401 recovery.

// crates.io
use http::{HeaderValue, StatusCode, header::AUTHORIZATION};
// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	config::SessionConfig,
	coordinator::RefreshCoordinator,
	error::{ConfigError, TransportError, UnauthenticatedError},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	transport::{self, HttpRequest, HttpResponse, HttpTransport},
};

/// Attaches the session's bearer token to outgoing requests and recovers from a 401 once.
///
/// A rejected request triggers a refresh (joining any cycle already in flight) and is
/// replayed with the new token. A second 401 surfaces as
/// [`UnauthenticatedError::RejectedAfterRefresh`]; other statuses and transport errors are
/// returned untouched and never retried.
#[derive(Clone, Debug)]
pub struct AuthenticatedRequestPipeline<T> {
	coordinator: RefreshCoordinator,
	transport: Arc<T>,
}
impl<T> AuthenticatedRequestPipeline<T>
where
	T: HttpTransport,
{
	/// Creates a pipeline sending through `transport` with tokens from `coordinator`.
	pub fn new(coordinator: RefreshCoordinator, transport: T) -> Self {
		Self { coordinator, transport: Arc::new(transport) }
	}

	/// Coordinator supplying tokens to this pipeline.
	pub fn coordinator(&self) -> &RefreshCoordinator {
		&self.coordinator
	}

	/// Sends `request`, replaying it once after a 401 and a successful refresh.
	///
	/// Requests go out without an `Authorization` header when no session is held; the
	/// server's 401 then ends in [`UnauthenticatedError::RefreshFailed`].
	pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
		const KIND: FlowKind = FlowKind::Request;

		let span = FlowSpan::new(KIND, "send");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.send_inner(request)).await;

		obs::record_flow_outcome(
			KIND,
			if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure },
		);

		result
	}

	async fn send_inner(&self, request: HttpRequest) -> Result<HttpResponse> {
		let record = self.coordinator.valid_record().await;
		let original = transport::clone_request(&request);
		let mut retries_left = SessionConfig::MAX_RETRIES_PER_REQUEST;
		let mut response = self.execute(request, record.as_deref()).await?;
		let mut sent_with = record.map(|record| record.access_token.clone());

		while response.status() == StatusCode::UNAUTHORIZED {
			if retries_left == 0 {
				tracing::debug!("request rejected again after refresh");

				return Err(UnauthenticatedError::RejectedAfterRefresh {
					status: response.status().as_u16(),
				}
				.into());
			}

			retries_left -= 1;

			tracing::debug!("request rejected with 401; refreshing before replay");

			let record = self
				.coordinator
				.refresh_rejected(sent_with.as_ref())
				.await
				.map_err(|err| match err {
					Error::Refresh(source) => UnauthenticatedError::RefreshFailed(source).into(),
					other => other,
				})?;

			response = self.execute(transport::clone_request(&original), Some(&record)).await?;
			sent_with = Some(record.access_token.clone());
		}

		Ok(response)
	}

	async fn execute(
		&self,
		mut request: HttpRequest,
		record: Option<&TokenRecord>,
	) -> Result<HttpResponse> {
		if let Some(record) = record {
			let mut value = HeaderValue::from_str(&record.authorization_value())
				.map_err(ConfigError::from)?;

			value.set_sensitive(true);
			request.headers_mut().insert(AUTHORIZATION, value);
		}

		self.transport.execute(request).await.map_err(|e| TransportError::network(e).into())
	}
}
