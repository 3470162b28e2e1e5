//! Boundary to the local application that answers relayed requests.
//!
//! A channel hands each sequence-tagged [`Frame`] to the [`Gateway`] on a
//! worker task and writes whatever [`Response`] comes back onto the same
//! socket. Gateways may block or take their time; the channel keeps reading
//! while a request is in flight.

use std::{error::Error, future::Future, sync::Arc};

use async_trait::async_trait;

use crate::{frame::Frame, response::Response};

/// Boxed error returned by gateways.
pub type GatewayError = Box<dyn Error + Send + Sync>;

/// Application side of the tunnel.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Produce the response to `request`.
    ///
    /// # Errors
    ///
    /// An error is logged by the channel and answered with
    /// `500 Internal Server Error`.
    async fn handle(&self, request: Frame) -> Result<Response, GatewayError>;
}

#[async_trait]
impl<G: Gateway + ?Sized> Gateway for Arc<G> {
    async fn handle(&self, request: Frame) -> Result<Response, GatewayError> {
        (**self).handle(request).await
    }
}

/// Adapter turning an async closure into a [`Gateway`].
///
/// # Examples
///
/// ```
/// use relaywire::{
///     Frame,
///     Response,
///     gateway::{FnGateway, GatewayError},
/// };
///
/// let gateway = FnGateway::new(|_request: Frame| async { Ok::<_, GatewayError>(Response::new(204)) });
/// # let _ = gateway;
/// ```
#[derive(Clone, Debug)]
pub struct FnGateway<F>(F);

impl<F> FnGateway<F> {
    /// Wrap `handler`.
    pub fn new(handler: F) -> Self { Self(handler) }
}

#[async_trait]
impl<F, Fut> Gateway for FnGateway<F>
where
    F: Fn(Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, GatewayError>> + Send + 'static,
{
    async fn handle(&self, request: Frame) -> Result<Response, GatewayError> { (self.0)(request).await }
}
