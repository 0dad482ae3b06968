use coap_lite::{
    CoapRequest, CoapResponse, ContentFormat, MessageType, ObserveOption, Packet, RequestType,
    ResponseType,
};
use futures::FutureExt;
use route_recognizer::Router;
use std::fmt::Debug;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tower::Service;

use crate::extract::{Accept, Bytes, FromRequest, IntoResponse, ObserveFlag, Source, StatusCode};
use crate::observer::{Observer, ObserverValue, Subscription};
use crate::registry::SmartObject;
use crate::resource::{Representation, Resource};

pub type RouterError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Path of the CoRE resource discovery interface
pub const WELL_KNOWN_CORE: &str = ".well-known/core";

/// What a path resolves to
#[derive(Clone)]
enum Route {
    Discovery,
    Resource(Arc<dyn Resource>),
}

/// The CoapRouter maps request paths onto the resources of one
/// [`SmartObject`] and keeps the observe registrations in an observer
/// database.
///
/// GET reads, PUT sets, POST toggles; anything else is 4.05. The router is
/// cheap to clone and is cloned per request.
///
/// # Type Parameters
///
/// * `O`: The type that implements the Observer trait.
#[derive(Clone)]
pub struct CoapRouter<O>
where
    O: Observer,
{
    inner: Arc<Router<Route>>,
    resources: Arc<Vec<Arc<dyn Resource>>>,
    link_format: Arc<str>,
    db: O,
    notifications: Option<Arc<Sender<ObserverValue>>>,
}

impl<O> Debug for CoapRouter<O>
where
    O: Observer,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoapRouter")
            .field(
                "resources",
                &self.resources.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("db", &self.db)
            .finish()
    }
}

impl<O> CoapRouter<O>
where
    O: Observer + Send + Sync + 'static,
{
    /// Constructs a router serving every resource of `root`.
    pub fn new(root: &SmartObject, db: O) -> Self {
        let mut inner = Router::new();
        inner.add(WELL_KNOWN_CORE, Route::Discovery);

        let resources: Vec<_> = root.resources().cloned().collect();
        for resource in &resources {
            inner.add(resource.name(), Route::Resource(resource.clone()));
        }

        Self {
            inner: Arc::new(inner),
            resources: Arc::new(resources),
            link_format: Arc::from(root.link_format()),
            db,
            notifications: None,
        }
    }

    /// Sets the channel observe notifications are queued on. Without it
    /// Observe=0 is answered as a plain GET.
    pub fn with_notifications(mut self, sender: Sender<ObserverValue>) -> Self {
        self.notifications = Some(Arc::new(sender));
        self
    }

    pub fn db(&self) -> &O {
        &self.db
    }

    pub fn link_format(&self) -> &str {
        &self.link_format
    }

    /// Looks up the resource serving `path`.
    pub fn lookup(&self, path: &str) -> Option<Arc<dyn Resource>> {
        match self.inner.recognize(normalize(path)) {
            Ok(matched) => match *matched.handler() {
                Route::Resource(resource) => Some(resource.clone()),
                Route::Discovery => None,
            },
            Err(e) => {
                tracing::debug!("Unable to recognize {:?}: {}", path, e);
                None
            }
        }
    }

    /// Drops every observation held by `peer`.
    pub async fn forget_peer(&mut self, peer: SocketAddr) {
        if let Err(e) = self.db.unregister_peer(peer).await {
            tracing::warn!("Unable to unregister observer {}: {:?}", peer, e);
        }
    }

    /// Drops every observation.
    pub async fn forget_all(&mut self) {
        if let Err(e) = self.db.unregister_all().await {
            tracing::warn!("Unable to unregister observers: {:?}", e);
        }
    }

    /// Spawns one task per resource that turns its change events into
    /// notifications for the resource's observers.
    pub fn start_change_forwarding(&self) -> Vec<JoinHandle<()>> {
        self.resources
            .iter()
            .map(|resource| {
                let resource = resource.clone();
                let mut changes = resource.subscribe();
                let mut db = self.db.clone();

                tokio::spawn(async move {
                    loop {
                        let snapshot = match changes.recv().await {
                            Ok(snapshot) => snapshot,
                            Err(RecvError::Lagged(skipped)) => {
                                tracing::warn!(
                                    "Skipped {} changes of {}",
                                    skipped,
                                    resource.name()
                                );
                                continue;
                            }
                            Err(RecvError::Closed) => break,
                        };

                        if let Err(e) = db
                            .notify(resource.name(), resource.as_ref(), &snapshot)
                            .await
                        {
                            tracing::error!(
                                "Unable to notify observers of {}: {:?}",
                                resource.name(),
                                e
                            );
                        }
                    }
                })
            })
            .collect()
    }

    async fn dispatch(
        mut self,
        request: &CoapumRequest<SocketAddr>,
    ) -> Result<CoapResponse, RouterError> {
        let path = normalize(request.get_path()).to_string();
        let method = *request.get_method();

        let route = match self.inner.recognize(&path) {
            Ok(matched) => Route::clone(matched.handler()),
            Err(_) => {
                tracing::info!("No resource found for {:?} /{}", method, path);
                return Ok(StatusCode::NotFound.into_response()?);
            }
        };

        let resource = match route {
            Route::Discovery => {
                return match method {
                    RequestType::Get => Ok(self.discovery().into_response()?),
                    _ => Ok(StatusCode::MethodNotAllowed.into_response()?),
                };
            }
            Route::Resource(resource) => resource,
        };

        match method {
            RequestType::Get => self.read(&path, resource.as_ref(), request).await,
            RequestType::Put => {
                let Bytes(payload) = Bytes::from_request(request).await?;
                Ok(resource.handle_write(&payload).await.into_response()?)
            }
            RequestType::Post => {
                let Bytes(payload) = Bytes::from_request(request).await?;
                Ok(resource.handle_toggle(&payload).await.into_response()?)
            }
            other => {
                tracing::info!("Method {:?} not allowed on /{}", other, path);
                Ok(StatusCode::MethodNotAllowed.into_response()?)
            }
        }
    }

    async fn read(
        &mut self,
        path: &str,
        resource: &dyn Resource,
        request: &CoapumRequest<SocketAddr>,
    ) -> Result<CoapResponse, RouterError> {
        let Accept(accept) = Accept::from_request(request).await?;
        let ObserveFlag(observe) = ObserveFlag::from_request(request).await?;
        let Source(peer) = Source::from_request(request).await?;

        // The observer is registered before the snapshot is taken, so a change
        // landing in between is notified rather than lost.
        let sequence = match observe {
            Some(ObserveOption::Register) if resource.is_observable() => {
                let subscription = Subscription {
                    peer,
                    token: request.message.get_token().to_vec(),
                    accept,
                };
                self.observe(path, subscription).await
            }
            Some(ObserveOption::Deregister) => {
                self.forget(path, peer).await;
                None
            }
            _ => None,
        };

        let representation = resource.handle_read(accept).await;
        let success = representation.status == StatusCode::Content;
        let mut response = match representation.into_response() {
            Ok(response) => response,
            Err(e) => {
                if sequence.is_some() {
                    self.forget(path, peer).await;
                }
                return Err(e.into());
            }
        };

        match sequence {
            Some(sequence) if success => response.message.set_observe_value(sequence),
            Some(_) => self.forget(path, peer).await,
            None => {}
        }

        Ok(response)
    }

    async fn observe(&mut self, path: &str, subscription: Subscription) -> Option<u32> {
        let Some(sender) = self.notifications.clone() else {
            tracing::debug!(
                "Observe requested on /{} without a notification channel",
                path
            );
            return None;
        };

        let peer = subscription.peer;
        match self.db.register(path, subscription, sender).await {
            Ok(sequence) => Some(sequence),
            Err(e) => {
                tracing::warn!("Unable to register observer {}: {:?}", peer, e);
                None
            }
        }
    }

    async fn forget(&mut self, path: &str, peer: SocketAddr) {
        if let Err(e) = self.db.unregister(path, peer).await {
            tracing::warn!("Unable to unregister observer {}: {:?}", peer, e);
        }
    }

    fn discovery(&self) -> Representation {
        Representation {
            status: StatusCode::Content,
            payload: self.link_format.as_bytes().to_vec(),
            content_format: Some(ContentFormat::ApplicationLinkFormat),
            max_age: None,
        }
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// `CoapumRequest` is a structure that represents a request in the CoAP (Constrained Application Protocol) communication.
/// It includes the packet message, code, path, optional observe flag and the source of the request.
///
/// # Type Parameters
///
/// * `Endpoint`: Represents the type of the endpoint from which the request is coming. (Typically SocketAddr)
#[derive(Debug, Clone)]
pub struct CoapumRequest<Endpoint> {
    pub message: Packet,
    code: RequestType,
    path: String,
    observe_flag: Option<ObserveOption>,
    pub source: Option<Endpoint>,
}

impl<Endpoint> From<CoapRequest<Endpoint>> for CoapumRequest<Endpoint> {
    fn from(req: CoapRequest<Endpoint>) -> Self {
        let path = req.get_path();
        let code = *req.get_method();
        let observe_flag = match req.get_observe_flag() {
            Some(Ok(o)) => Some(o),
            _ => None,
        };

        Self {
            message: req.message,
            source: req.source,
            path,
            code,
            observe_flag,
        }
    }
}

impl<Endpoint> CoapumRequest<Endpoint> {
    /// Returns the path of the `CoapumRequest`.
    pub fn get_path(&self) -> &String {
        &self.path
    }

    /// Returns the method of the `CoapumRequest`.
    pub fn get_method(&self) -> &RequestType {
        &self.code
    }

    /// Returns the observe flag of the `CoapumRequest`.
    pub fn get_observe_flag(&self) -> &Option<ObserveOption> {
        &self.observe_flag
    }
}

/// A helper function to create an error response from a `CoapumRequest`. The resulting `CoapResponse` will have
/// the message ID and token set from the `CoapumRequest` and the status set to the given `ResponseType`.
pub fn create_error_response(
    req: &CoapumRequest<SocketAddr>,
    rtype: ResponseType,
) -> Result<CoapResponse, RouterError> {
    let mut response = CoapResponse::new(&Packet::default())
        .ok_or("unable to create response packet")?;
    response.set_status(rtype);
    Ok(finalize(req, response))
}

/// Matches the response to its request: same message id and token, ACK for
/// a CON request and NON otherwise.
fn finalize(req: &CoapumRequest<SocketAddr>, mut response: CoapResponse) -> CoapResponse {
    response.message.header.message_id = req.message.header.message_id;
    response.message.set_token(req.message.get_token().to_vec());

    let kind = match req.message.header.get_type() {
        MessageType::Confirmable => MessageType::Acknowledgement,
        _ => MessageType::NonConfirmable,
    };
    response.message.header.set_type(kind);
    response
}

/// Implementation of the `Service` trait for `CoapRouter` with `CoapumRequest` as the request type.
impl<O> Service<CoapumRequest<SocketAddr>> for CoapRouter<O>
where
    O: Observer + Send + Sync + 'static,
{
    /// The response type for the service.
    type Response = CoapResponse;
    /// The error type for the service.
    type Error = RouterError;
    /// The future type for the service.
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    /// Polls if the service is ready to process requests.
    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        // Assume that the router is always ready.
        std::task::Poll::Ready(Ok(()))
    }

    /// Handles a `CoapumRequest` and returns a future that resolves to a `CoapResponse`.
    fn call(&mut self, request: CoapumRequest<SocketAddr>) -> Self::Future {
        let router = self.clone();

        Box::pin(async move {
            tracing::debug!(
                "{:?} /{} from {:?}",
                request.get_method(),
                normalize(request.get_path()),
                request.source
            );

            match AssertUnwindSafe(router.dispatch(&request))
                .catch_unwind()
                .await
            {
                Ok(Ok(response)) => Ok(finalize(&request, response)),
                Ok(Err(e)) => {
                    tracing::error!("Error handling {}: {}", request.get_path(), e);
                    create_error_response(&request, ResponseType::InternalServerError)
                }
                Err(_) => {
                    tracing::error!("Handler for {} panicked", request.get_path());
                    create_error_response(&request, ResponseType::InternalServerError)
                }
            }
        })
    }
}
