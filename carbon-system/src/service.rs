use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

/// An error when [sending](Addr::send) a message to a service fails.
///
/// This happens when the service has shut down, either before the message could be enqueued or
/// before it responded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("failed to send message to service")]
pub struct SendError;

/// A message interface for [services](Service).
///
/// Most commonly, this interface is an enumeration of messages, but it can also be implemented on a
/// single message. For each individual message, this type needs to implement the [`FromMessage`]
/// trait.
///
/// # Implementing Interfaces
///
/// There are three main ways to implement interfaces, which depends on the number of messages and
/// their return values. The simplest way is an interface consisting of a **single message** without
/// return value. For this case, use the message directly as interface and choose `NoResponse` as
/// response:
///
/// ```
/// use carbon_system::{FromMessage, Interface, NoResponse};
///
/// #[derive(Debug)]
/// pub struct MyMessage;
///
/// impl Interface for MyMessage {}
///
/// impl FromMessage<Self> for MyMessage {
///     type Response = NoResponse;
///
///     fn from_message(message: Self, _: ()) -> Self {
///         message
///     }
/// }
/// ```
///
/// If there is a **single message with a return value**, implement the interface as a wrapper for
/// the message and the return [`Sender`]:
///
/// ```
/// use carbon_system::{AsyncResponse, FromMessage, Interface, Sender};
///
/// #[derive(Debug)]
/// pub struct MyMessage;
///
/// #[derive(Debug)]
/// pub struct MyInterface(MyMessage, Sender<bool>);
///
/// impl Interface for MyInterface {}
///
/// impl FromMessage<MyMessage> for MyInterface {
///     type Response = AsyncResponse<bool>;
///
///     fn from_message(message: MyMessage, sender: Sender<bool>) -> Self {
///         Self(message, sender)
///     }
/// }
/// ```
///
/// Finally, interfaces can have **multiple messages**. For this, an enumeration with a variant for
/// each message is used. The variants carry the response senders of their messages, if any.
pub trait Interface: Send + 'static {}

/// Services without messages can use `()` as their interface.
impl Interface for () {}

/// Declares a message as part of an [`Interface`].
///
/// Messages have an associated `Response` type that determines the return value of sending the
/// message. Within an interface, the responder can vary for each message. There are two provided
/// responders: [`NoResponse`] for fire-and-forget messages and [`AsyncResponse`] for messages
/// that are answered by the service.
pub trait FromMessage<M>: Interface {
    /// The behavior declaring the return value when sending this message.
    type Response: MessageResponse;

    /// Converts the message into the service interface.
    fn from_message(message: M, sender: <Self::Response as MessageResponse>::Sender) -> Self;
}

/// Abstraction over response types for messages sent to a service.
pub trait MessageResponse {
    /// Sends responses from the service back to the waiting recipient.
    type Sender;

    /// The type returned from [`Addr::send`].
    type Output;

    /// Returns the response channel for an interface message.
    fn channel() -> (Self::Sender, Self::Output);
}

/// The request when sending an asynchronous message to a service.
///
/// This is returned from [`Addr::send`] when the message responds asynchronously through
/// [`AsyncResponse`]. It is a future that should be awaited. The message still runs to
/// completion if this future is dropped.
pub struct Request<T>(oneshot::Receiver<T>);

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T, SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|result| result.map_err(|_| SendError))
    }
}

/// Sends a message response from a service back to the waiting [`Request`].
///
/// The sender is part of an [`AsyncResponse`] and should be moved into the service interface
/// type. If this sender is dropped without calling [`send`](Self::send), the request fails with
/// [`SendError`].
pub struct Sender<T>(oneshot::Sender<T>);

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("open", &!self.0.is_closed())
            .finish()
    }
}

impl<T> Sender<T> {
    /// Sends the response value and closes the [`Request`].
    ///
    /// This silently drops the value if the request has been dropped.
    pub fn send(self, value: T) {
        self.0.send(value).ok();
    }
}

/// Message response resulting in an asynchronous [`Request`].
///
/// The sender must be placed on the interface in [`FromMessage::from_message`].
pub struct AsyncResponse<T>(PhantomData<T>);

impl<T> fmt::Debug for AsyncResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncResponse")
    }
}

impl<T> MessageResponse for AsyncResponse<T> {
    type Sender = Sender<T>;
    type Output = Request<T>;

    fn channel() -> (Self::Sender, Self::Output) {
        let (tx, rx) = oneshot::channel();
        (Sender(tx), Request(rx))
    }
}

/// Message response for fire-and-forget messages.
///
/// Sending such a message resolves as soon as the message has been enqueued in the service's
/// inbox.
#[derive(Debug)]
pub struct NoResponse;

impl MessageResponse for NoResponse {
    type Sender = ();
    type Output = ();

    fn channel() -> (Self::Sender, Self::Output) {
        ((), ())
    }
}

/// The address of a [`Service`].
///
/// Addresses allow to [send](Self::send) messages to a service that implements a corresponding
/// [`FromMessage`] implementation. The inbox of the service is bounded: when it is full, sending
/// waits until the service has made room. Addresses can be freely cloned. When the last clone is
/// dropped, the inbox closes and the service stops receiving messages.
pub struct Addr<I: Interface> {
    tx: mpsc::Sender<I>,
    name: &'static str,
}

impl<I: Interface> Addr<I> {
    /// Sends a message to the service and returns the response output.
    ///
    /// For [`NoResponse`] messages this resolves once the message has been enqueued. For
    /// [`AsyncResponse`] messages, it resolves to a [`Request`] that needs to be awaited to obtain
    /// the response.
    ///
    /// Fails with [`SendError`] if the service has shut down.
    pub async fn send<M>(
        &self,
        message: M,
    ) -> Result<<I::Response as MessageResponse>::Output, SendError>
    where
        I: FromMessage<M>,
    {
        let (tx, rx) = I::Response::channel();
        self.tx
            .send(I::from_message(message, tx))
            .await
            .map_err(|_| SendError)?;
        Ok(rx)
    }

    /// Sends a message and waits for the service's response.
    pub async fn request<M, T>(&self, message: M) -> Result<T, SendError>
    where
        I: FromMessage<M, Response = AsyncResponse<T>>,
    {
        self.send(message).await?.await
    }

    /// Sends a message from outside of an async context, blocking the thread while the inbox is
    /// full.
    ///
    /// # Panics
    ///
    /// This function panics if called within an asynchronous execution context.
    pub fn blocking_send<M>(
        &self,
        message: M,
    ) -> Result<<I::Response as MessageResponse>::Output, SendError>
    where
        I: FromMessage<M>,
    {
        let (tx, rx) = I::Response::channel();
        self.tx
            .blocking_send(I::from_message(message, tx))
            .map_err(|_| SendError)?;
        Ok(rx)
    }

    /// Returns the number of messages waiting in the inbox.
    pub fn queue_size(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl<I: Interface> fmt::Debug for Addr<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addr")
            .field("name", &self.name)
            .field("open", &!self.tx.is_closed())
            .field("queue_size", &self.queue_size())
            .finish()
    }
}

// Manually derive `Clone` since we do not require `I: Clone` and the Clone derive adds this
// constraint.
impl<I: Interface> Clone for Addr<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
        }
    }
}

/// Inbound channel for messages sent through an [`Addr`].
///
/// This channel is meant to be polled in a [`Service`].
///
/// Instances are created automatically when [starting](Service::start) a service, or can be
/// created through [`channel`]. The channel closes when all associated [`Addr`]s are dropped.
pub struct Receiver<I: Interface> {
    rx: mpsc::Receiver<I>,
    name: &'static str,
}

impl<I: Interface> Receiver<I> {
    /// Receives the next value for this receiver.
    ///
    /// This method returns `None` if the channel has been closed and there are no remaining
    /// messages in the channel's buffer. This indicates that no further values can ever be
    /// received from this `Receiver`. The channel is closed when all senders have been dropped.
    pub async fn recv(&mut self) -> Option<I> {
        self.rx.recv().await
    }

    /// Returns the name of the service owning this inbox.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<I: Interface> fmt::Debug for Receiver<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("name", &self.name)
            .finish()
    }
}

/// Creates a bounded inbox for a service.
///
/// The `capacity` is the number of messages that can be enqueued before senders start waiting. A
/// capacity of zero is raised to one.
pub fn channel<I: Interface>(name: &'static str, capacity: usize) -> (Addr<I>, Receiver<I>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Addr { tx, name }, Receiver { rx, name })
}

/// An asynchronous unit responding to messages.
///
/// Services receive messages conforming to some [`Interface`] through an [`Addr`] and handle them
/// one by one. Internally, services are free to concurrently process these messages or not.
///
/// The service is started through [`start`](Self::start), which spawns the handler on the current
/// tokio runtime and returns the address.
///
/// # Example
///
/// ```
/// use carbon_system::{FromMessage, Interface, NoResponse, Receiver, Service};
///
/// struct MyMessage;
///
/// impl Interface for MyMessage {}
///
/// impl FromMessage<Self> for MyMessage {
///     type Response = NoResponse;
///
///     fn from_message(message: Self, _: ()) -> Self {
///         message
///     }
/// }
///
/// struct MyService;
///
/// impl Service for MyService {
///     type Interface = MyMessage;
///
///     fn spawn_handler(self, mut rx: Receiver<Self::Interface>) {
///         tokio::spawn(async move {
///             while let Some(_message) = rx.recv().await {
///                 // handle the message
///             }
///         });
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let addr = MyService.start(16);
/// addr.send(MyMessage).await.ok();
/// # }
/// ```
pub trait Service: Sized {
    /// The interface of messages this service implements.
    type Interface: Interface;

    /// Spawns a task to handle service messages.
    ///
    /// Receives an inbound channel for all messages sent through the service's [`Addr`]. Note
    /// that this function is synchronous, so that this needs to spawn at least one task
    /// internally.
    fn spawn_handler(self, rx: Receiver<Self::Interface>);

    /// Starts the service in the current runtime and returns an address for it.
    fn start(self, capacity: usize) -> Addr<Self::Interface> {
        let (addr, rx) = channel(Self::name(), capacity);
        self.spawn_handler(rx);
        addr
    }

    /// Returns a unique name for this service implementation.
    ///
    /// This is used for internal diagnostics and uses the fully qualified type name of the service
    /// implementor by default.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}
