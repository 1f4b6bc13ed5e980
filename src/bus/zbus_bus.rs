//! [`PortalBus`] implementation over a zbus session connection.

use std::collections::HashMap;
use std::future::Future;

use futures::StreamExt;
use tracing::{debug, warn};
use zbus::zvariant::{OwnedFd, OwnedObjectPath, OwnedValue, Structure, StructureBuilder, Value};
use zbus::{Connection, Message};

use crate::bus::{
    Arg, MethodCall, PortalBus, ResponseSignal, ResponseSubscription, PROPERTIES_INTERFACE,
};
use crate::config::PortalConfig;
use crate::Result;

/// D-Bus proxy for the broker's per-call `org.freedesktop.portal.Request` objects.
#[zbus::proxy(
    interface = "org.freedesktop.portal.Request",
    default_service = "org.freedesktop.portal.Desktop"
)]
trait Request {
    /// Asks the broker to abandon the request.
    async fn close(&self) -> zbus::Result<()>;

    /// Emitted once when the user interaction behind the request is over.
    #[zbus(signal)]
    fn response(&self, response: u32, results: HashMap<String, OwnedValue>) -> zbus::Result<()>;
}

/// Bus capability backed by a shared [`zbus::Connection`].
#[derive(Clone, Debug)]
pub struct ZbusBus {
    connection: Connection,
    destination: String,
    object_path: OwnedObjectPath,
}

impl ZbusBus {
    /// Wraps an existing connection, addressing the broker named in `config`.
    pub fn new(connection: Connection, config: &PortalConfig) -> Result<Self> {
        let object_path = OwnedObjectPath::try_from(config.object_path.as_str())?;
        Ok(Self {
            connection,
            destination: config.bus_name.clone(),
            object_path,
        })
    }

    /// Opens a connection to the session bus.
    pub async fn session(config: &PortalConfig) -> Result<Self> {
        let connection = Connection::session().await?;
        debug!(
            unique_name = ?connection.unique_name(),
            destination = %config.bus_name,
            "Connected to D-Bus session bus"
        );
        Self::new(connection, config)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn send(&self, call: MethodCall) -> Result<Message> {
        let path = call.path.unwrap_or_else(|| self.object_path.clone());
        debug!(
            path = %path,
            interface = call.interface,
            method = call.method,
            "Calling portal method"
        );

        let reply = match build_body(call.args) {
            Some(body) => {
                self.connection
                    .call_method(
                        Some(self.destination.as_str()),
                        &path,
                        Some(call.interface),
                        call.method,
                        &body,
                    )
                    .await?
            }
            None => {
                self.connection
                    .call_method(
                        Some(self.destination.as_str()),
                        &path,
                        Some(call.interface),
                        call.method,
                        &(),
                    )
                    .await?
            }
        };

        Ok(reply)
    }
}

/// Packs positional arguments into a message body, `None` for a call without
/// arguments.
fn build_body(args: Vec<Arg>) -> Option<Structure<'static>> {
    if args.is_empty() {
        return None;
    }

    let builder = args
        .into_iter()
        .fold(StructureBuilder::new(), |builder, arg| match arg {
            Arg::Str(value) => builder.add_field(value),
            Arg::Path(value) => builder.add_field(value.into_inner()),
            Arg::Bool(value) => builder.add_field(value),
            Arg::U32(value) => builder.add_field(value),
            Arg::I32(value) => builder.add_field(value),
            Arg::F64(value) => builder.add_field(value),
            Arg::Options(options) => {
                let dict: HashMap<String, Value<'static>> = options
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect();
                builder.add_field(dict)
            }
        });

    Some(builder.build())
}

impl PortalBus for ZbusBus {
    fn unique_name(&self) -> Option<String> {
        self.connection.unique_name().map(|name| name.to_string())
    }

    fn subscribe_response(
        &self,
        request_path: &OwnedObjectPath,
    ) -> impl Future<Output = Result<ResponseSubscription>> + Send + 'static {
        let bus = self.clone();
        let request_path = request_path.clone();
        async move {
            let proxy = RequestProxy::builder(&bus.connection)
                .destination(bus.destination.clone())?
                .path(request_path.clone())?
                .build()
                .await?;

            // Resolves once the match rule is installed on the bus.
            let signals = proxy.receive_response().await?;
            debug!(request = %request_path, "Subscribed to Request::Response");

            let subscription = signals
                .filter_map(move |signal| {
                    let request_path = request_path.clone();
                    async move {
                        match signal.args() {
                            Ok(args) => Some(ResponseSignal {
                                response: args.response,
                                results: args.results,
                            }),
                            Err(err) => {
                                warn!(request = %request_path, ?err, "Dropping malformed Response signal");
                                None
                            }
                        }
                    }
                })
                .boxed();

            Ok(subscription)
        }
    }

    fn call(&self, call: MethodCall) -> impl Future<Output = Result<()>> + Send + 'static {
        let bus = self.clone();
        async move { bus.send(call).await.map(drop) }
    }

    fn call_with_fd(
        &self,
        call: MethodCall,
    ) -> impl Future<Output = Result<OwnedFd>> + Send + 'static {
        let bus = self.clone();
        async move {
            let reply = bus.send(call).await?;
            let fd: OwnedFd = reply.body().deserialize()?;
            Ok(fd)
        }
    }

    fn get_property(
        &self,
        interface: &str,
        name: &str,
    ) -> impl Future<Output = Result<OwnedValue>> + Send + 'static {
        let bus = self.clone();
        let interface = interface.to_string();
        let name = name.to_string();
        async move {
            let reply = bus
                .connection
                .call_method(
                    Some(bus.destination.as_str()),
                    &bus.object_path,
                    Some(PROPERTIES_INTERFACE),
                    "Get",
                    &(interface.as_str(), name.as_str()),
                )
                .await?;
            let value: OwnedValue = reply.body().deserialize()?;
            Ok(value)
        }
    }
}
