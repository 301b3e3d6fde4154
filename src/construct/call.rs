//! Bind a single call to a dialed transport and codec pair.

use std::sync::Arc;

use crate::context::Context;
use crate::error::{CompilerError, ErrorKind};
use crate::ir::types::{ErrorHandler, ExecutableCall, TransportBinding};
use crate::parse::catalog::Service;
use crate::parse::types::{CallSpec, OnError, ParameterMap};

use super::Constructor;
use super::capability::{AddressResolver, CodecConstructor, StaticResolver};

impl Constructor<'_> {
    /// Resolve the call's service, transport, resolver and codecs, then dial.
    ///
    /// Server-declared method references are returned unresolved in
    /// `references`; the caller resolves them against the flow.
    pub async fn construct_call(
        &self,
        ctx: &Context,
        node: &str,
        call: &CallSpec,
    ) -> Result<ExecutableCall, CompilerError> {
        if call.service.is_empty() {
            return Err(ctx.error(ErrorKind::NoServiceName {
                node: node.to_string(),
            }));
        }

        let service = self.services.get(&call.service).ok_or_else(|| {
            ctx.error(ErrorKind::NoService {
                service: call.service.clone(),
                node: node.to_string(),
            })
        })?;

        let transport = self
            .capabilities
            .transports
            .get(&service.transport)
            .ok_or_else(|| {
                ctx.error(ErrorKind::NoTransport {
                    transport: service.transport.clone(),
                    service: service.fully_qualified_name.clone(),
                })
            })?;

        let resolver = self.address_resolver(ctx, service)?;

        tracing::debug!(
            service = %service.fully_qualified_name,
            transport = %service.transport,
            host = %service.host,
            "dialing service"
        );

        let timeout = self.options.dial_timeout();
        let client = match tokio::time::timeout(
            timeout,
            transport.dial(service, &service.options, resolver.clone()),
        )
        .await
        {
            Ok(Ok(client)) => client,
            Ok(Err(err)) => {
                return Err(ctx.error(ErrorKind::Dial {
                    service: service.fully_qualified_name.clone(),
                    reason: err.to_string(),
                }));
            }
            Err(_) => {
                return Err(ctx.error(ErrorKind::DialTimeout {
                    service: service.fully_qualified_name.clone(),
                    timeout_ms: self.options.dial_timeout_ms,
                }));
            }
        };

        let references = if call.method.is_empty() {
            Vec::new()
        } else {
            client
                .method(&call.method)
                .ok_or_else(|| {
                    ctx.error(ErrorKind::NilInput {
                        what: format!(
                            "method '{}' on dialed service '{}'",
                            call.method, service.fully_qualified_name
                        ),
                    })
                })?
                .references
        };

        let request_codec = self.codec(ctx, service, &service.request_codec, true)?;
        let response_codec = self.codec(ctx, service, &service.response_codec, false)?;

        let empty = ParameterMap::new();
        let request_manager = new_manager(
            ctx,
            &service.request_codec,
            request_codec.as_ref(),
            &format!("{}.request", node),
            call.request.as_ref().unwrap_or(&empty),
        )?;
        let response_manager = new_manager(
            ctx,
            &service.response_codec,
            response_codec.as_ref(),
            &format!("{}.response", node),
            call.response.as_ref().unwrap_or(&empty),
        )?;

        Ok(ExecutableCall {
            service: call.service.clone(),
            method: call.method.clone(),
            request: call.request.clone(),
            response: call.response.clone(),
            descriptor: call.descriptor.clone(),
            binding: TransportBinding {
                transport: service.transport.clone(),
                client,
                resolver,
                request_codec: request_manager,
                response_codec: response_manager,
            },
            references,
        })
    }

    /// Compile an on-error policy, encoding its response with `codec` if set.
    pub fn error_handler(
        &self,
        ctx: &Context,
        resource: &str,
        on_error: &OnError,
        codec: Option<(&str, &dyn CodecConstructor)>,
    ) -> Result<ErrorHandler, CompilerError> {
        let empty = ParameterMap::new();
        let codec = match codec {
            Some((name, constructor)) => Some(new_manager(
                ctx,
                name,
                constructor,
                &format!("{}.error", resource),
                on_error.response.as_ref().unwrap_or(&empty),
            )?),
            None => None,
        };

        Ok(ErrorHandler {
            response: on_error.response.clone(),
            status: on_error.status.clone(),
            message: on_error.message.clone(),
            params: on_error.params.clone(),
            codec,
        })
    }

    fn address_resolver(
        &self,
        ctx: &Context,
        service: &Service,
    ) -> Result<Arc<dyn AddressResolver>, CompilerError> {
        let name = service
            .resolver
            .as_ref()
            .or(self.options.default_resolver.as_ref());

        let Some(name) = name else {
            return Ok(Arc::new(StaticResolver::new(service.host.clone())));
        };

        let discovery = self.capabilities.discovery.get(name).ok_or_else(|| {
            ctx.error(ErrorKind::NoResolver {
                resolver: name.clone(),
                service: service.fully_qualified_name.clone(),
            })
        })?;

        discovery.resolver(&service.host).map_err(|err| {
            ctx.error(ErrorKind::Dial {
                service: service.fully_qualified_name.clone(),
                reason: format!("resolver '{}': {}", name, err),
            })
        })
    }

    pub(crate) fn codec(
        &self,
        ctx: &Context,
        service: &Service,
        name: &str,
        request: bool,
    ) -> Result<Arc<dyn CodecConstructor>, CompilerError> {
        self.capabilities.codecs.get(name).ok_or_else(|| {
            let codec = name.to_string();
            let service = service.fully_qualified_name.clone();
            ctx.error(if request {
                ErrorKind::NoRequestCodec { codec, service }
            } else {
                ErrorKind::NoResponseCodec { codec, service }
            })
        })
    }
}

fn new_manager(
    ctx: &Context,
    name: &str,
    constructor: &dyn CodecConstructor,
    resource: &str,
    params: &ParameterMap,
) -> Result<Arc<dyn super::capability::CodecManager>, CompilerError> {
    constructor.new_manager(resource, params).map_err(|err| {
        ctx.error(ErrorKind::Codec {
            codec: name.to_string(),
            resource: resource.to_string(),
            reason: err.to_string(),
        })
    })
}
