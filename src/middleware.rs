use std::{
    collections::HashSet,
    env,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::Instant,
};

use futures_core::ready;
use pin_project_lite::pin_project;
use regex::Regex;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::HttpMessage;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::{Error, Result};

use crate::observer::{Completion, TracedBody};
use crate::record::Attributes;
use crate::sink::LogSink;
use crate::trace::{TRACE_ID_HEADER, TraceId};

/// Middleware that assigns every request a trace identifier and logs its
/// start and completion through a [`LogSink`].
///
/// The identifier is taken from the `X-Trace-ID` request header when the
/// caller sent a non-empty one, otherwise a new UUID is generated. It is
/// stored in the request extensions, see [`TraceId`].
///
/// Two info records are written per request:
/// - `Incoming request` with `trace_id`, `method`, `path` and `remote_ip`
/// - `Request completed` with `trace_id`, `duration` (seconds) and `status`
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_middleware_tracelog::{Config, LogSink, TraceLogger};
///
/// let sink = LogSink::new(&Config::default().format("json"));
/// let app = App::new()
///     .wrap(TraceLogger::new(sink).echo_header().exclude("/metrics"));
/// ```
pub struct TraceLogger(Rc<Inner>);

#[derive(Debug, Clone)]
struct Inner {
    sink: LogSink,
    header: HeaderName,
    echo_header: bool,
    fields: Rc<[Field]>,
    exclude: HashSet<String>,
    exclude_regex: Vec<Regex>,
}

impl TraceLogger {
    /// Create `TraceLogger` middleware writing to `sink`.
    pub fn new(sink: LogSink) -> TraceLogger {
        TraceLogger(Rc::new(Inner {
            sink,
            header: HeaderName::from_static(TRACE_ID_HEADER),
            echo_header: false,
            fields: Rc::from(Vec::new()),
            exclude: HashSet::new(),
            exclude_regex: Vec::new(),
        }))
    }

    fn inner_mut(&mut self) -> &mut Inner {
        Rc::make_mut(&mut self.0)
    }

    /// Read the inbound trace identifier from `header` instead of `X-Trace-ID`.
    ///
    /// # Panics
    /// Panics if `header` is not a valid header name.
    pub fn header(mut self, header: &str) -> Self {
        self.inner_mut().header = HeaderName::try_from(header).expect("invalid trace header name");
        self
    }

    /// Copy the trace identifier onto the response, under the same header.
    pub fn echo_header(mut self) -> Self {
        self.inner_mut().echo_header = true;
        self
    }

    /// Add the selected [`Fields`] to the records.
    pub fn fields(mut self, fields: Fields) -> Self {
        self.inner_mut().fields = fields.0.into_iter().collect();
        self
    }

    /// Do not log requests for the specified path. The trace identifier is still attached.
    pub fn exclude<T: Into<String>>(mut self, path: T) -> Self {
        self.inner_mut().exclude.insert(path.into());
        self
    }

    /// Do not log requests for paths that match regex.
    ///
    /// # Panics
    /// Panics if `path` is not a valid regex.
    pub fn exclude_regex<T: Into<String>>(mut self, path: T) -> Self {
        let regex = Regex::new(&path.into()).expect("invalid exclude regex");
        self.inner_mut().exclude_regex.push(regex);
        self
    }
}

impl Default for TraceLogger {
    /// Log to standard output in text format at info level.
    fn default() -> Self {
        TraceLogger::new(LogSink::default())
    }
}

impl<S, B> Transform<S, ServiceRequest> for TraceLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<TracedBody<B>>;
    type Error = Error;
    type Transform = TraceLoggerMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TraceLoggerMiddlewareService {
            service,
            inner: Rc::clone(&self.0),
        }))
    }
}

/// Trace logger middleware service.
pub struct TraceLoggerMiddlewareService<S> {
    inner: Rc<Inner>,
    service: S,
}

impl<S> TraceLoggerMiddlewareService<S> {
    fn excluded(&self, path: &str) -> bool {
        self.inner.exclude.contains(path) || self.inner.exclude_regex.iter().any(|r| r.is_match(path))
    }
}

impl<S, B> Service<ServiceRequest> for TraceLoggerMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<TracedBody<B>>;
    type Error = Error;
    type Future = TraceLoggerResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let trace_id = TraceId::from_header(req.headers().get(&self.inner.header))
            .unwrap_or_else(TraceId::generate);
        req.extensions_mut().insert(trace_id.clone());

        let echo = self
            .inner
            .echo_header
            .then(|| self.inner.header.clone());

        if self.excluded(req.path()) {
            return TraceLoggerResponse {
                fut: self.service.call(req),
                trace_id,
                echo,
                completion: None,
                _phantom: PhantomData,
            };
        }

        let mut attributes = Attributes::new()
            .with("trace_id", trace_id.as_str())
            .with("method", req.method().as_str())
            .with("path", req.path())
            .with("remote_ip", req.peer_addr().map(|addr| addr.to_string()));

        let now = OffsetDateTime::now_utc();
        for field in self.inner.fields.iter() {
            field.render_request(now, &req, &mut attributes);
        }
        self.inner.sink.info("Incoming request", attributes);

        let completion = Completion::new(
            self.inner.sink.clone(),
            trace_id.clone(),
            Rc::clone(&self.inner.fields),
            start,
        );

        TraceLoggerResponse {
            fut: self.service.call(req),
            trace_id,
            echo,
            completion: Some(completion),
            _phantom: PhantomData,
        }
    }
}

pin_project! {
    pub struct TraceLoggerResponse<S, B>
    where
        B: MessageBody,
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        trace_id: TraceId,
        echo: Option<HeaderName>,
        completion: Option<Completion>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for TraceLoggerResponse<S, B>
where
    B: MessageBody,
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<TracedBody<B>>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let mut res = match ready!(this.fut.poll(cx)) {
            Ok(res) => res,
            Err(err) => {
                // the completion record is written when the guard drops here
                if let Some(mut completion) = this.completion.take() {
                    completion.respond(err.as_response_error().status_code());
                }
                return Poll::Ready(Err(err));
            }
        };

        if let Some(header) = this.echo.take() {
            if let Ok(value) = HeaderValue::from_str(this.trace_id.as_str()) {
                res.headers_mut().insert(header, value);
            }
        }

        if let Some(completion) = this.completion.as_mut() {
            if let Some(error) = res.response().error() {
                completion.sink().debug(
                    "Error in response",
                    Attributes::new()
                        .with("trace_id", completion.trace_id().as_str())
                        .with("error", error.to_string()),
                );
            }

            completion.respond(res.status());

            let mut attributes = Attributes::new();
            for field in completion.fields() {
                field.render_response(res.headers(), &mut attributes);
            }
            completion.attributes_mut().extend(attributes);
        }

        let completion = this.completion.take();
        Poll::Ready(Ok(res.map_body(move |_, body| TracedBody::new(body, completion))))
    }
}

/// Selection of extra attributes added to the request records.
#[derive(Debug, Clone, Default)]
pub struct Fields(HashSet<Field>);

impl Fields {
    pub fn builder() -> FieldsBuilder {
        FieldsBuilder::new()
    }

    pub fn new(fields: HashSet<Field>) -> Self {
        Fields(fields)
    }
}

/// Builder for [`Fields`].
///
/// ```rust
/// use actix_web_middleware_tracelog::Fields;
///
/// let fields = Fields::builder()
///     .with_user_agent()
///     .with_size()
///     .with_request_header("content-type")
///     .build();
/// ```
#[derive(Default)]
pub struct FieldsBuilder {
    fields: HashSet<Field>,
}

impl FieldsBuilder {
    pub fn new() -> Self {
        FieldsBuilder {
            fields: HashSet::new(),
        }
    }

    pub fn build(self) -> Fields {
        Fields(self.fields)
    }

    pub fn with_params(mut self) -> Self {
        self.fields.insert(Field::Params);
        self
    }

    pub fn with_version(mut self) -> Self {
        self.fields.insert(Field::Version);
        self
    }

    pub fn with_host(mut self) -> Self {
        self.fields.insert(Field::Host);
        self
    }

    pub fn with_real_ip(mut self) -> Self {
        self.fields.insert(Field::RealIp);
        self
    }

    /// # Panics
    /// Panics if `header` is not a valid header name.
    pub fn with_request_header(mut self, header: &str) -> Self {
        self.fields.insert(Field::RequestHeader(
            HeaderName::try_from(header).expect("invalid request header name"),
        ));
        self
    }

    /// # Panics
    /// Panics if `header` is not a valid header name.
    pub fn with_response_header(mut self, header: &str) -> Self {
        self.fields.insert(Field::ResponseHeader(
            HeaderName::try_from(header).expect("invalid response header name"),
        ));
        self
    }

    pub fn with_size(mut self) -> Self {
        self.fields.insert(Field::Size);
        self
    }

    pub fn with_duration_millis(mut self) -> Self {
        self.fields.insert(Field::DurationMillis);
        self
    }

    pub fn with_date_time(mut self) -> Self {
        self.fields.insert(Field::RequestTime);
        self
    }

    pub fn with_user_agent(mut self) -> Self {
        self.fields.insert(Field::UserAgent);
        self
    }

    pub fn with_referer(mut self) -> Self {
        self.fields.insert(Field::Referer);
        self
    }

    pub fn with_environment(mut self, var: &str) -> Self {
        self.fields.insert(Field::Environment(var.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    /// Query string. Example: search=actix
    Params,
    /// Version of the HTTP protocol. Example: HTTP/1.1
    Version,
    /// Host. Example: localhost
    Host,
    /// Real IP address, honoring `Forwarded` and `X-Forwarded-For`. Example: 192.168.0.1
    RealIp,
    /// Request header, logged on the incoming record.
    RequestHeader(HeaderName),
    /// Response header, logged on the completion record.
    ResponseHeader(HeaderName),
    /// Size of the response body in bytes. Example: 1024
    Size,
    /// Duration of the request in milliseconds. Example: 23.123
    DurationMillis,
    /// Timestamp in RFC3339 format. Example: 2019-05-29T18:51:00.000000Z
    RequestTime,
    /// User agent. Example: Mozilla/5.0
    UserAgent,
    /// Referer. Example: https://actix.rs
    Referer,
    /// Environment variable, read when the request completes. Example: USER
    Environment(String),
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .map(|v| v.to_str().unwrap_or_default().to_string())
}

impl Field {
    pub(crate) fn render_request(
        &self,
        now: OffsetDateTime,
        req: &ServiceRequest,
        attributes: &mut Attributes,
    ) {
        match self {
            Field::Version => {
                let version = match req.version() {
                    actix_http::Version::HTTP_09 => "HTTP/0.9",
                    actix_http::Version::HTTP_10 => "HTTP/1.0",
                    actix_http::Version::HTTP_11 => "HTTP/1.1",
                    actix_http::Version::HTTP_2 => "HTTP/2.0",
                    actix_http::Version::HTTP_3 => "HTTP/3.0",
                    _ => "unknown",
                };
                attributes.insert("version", version);
            }

            Field::Params => {
                attributes.insert("params", req.query_string());
            }

            Field::Host => {
                attributes.insert("host", req.connection_info().host());
            }

            Field::RealIp => {
                attributes.insert(
                    "real_ip",
                    req.connection_info()
                        .realip_remote_addr()
                        .map(|addr| addr.to_string()),
                );
            }

            Field::RequestHeader(header) => {
                attributes.insert(header.as_str(), header_value(req.headers(), header));
            }

            Field::RequestTime => {
                attributes.insert("datetime", now.format(&Rfc3339).unwrap_or_default());
            }

            Field::UserAgent => {
                attributes.insert(
                    "user_agent",
                    header_value(req.headers(), &actix_web::http::header::USER_AGENT),
                );
            }

            Field::Referer => {
                attributes.insert(
                    "referer",
                    header_value(req.headers(), &actix_web::http::header::REFERER),
                );
            }

            _ => {}
        }
    }

    pub(crate) fn render_response(&self, headers: &HeaderMap, attributes: &mut Attributes) {
        if let Field::ResponseHeader(header) = self {
            attributes.insert(header.as_str(), header_value(headers, header));
        }
    }

    pub(crate) fn render_completion(&self, size: usize, start: Instant, attributes: &mut Attributes) {
        match self {
            Field::Size => {
                attributes.insert("size", size);
            }

            Field::DurationMillis => {
                let millis = start.elapsed().as_nanos() as f64 / 1_000_000.0;
                attributes.insert("duration_millis", millis);
            }

            Field::Environment(name) => {
                attributes.insert(name.as_str(), env::var(name.as_str()).ok());
            }

            _ => {}
        }
    }
}
