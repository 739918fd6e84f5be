use std::{
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    thread,
    time::Instant,
};

use actix_web::body::{BodySize, MessageBody};
use actix_web::http::StatusCode;
use bytes::Bytes;
use futures_core::ready;
use pin_project_lite::pin_project;

use crate::middleware::Field;
use crate::record::Attributes;
use crate::sink::LogSink;
use crate::trace::TraceId;

/// Status code observed on the way out of the wrapped service.
///
/// Starts at `200 OK`. Every [`record`](Self::record) overwrites the previous
/// value, so the last status handed through is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusObserver {
    status: StatusCode,
}

impl Default for StatusObserver {
    fn default() -> Self {
        StatusObserver {
            status: StatusCode::OK,
        }
    }
}

impl StatusObserver {
    pub fn record(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// Emits the "Request completed" record when dropped.
///
/// Dropping it before [`respond`](Self::respond) was called means the
/// request never produced a response: the record is marked `aborted`, and
/// reports a 500 with `panicked` when the thread is unwinding.
pub(crate) struct Completion {
    sink: LogSink,
    trace_id: TraceId,
    start: Instant,
    fields: Rc<[Field]>,
    observer: StatusObserver,
    attributes: Attributes,
    size: usize,
    aborted: bool,
}

impl Completion {
    pub(crate) fn new(sink: LogSink, trace_id: TraceId, fields: Rc<[Field]>, start: Instant) -> Self {
        Completion {
            sink,
            trace_id,
            start,
            fields,
            observer: StatusObserver::default(),
            attributes: Attributes::new(),
            size: 0,
            aborted: true,
        }
    }

    pub(crate) fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub(crate) fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub(crate) fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub(crate) fn respond(&mut self, status: StatusCode) {
        self.observer.record(status);
        self.aborted = false;
    }

    fn finish(mut self, size: usize) {
        self.size = size;
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let panicked = self.aborted && thread::panicking();
        let status = if panicked {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            self.observer.status()
        };

        let mut attributes = Attributes::new()
            .with("trace_id", self.trace_id.as_str())
            .with("duration", self.start.elapsed().as_secs_f64())
            .with("status", status.as_u16());

        for field in self.fields.iter() {
            field.render_completion(self.size, self.start, &mut attributes);
        }
        attributes.extend(std::mem::take(&mut self.attributes));

        if self.aborted {
            attributes.insert("aborted", true);
        }
        if panicked {
            attributes.insert("panicked", true);
        }

        self.sink.info("Request completed", attributes);
    }
}

pin_project! {
    /// Response body that forwards every chunk unchanged while counting its
    /// size, and reports the request once the body is done.
    pub struct TracedBody<B> {
        #[pin]
        body: B,
        completion: Option<Completion>,
        size: usize,
    }

    impl<B> PinnedDrop for TracedBody<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(completion) = this.completion.take() {
                completion.finish(*this.size);
            }
        }
    }
}

impl<B> TracedBody<B> {
    pub(crate) fn new(body: B, completion: Option<Completion>) -> Self {
        TracedBody {
            body,
            completion,
            size: 0,
        }
    }
}

impl<B: MessageBody> MessageBody for TracedBody<B> {
    type Error = B::Error;

    #[inline]
    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();

        match ready!(this.body.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.size += chunk.len();
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => Poll::Ready(None),
        }
    }
}
