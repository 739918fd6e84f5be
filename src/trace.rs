use std::{fmt, ops::Deref};

use actix_utils::future::{Ready, err, ok};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, error::ErrorInternalServerError};
use uuid::Uuid;

/// Header the trace identifier is read from by default.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Identifier correlating every record of one request.
///
/// Stored in the request extensions by [`TraceLogger`](crate::TraceLogger).
/// The extensions map is keyed by type, so no other middleware can shadow it.
/// Handlers can take it as an extractor:
///
/// ```rust
/// use actix_web::{get, HttpResponse};
/// use actix_web_middleware_tracelog::TraceId;
///
/// #[get("/orders")]
/// async fn orders(trace_id: TraceId) -> HttpResponse {
///     HttpResponse::Ok().body(format!("trace {trace_id}"))
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// Generate a fresh identifier, UUIDv4 or UUIDv7 with the `uuid_v7` feature.
    pub fn generate() -> Self {
        #[cfg(not(feature = "uuid_v7"))]
        let id = Uuid::new_v4();
        #[cfg(feature = "uuid_v7")]
        let id = Uuid::now_v7();

        TraceId(id.as_hyphenated().to_string())
    }

    /// Identifier propagated by the caller, if it is usable.
    pub(crate) fn from_header(value: Option<&actix_web::http::header::HeaderValue>) -> Option<Self> {
        let value = value?.to_str().ok()?;
        (!value.is_empty()).then(|| TraceId(value.to_string()))
    }

    /// Identifier attached to `req`, if the middleware ran.
    pub fn of(req: &HttpRequest) -> Option<TraceId> {
        req.extensions().get::<TraceId>().cloned()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Deref for TraceId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromRequest for TraceId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        match TraceId::of(req) {
            Some(id) => ok(id),
            None => err(ErrorInternalServerError(
                "trace id is missing, is TraceLogger registered?",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderValue;
    use actix_web::test::TestRequest;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<_> = (0..10_000).map(|_| TraceId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
        assert!(ids.iter().all(|id| Uuid::parse_str(id.as_str()).is_ok()));
    }

    #[test]
    fn test_from_header() {
        let value = HeaderValue::from_static("abc-123");
        assert_eq!(
            TraceId::from_header(Some(&value)),
            Some(TraceId("abc-123".to_string()))
        );

        let empty = HeaderValue::from_static("");
        assert_eq!(TraceId::from_header(Some(&empty)), None);
        assert_eq!(TraceId::from_header(None), None);

        let opaque = HeaderValue::from_bytes(b"caf\xe9").unwrap();
        assert_eq!(TraceId::from_header(Some(&opaque)), None);
    }

    #[actix_web::test]
    async fn test_extractor() {
        let req = TestRequest::default().to_http_request();
        assert!(TraceId::extract(&req).await.is_err());

        req.extensions_mut().insert(TraceId("abc-123".to_string()));
        let id = TraceId::extract(&req).await.unwrap();
        assert_eq!(id.as_str(), "abc-123");
        assert_eq!(id.to_string(), "abc-123");
    }
}
